mod modules;
mod simulated;
mod state;

pub use modules::*;
pub use simulated::SimulatedChain;
pub use state::ChainState;

use super::error::EngineError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use mockchain_common::{
    api::{ActionDescriptor, ChainId, Jump, NewChainInfo, PacingMode, Pause},
    block::{BlockNumber, Segment},
    time::TimestampMillis,
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Invoked by the engine when a pause position is produced.
/// The returned future resolves once the outage is over.
pub type PauseCallback = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Immutable parameters a chain engine is built with
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub chain_id: ChainId,
    pub start_time: TimestampMillis,
    pub block_interval_ms: u64,
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    pub abi: Value,
    pub pacing: PacingMode,
}

impl From<&NewChainInfo> for EngineParams {
    fn from(info: &NewChainInfo) -> Self {
        Self {
            chain_id: info.chain_id.clone(),
            start_time: info.start_time,
            block_interval_ms: info.block_interval_ms,
            start_block: info.start_block,
            end_block: info.end_block,
            abi: info.abi.clone(),
            pacing: info.pacing,
        }
    }
}

/// Block producer behind one simulated chain.
/// Every setter must be called before `start`.
#[async_trait]
pub trait ChainEngine: Send + Sync + 'static {
    // Enable a mocking module, unknown names are rejected
    async fn init_module(&mut self, name: &str) -> Result<(), EngineError>;

    // Ordered list, the n-th jump moves production from segment n to n + 1
    fn set_jumps(&mut self, jumps: Vec<Jump>);

    fn set_pauses(&mut self, pauses: Vec<Pause>);

    fn set_block_history(&mut self, segment: usize, hashes: Segment) -> Result<(), EngineError>;

    fn set_transactions(&mut self, transactions: BTreeMap<BlockNumber, Vec<ActionDescriptor>>);

    fn start(&mut self) -> Result<(), EngineError>;

    // Stop block production and every pause cycle it started
    async fn stop(&mut self) -> Result<(), EngineError>;
}
