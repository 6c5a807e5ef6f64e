use crate::{
    block::{BlockGenerationStrategy, BlockNumber, Segment},
    crypto::random::random_hash,
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    borrow::Borrow,
    collections::BTreeMap,
    fmt::{Display, Formatter},
    time::Duration,
};

/// Opaque handle of one simulated chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    // 64 hex chars, the usual shape of a chain id
    pub fn random() -> Self {
        Self(random_hash().to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChainId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ChainId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// History discontinuity: once `position` is produced, the chain forks back
/// `magnitude` blocks and continues on the next segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "JumpRepr", into = "(BlockNumber, u64)")]
pub struct Jump {
    pub position: BlockNumber,
    pub magnitude: u64,
}

impl Jump {
    pub fn new(position: BlockNumber, magnitude: u64) -> Self {
        Self {
            position,
            magnitude,
        }
    }

    /// First block produced on the new segment, never below `start_block`.
    /// A zero magnitude is treated as one.
    pub fn resume_block(&self, start_block: BlockNumber) -> BlockNumber {
        // position + 1 - magnitude, without overflowing at u64::MAX
        self.position
            .saturating_sub(self.magnitude.saturating_sub(1))
            .max(start_block)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JumpRepr {
    Pair(BlockNumber, u64),
    Object {
        position: BlockNumber,
        magnitude: u64,
    },
}

impl From<JumpRepr> for Jump {
    fn from(value: JumpRepr) -> Self {
        match value {
            JumpRepr::Pair(position, magnitude) | JumpRepr::Object { position, magnitude } => {
                Self::new(position, magnitude)
            }
        }
    }
}

impl From<Jump> for (BlockNumber, u64) {
    fn from(value: Jump) -> Self {
        (value.position, value.magnitude)
    }
}

/// Network outage: once `position` is produced, both endpoints of the chain
/// go down for `duration_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PauseRepr", into = "(BlockNumber, u64)")]
pub struct Pause {
    pub position: BlockNumber,
    pub duration_ms: u64,
}

impl Pause {
    pub fn new(position: BlockNumber, duration_ms: u64) -> Self {
        Self {
            position,
            duration_ms,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PauseRepr {
    Pair(BlockNumber, u64),
    Object {
        position: BlockNumber,
        duration_ms: u64,
    },
}

impl From<PauseRepr> for Pause {
    fn from(value: PauseRepr) -> Self {
        match value {
            PauseRepr::Pair(position, duration_ms)
            | PauseRepr::Object {
                position,
                duration_ms,
            } => Self::new(position, duration_ms),
        }
    }
}

impl From<Pause> for (BlockNumber, u64) {
    fn from(value: Pause) -> Self {
        (value.position, value.duration_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    // One block per block interval
    #[default]
    RealTime,
    // Produce the whole range without waiting
    #[serde(alias = "fast")]
    AsFastAsPossible,
}

/// Scripted action injected in a given block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub authorization: Vec<String>,
    #[serde(default)]
    pub data: Value,
}

impl ActionDescriptor {
    pub fn new<A: Into<String>, N: Into<String>>(account: A, name: N, data: Value) -> Self {
        Self {
            account: account.into(),
            name: name.into(),
            authorization: Vec::new(),
            data,
        }
    }
}

/// Caller supplied chain configuration, everything is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainDescriptor {
    pub chain_id: Option<ChainId>,
    pub ship_port: Option<u16>,
    pub rpc_port: Option<u16>,
    pub start_time: Option<TimestampMillis>,
    pub block_interval_ms: Option<u64>,
    pub start_block: Option<BlockNumber>,
    pub end_block: Option<BlockNumber>,
    pub abi: Option<Value>,
    pub pacing: Option<PacingMode>,
    pub block_generation: Option<BlockGenerationStrategy>,
    // Explicit history, one entry per segment
    pub blocks: Option<Vec<Segment>>,
    pub jumps: Vec<Jump>,
    pub pauses: Vec<Pause>,
    pub transactions: BTreeMap<BlockNumber, Vec<ActionDescriptor>>,
    pub modules: Vec<String>,
}

impl ChainDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain_id<I: Into<ChainId>>(mut self, chain_id: I) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    pub fn with_ports(mut self, ship_port: u16, rpc_port: u16) -> Self {
        self.ship_port = Some(ship_port);
        self.rpc_port = Some(rpc_port);
        self
    }

    pub fn with_block_range(mut self, start_block: BlockNumber, end_block: BlockNumber) -> Self {
        self.start_block = Some(start_block);
        self.end_block = Some(end_block);
        self
    }

    pub fn with_pacing(mut self, pacing: PacingMode) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn with_block_generation(mut self, strategy: BlockGenerationStrategy) -> Self {
        self.block_generation = Some(strategy);
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Segment>) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn with_jump(mut self, position: BlockNumber, magnitude: u64) -> Self {
        self.jumps.push(Jump::new(position, magnitude));
        self
    }

    pub fn with_pause(mut self, position: BlockNumber, duration_ms: u64) -> Self {
        self.pauses.push(Pause::new(position, duration_ms));
        self
    }

    pub fn with_block_interval(mut self, block_interval_ms: u64) -> Self {
        self.block_interval_ms = Some(block_interval_ms);
        self
    }

    pub fn with_module<S: Into<String>>(mut self, module: S) -> Self {
        self.modules.push(module.into());
        self
    }

    pub fn with_action(mut self, block_num: BlockNumber, action: ActionDescriptor) -> Self {
        self.transactions.entry(block_num).or_default().push(action);
        self
    }
}

/// Where the block history of a chain comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    // Block ids are derived on the fly by the engine
    Empty,
    Explicit,
    Generated(BlockGenerationStrategy),
}

/// Fully resolved chain configuration returned on creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChainInfo {
    pub chain_id: ChainId,
    pub ship_port: u16,
    pub rpc_port: u16,
    pub start_time: TimestampMillis,
    pub block_interval_ms: u64,
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    pub abi: Value,
    pub pacing: PacingMode,
    pub block_source: BlockSource,
    pub segments: usize,
    pub jumps: Vec<Jump>,
    pub pauses: Vec<Pause>,
    pub modules: Vec<String>,
}

impl NewChainInfo {
    // Number of blocks in [start_block, end_block]
    pub fn range_size(&self) -> usize {
        (self.end_block - self.start_block).saturating_add(1) as usize
    }

    pub fn ship_url(&self, host: &str) -> String {
        format!("ws://{}:{}", host, self.ship_port)
    }

    pub fn rpc_url(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.rpc_port)
    }
}
