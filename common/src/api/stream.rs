use super::{ActionDescriptor, ChainId};
use crate::{block::BlockNumber, crypto::Hash, time::TimestampMillis};
use serde::{Deserialize, Serialize};

/// A block as produced by a simulated chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_num: BlockNumber,
    pub block_id: Hash,
    pub previous_id: Hash,
    pub timestamp: TimestampMillis,
    // Timeline branch the block belongs to
    pub segment: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEvent {
    #[serde(flatten)]
    pub block: BlockInfo,
    pub last_irreversible_block_num: BlockNumber,
    pub last_irreversible_block_id: Hash,
}

/// Published when a jump sends the chain back in its history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkEvent {
    pub from_block: BlockNumber,
    pub resume_block: BlockNumber,
    pub segment: usize,
}

/// Current state of a chain, as returned by `get_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub server_version: String,
    pub chain_id: ChainId,
    pub head_block_num: BlockNumber,
    pub head_block_id: Hash,
    pub head_block_time: TimestampMillis,
    pub last_irreversible_block_num: BlockNumber,
    pub last_irreversible_block_id: Hash,
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    pub segment: usize,
}

/// Frames pushed to state-history stream subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    // Sent once right after a subscriber connects
    Status(ChainInfo),
    Block(BlockEvent),
    Fork(ForkEvent),
}
