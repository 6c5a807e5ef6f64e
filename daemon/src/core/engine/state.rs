use super::{EngineParams, ModuleState};
use log::{debug, warn};
use mockchain_common::{
    api::{BlockEvent, BlockInfo, ChainInfo, ForkEvent, StreamMessage},
    block::BlockNumber,
    config::{IRREVERSIBLE_BLOCK_LAG, STREAM_CHANNEL_CAPACITY, VERSION},
    crypto::Hash,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

#[derive(Debug, Default)]
struct Timeline {
    head: Option<BlockInfo>,
    // Blocks of the active branch, forked blocks are dropped
    blocks: BTreeMap<BlockNumber, BlockInfo>,
}

/// State of one simulated chain, shared between its producer and its endpoints
pub struct ChainState {
    params: EngineParams,
    timeline: RwLock<Timeline>,
    modules: Mutex<ModuleState>,
    sender: broadcast::Sender<StreamMessage>,
}

impl ChainState {
    pub fn new(params: EngineParams) -> Self {
        let (sender, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        Self {
            params,
            timeline: RwLock::new(Timeline::default()),
            modules: Mutex::new(ModuleState::default()),
            sender,
        }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn abi(&self) -> &Value {
        &self.params.abi
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.sender.subscribe()
    }

    pub fn modules(&self) -> MutexGuard<'_, ModuleState> {
        self.modules.lock()
    }

    pub fn head_block_num(&self) -> Option<BlockNumber> {
        self.timeline.read().head.as_ref().map(|block| block.block_num)
    }

    pub fn get_block(&self, block_num: BlockNumber) -> Option<BlockInfo> {
        self.timeline.read().blocks.get(&block_num).cloned()
    }

    // Id of the block below `block_num` on the active branch
    pub fn previous_id(&self, block_num: BlockNumber) -> Hash {
        let timeline = self.timeline.read();
        block_num
            .checked_sub(1)
            .and_then(|previous| timeline.blocks.get(&previous))
            .map(|block| block.block_id.clone())
            .unwrap_or_else(Hash::zero)
    }

    fn last_irreversible(&self, timeline: &Timeline, head: BlockNumber) -> (BlockNumber, Hash) {
        let start_block = self.params.start_block;
        match head.checked_sub(IRREVERSIBLE_BLOCK_LAG) {
            Some(lib) if lib >= start_block => {
                let id = timeline
                    .blocks
                    .get(&lib)
                    .map(|block| block.block_id.clone())
                    .unwrap_or_else(Hash::zero);
                (lib, id)
            }
            _ => (start_block.saturating_sub(1), Hash::zero()),
        }
    }

    pub fn chain_info(&self) -> ChainInfo {
        let timeline = self.timeline.read();
        let (head_block_num, head_block_id, head_block_time, segment) = match &timeline.head {
            Some(head) => (
                head.block_num,
                head.block_id.clone(),
                head.timestamp,
                head.segment,
            ),
            None => (
                self.params.start_block.saturating_sub(1),
                Hash::zero(),
                self.params.start_time,
                0,
            ),
        };
        let (last_irreversible_block_num, last_irreversible_block_id) =
            self.last_irreversible(&timeline, head_block_num);

        ChainInfo {
            server_version: VERSION.to_owned(),
            chain_id: self.params.chain_id.clone(),
            head_block_num,
            head_block_id,
            head_block_time,
            last_irreversible_block_num,
            last_irreversible_block_id,
            start_block: self.params.start_block,
            end_block: self.params.end_block,
            segment,
        }
    }

    /// Record a produced block, apply its actions and publish it
    pub(super) fn push_block(&self, block: BlockInfo) {
        {
            let mut modules = self.modules.lock();
            for action in &block.actions {
                if let Err(e) = modules.apply(block.block_num, action) {
                    warn!(
                        "Chain {}: action {}::{} in block {} was not applied: {}",
                        self.params.chain_id, action.account, action.name, block.block_num, e
                    );
                }
            }
        }

        let event = {
            let mut timeline = self.timeline.write();
            timeline.blocks.insert(block.block_num, block.clone());
            timeline.head = Some(block.clone());
            let (last_irreversible_block_num, last_irreversible_block_id) =
                self.last_irreversible(&timeline, block.block_num);
            BlockEvent {
                block,
                last_irreversible_block_num,
                last_irreversible_block_id,
            }
        };

        // No subscriber is not an error
        let _ = self.sender.send(StreamMessage::Block(event));
    }

    /// Drop every block from `resume_block` on and announce the fork
    pub(super) fn fork(&self, from_block: BlockNumber, resume_block: BlockNumber, segment: usize) {
        {
            let mut timeline = self.timeline.write();
            let dropped = timeline.blocks.split_off(&resume_block);
            debug!(
                "Chain {}: fork at {} dropped {} blocks",
                self.params.chain_id,
                from_block,
                dropped.len()
            );
        }

        let _ = self.sender.send(StreamMessage::Fork(ForkEvent {
            from_block,
            resume_block,
            segment,
        }));
    }
}
