use super::{ChainEngine, ChainState, EngineParams, PauseCallback};
use crate::core::error::EngineError;
use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use mockchain_common::{
    api::{ActionDescriptor, BlockInfo, ChainId, Jump, PacingMode, Pause},
    block::{BlockNumber, Segment},
    crypto::{hash, Hash},
    time::{get_current_time_in_millis, slot_timestamp},
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::task::{JoinHandle, JoinSet};

#[derive(Debug, Default)]
struct Schedule {
    jumps: Vec<Jump>,
    pauses: BTreeMap<BlockNumber, Vec<Pause>>,
    history: BTreeMap<usize, Segment>,
    transactions: BTreeMap<BlockNumber, Vec<ActionDescriptor>>,
}

// Block id used when no history was provided for a segment
fn derive_block_id(chain_id: &ChainId, segment: usize, block_num: BlockNumber) -> Hash {
    let mut bytes = Vec::with_capacity(chain_id.as_str().len() + 16);
    bytes.extend_from_slice(chain_id.as_str().as_bytes());
    bytes.extend_from_slice(&(segment as u64).to_be_bytes());
    bytes.extend_from_slice(&block_num.to_be_bytes());
    hash(&bytes)
}

/// In-memory chain producing one block per slot
pub struct SimulatedChain {
    state: Arc<ChainState>,
    on_pause: PauseCallback,
    schedule: Schedule,
    started: bool,
    producer: Option<JoinHandle<()>>,
}

impl SimulatedChain {
    pub fn new(params: EngineParams, on_pause: PauseCallback) -> Self {
        Self {
            state: Arc::new(ChainState::new(params)),
            on_pause,
            schedule: Schedule::default(),
            started: false,
            producer: None,
        }
    }

    pub fn state(&self) -> &Arc<ChainState> {
        &self.state
    }

    pub fn is_producing(&self) -> bool {
        self.producer
            .as_ref()
            .is_some_and(|producer| !producer.is_finished())
    }

    fn warn_if_started(&self, what: &str) -> bool {
        if self.started {
            warn!(
                "Chain {}: {} ignored, block production is already started",
                self.state.params().chain_id,
                what
            );
        }
        self.started
    }
}

#[async_trait]
impl ChainEngine for SimulatedChain {
    async fn init_module(&mut self, name: &str) -> Result<(), EngineError> {
        self.state.modules().enable(name)?;
        debug!(
            "Chain {}: module '{}' initialized",
            self.state.params().chain_id,
            name
        );
        Ok(())
    }

    fn set_jumps(&mut self, jumps: Vec<Jump>) {
        if !self.warn_if_started("jump schedule") {
            self.schedule.jumps = jumps;
        }
    }

    fn set_pauses(&mut self, pauses: Vec<Pause>) {
        if !self.warn_if_started("pause schedule") {
            let mut by_position: BTreeMap<BlockNumber, Vec<Pause>> = BTreeMap::new();
            for pause in pauses {
                by_position.entry(pause.position).or_default().push(pause);
            }
            self.schedule.pauses = by_position;
        }
    }

    fn set_block_history(&mut self, segment: usize, hashes: Segment) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }

        let segments = self.schedule.jumps.len() + 1;
        if segment >= segments {
            return Err(EngineError::InvalidSegment {
                index: segment,
                segments,
            });
        }

        self.schedule.history.insert(segment, hashes);
        Ok(())
    }

    fn set_transactions(&mut self, transactions: BTreeMap<BlockNumber, Vec<ActionDescriptor>>) {
        if !self.warn_if_started("transactions") {
            self.schedule.transactions = transactions;
        }
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.started = true;

        let producer = Producer {
            state: Arc::clone(&self.state),
            on_pause: Arc::clone(&self.on_pause),
            schedule: std::mem::take(&mut self.schedule),
            pauses: JoinSet::new(),
        };
        self.producer = Some(tokio::spawn(producer.run()));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        if let Some(producer) = self.producer.take() {
            producer.abort();
            match producer.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => return Err(EngineError::Stop(e.to_string())),
            }
            info!(
                "Chain {}: block production stopped",
                self.state.params().chain_id
            );
        }
        Ok(())
    }
}

struct Producer {
    state: Arc<ChainState>,
    on_pause: PauseCallback,
    schedule: Schedule,
    // Pause cycles in flight, aborted with the producer
    pauses: JoinSet<()>,
}

impl Producer {
    fn block_id(&self, segment: usize, block_num: BlockNumber) -> Hash {
        let params = self.state.params();
        self.schedule
            .history
            .get(&segment)
            .and_then(|hashes| hashes.get((block_num - params.start_block) as usize))
            .cloned()
            .unwrap_or_else(|| derive_block_id(&params.chain_id, segment, block_num))
    }

    fn reap_pauses(&mut self) {
        while let Some(result) = self.pauses.try_join_next() {
            if let Err(e) = result {
                error!(
                    "Chain {}: pause cycle failed: {}",
                    self.state.params().chain_id,
                    e
                );
            }
        }
    }

    async fn run(mut self) {
        let params = self.state.params().clone();
        info!(
            "Chain {}: producing blocks {} to {} every {}ms ({:?})",
            params.chain_id,
            params.start_block,
            params.end_block,
            params.block_interval_ms,
            params.pacing
        );

        let mut segment = 0;
        let mut block_num = params.start_block;
        let mut slot = 0;
        while block_num <= params.end_block {
            let timestamp = slot_timestamp(params.start_time, params.block_interval_ms, slot);
            match params.pacing {
                PacingMode::RealTime => {
                    let now = get_current_time_in_millis();
                    if timestamp > now {
                        tokio::time::sleep(Duration::from_millis(timestamp - now)).await;
                    }
                }
                PacingMode::AsFastAsPossible => tokio::task::yield_now().await,
            }

            let block = BlockInfo {
                block_num,
                block_id: self.block_id(segment, block_num),
                previous_id: self.state.previous_id(block_num),
                timestamp,
                segment,
                actions: self
                    .schedule
                    .transactions
                    .remove(&block_num)
                    .unwrap_or_default(),
            };
            trace!(
                "Chain {}: block {} ({}) on segment {}",
                params.chain_id,
                block.block_num,
                block.block_id,
                segment
            );
            self.state.push_block(block);

            for pause in self.schedule.pauses.remove(&block_num).unwrap_or_default() {
                info!(
                    "Chain {}: network pause of {}ms after block {}",
                    params.chain_id, pause.duration_ms, block_num
                );
                self.pauses.spawn((self.on_pause)(pause.duration()));
            }
            self.reap_pauses();

            match self.schedule.jumps.get(segment).copied() {
                Some(jump) if jump.position == block_num => {
                    let resume_block = jump.resume_block(params.start_block);
                    segment += 1;
                    info!(
                        "Chain {}: jump after block {}, resuming at {} on segment {}",
                        params.chain_id, block_num, resume_block, segment
                    );
                    self.state.fork(block_num, resume_block, segment);
                    block_num = resume_block;
                }
                _ => match block_num.checked_add(1) {
                    Some(next) => block_num = next,
                    None => break,
                },
            }
            slot += 1;
        }

        info!(
            "Chain {}: reached end block {}",
            params.chain_id, params.end_block
        );

        // Let outstanding outages finish their cycle
        while let Some(result) = self.pauses.join_next().await {
            if let Err(e) = result {
                error!("Chain {}: pause cycle failed: {}", params.chain_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use mockchain_common::{
        api::{ChainId, StreamMessage},
        block::generate_in_order_block_hashes,
        config::TOKEN_MODULE,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::{sync::broadcast::Receiver, time::timeout};

    fn params(start_block: BlockNumber, end_block: BlockNumber, pacing: PacingMode) -> EngineParams {
        EngineParams {
            chain_id: ChainId::from("alpha"),
            start_time: get_current_time_in_millis(),
            block_interval_ms: 20,
            start_block,
            end_block,
            abi: Value::Null,
            pacing,
        }
    }

    fn noop_pause() -> PauseCallback {
        Arc::new(|_: Duration| async {}.boxed())
    }

    // Collect frames until the final block of the last segment
    async fn collect_until(
        receiver: &mut Receiver<StreamMessage>,
        end_block: BlockNumber,
        segment: usize,
    ) -> Vec<StreamMessage> {
        let mut frames = Vec::new();
        loop {
            let frame = timeout(Duration::from_secs(5), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            let done = matches!(
                &frame,
                StreamMessage::Block(event)
                    if event.block.block_num == end_block && event.block.segment == segment
            );
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    #[tokio::test]
    async fn test_jump_replays_blocks_on_next_segment() {
        let mut chain = SimulatedChain::new(
            params(1, 5, PacingMode::AsFastAsPossible),
            noop_pause(),
        );
        chain.set_jumps(vec![Jump::new(3, 2)]);
        let mut receiver = chain.state().subscribe();
        chain.start().unwrap();

        let frames = collect_until(&mut receiver, 5, 1).await;
        let sequence: Vec<(BlockNumber, usize)> = frames
            .iter()
            .filter_map(|frame| match frame {
                StreamMessage::Block(event) => Some((event.block.block_num, event.block.segment)),
                _ => None,
            })
            .collect();
        assert_eq!(
            sequence,
            vec![(1, 0), (2, 0), (3, 0), (2, 1), (3, 1), (4, 1), (5, 1)]
        );
        assert!(frames.iter().any(|frame| matches!(
            frame,
            StreamMessage::Fork(fork) if fork.from_block == 3 && fork.resume_block == 2
        )));

        // Replayed block 2 links to block 1 of the shared prefix
        let block_1 = chain.state().get_block(1).unwrap();
        let block_2 = chain.state().get_block(2).unwrap();
        assert_eq!(block_2.segment, 1);
        assert_eq!(block_2.previous_id, block_1.block_id);

        chain.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_block_history_is_used() {
        let history = generate_in_order_block_hashes(4, 1);
        let mut chain = SimulatedChain::new(
            params(10, 13, PacingMode::AsFastAsPossible),
            noop_pause(),
        );
        chain.set_block_history(0, history[0].clone()).unwrap();
        assert!(matches!(
            chain.set_block_history(1, Vec::new()),
            Err(EngineError::InvalidSegment {
                index: 1,
                segments: 1
            })
        ));

        let mut receiver = chain.state().subscribe();
        chain.start().unwrap();
        collect_until(&mut receiver, 13, 0).await;

        for (index, num) in (10..=13).enumerate() {
            assert_eq!(chain.state().get_block(num).unwrap().block_id, history[0][index]);
        }
        chain.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_callback_and_transactions() {
        let paused = Arc::new(AtomicU64::new(0));
        let on_pause: PauseCallback = {
            let paused = Arc::clone(&paused);
            Arc::new(move |duration: Duration| {
                paused.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
                async {}.boxed()
            })
        };

        let mut chain = SimulatedChain::new(params(1, 6, PacingMode::AsFastAsPossible), on_pause);
        chain.init_module(TOKEN_MODULE).await.unwrap();
        chain.set_jumps(vec![Jump::new(4, 3)]);
        chain.set_pauses(vec![Pause::new(2, 150)]);
        let mut transactions = BTreeMap::new();
        transactions.insert(
            2,
            vec![ActionDescriptor::new(
                "token",
                "issue",
                json!({ "to": "alice", "quantity": 10, "symbol": "SYS" }),
            )],
        );
        chain.set_transactions(transactions);

        let mut receiver = chain.state().subscribe();
        chain.start().unwrap();
        collect_until(&mut receiver, 6, 1).await;

        // Block 2 is produced twice but the pause and the issue only apply once
        assert_eq!(paused.load(Ordering::SeqCst), 150);
        assert_eq!(
            chain
                .state()
                .modules()
                .currency_balance("alice", "SYS")
                .unwrap(),
            10
        );
        assert!(chain.state().get_block(2).unwrap().actions.is_empty());
        chain.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pauses_on_same_block_all_fire() {
        let paused = Arc::new(AtomicU64::new(0));
        let on_pause: PauseCallback = {
            let paused = Arc::clone(&paused);
            Arc::new(move |duration: Duration| {
                paused.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
                async {}.boxed()
            })
        };

        let mut chain = SimulatedChain::new(params(1, 4, PacingMode::AsFastAsPossible), on_pause);
        chain.set_pauses(vec![Pause::new(3, 100), Pause::new(3, 200)]);
        let mut receiver = chain.state().subscribe();
        chain.start().unwrap();
        collect_until(&mut receiver, 4, 0).await;

        assert_eq!(paused.load(Ordering::SeqCst), 300);
        chain.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_production_ends_at_max_block() {
        let mut chain = SimulatedChain::new(
            params(u64::MAX - 2, u64::MAX, PacingMode::AsFastAsPossible),
            noop_pause(),
        );
        chain.set_jumps(vec![Jump::new(u64::MAX, 1)]);
        let mut receiver = chain.state().subscribe();
        chain.start().unwrap();

        // The jump replays the last block once on segment 1
        collect_until(&mut receiver, u64::MAX, 1).await;
        timeout(Duration::from_secs(5), async {
            while chain.is_producing() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(chain.state().chain_info().head_block_num, u64::MAX);
        chain.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_real_time_pacing() {
        let started = get_current_time_in_millis();
        let mut chain = SimulatedChain::new(params(1, 4, PacingMode::RealTime), noop_pause());
        let mut receiver = chain.state().subscribe();
        chain.start().unwrap();
        collect_until(&mut receiver, 4, 0).await;

        // Four slots of 20ms, the first one is immediate
        assert!(get_current_time_in_millis() - started >= 60);
        chain.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut chain = SimulatedChain::new(params(1, 1_000_000, PacingMode::RealTime), noop_pause());
        // Stopping an idle engine is fine
        chain.stop().await.unwrap();

        chain.start().unwrap();
        assert!(chain.is_producing());
        assert!(matches!(chain.start(), Err(EngineError::AlreadyStarted)));
        assert!(matches!(
            chain.set_block_history(0, Vec::new()),
            Err(EngineError::AlreadyStarted)
        ));

        chain.stop().await.unwrap();
        assert!(!chain.is_producing());
        assert!(matches!(
            chain.init_module("staking").await,
            Err(EngineError::UnknownModule(_))
        ));
    }

    #[test]
    fn test_derived_ids_differ_per_segment() {
        let chain_id = ChainId::from("alpha");
        assert_ne!(
            derive_block_id(&chain_id, 0, 5),
            derive_block_id(&chain_id, 1, 5)
        );
        assert_eq!(
            derive_block_id(&chain_id, 0, 5),
            derive_block_id(&chain_id, 0, 5)
        );
    }
}
