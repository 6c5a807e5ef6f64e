use super::error::ControllerError;
use log::{debug, trace};
use mockchain_common::{
    api::{ActionDescriptor, BlockSource, ChainDescriptor, ChainId, Jump, NewChainInfo, Pause},
    block::{generate_block_history, BlockNumber, Segment},
    config::{
        default_abi, DEFAULT_BLOCK_INTERVAL_MS, DEFAULT_BLOCK_RANGE, DEFAULT_START_BLOCK,
        MAX_MATERIALIZED_BLOCKS,
    },
    time::{get_current_time_in_millis, next_block_aligned_timestamp},
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashSet},
    io::{Error as IoError, ErrorKind},
    net::TcpListener,
    sync::Arc,
};

// OS probes before giving up on finding an unclaimed port
const MAX_PORT_PROBES: usize = 64;

/// Identifiers and ports held by live chains and by creations in flight
#[derive(Debug, Default)]
pub struct ResourceLedger {
    chain_ids: HashSet<ChainId>,
    ports: HashSet<u16>,
}

impl ResourceLedger {
    pub fn is_chain_id_claimed(&self, chain_id: &ChainId) -> bool {
        self.chain_ids.contains(chain_id)
    }

    pub fn is_port_claimed(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    pub fn claimed_ports(&self) -> usize {
        self.ports.len()
    }

    pub fn release(&mut self, chain_id: &ChainId, ports: [u16; 2]) {
        self.chain_ids.remove(chain_id);
        for port in ports {
            self.ports.remove(&port);
        }
    }

    fn claim(&mut self, chain_id: ChainId, ports: [u16; 2]) {
        self.chain_ids.insert(chain_id);
        self.ports.extend(ports);
    }
}

pub type SharedLedger = Arc<Mutex<ResourceLedger>>;

/// Claims of a chain being created, released on drop unless committed
#[must_use]
pub struct Reservation {
    ledger: SharedLedger,
    chain_id: ChainId,
    ports: [u16; 2],
    committed: bool,
}

impl Reservation {
    // Claims now belong to the registered chain
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Releasing claims of chain {}", self.chain_id);
            self.ledger.lock().release(&self.chain_id, self.ports);
        }
    }
}

/// Resolved inputs of a chain that are not part of its public record
#[derive(Debug, Default)]
pub struct ChainPlan {
    blocks: Option<Vec<Segment>>,
    pub transactions: BTreeMap<BlockNumber, Vec<ActionDescriptor>>,
}

impl ChainPlan {
    /// Block history per segment: explicit, generated, or empty when the
    /// engine derives ids itself
    pub fn take_block_history(&mut self, info: &NewChainInfo) -> Vec<Segment> {
        match info.block_source {
            BlockSource::Empty => Vec::new(),
            BlockSource::Explicit => self.blocks.take().unwrap_or_default(),
            BlockSource::Generated(strategy) => {
                generate_block_history(strategy, info.range_size(), info.segments)
            }
        }
    }
}

fn invalid<S: Into<String>>(reason: S) -> ControllerError {
    ControllerError::InvalidChainConfig(reason.into())
}

fn validate_jumps(
    jumps: &[Jump],
    start_block: BlockNumber,
    end_block: BlockNumber,
) -> Result<(), ControllerError> {
    // Production restarts at the resume block after each jump
    let mut reachable_from = start_block;
    for (index, jump) in jumps.iter().enumerate() {
        if jump.magnitude == 0 {
            return Err(invalid(format!("jump #{} has a zero magnitude", index)));
        }
        if jump.position < start_block || jump.position > end_block {
            return Err(invalid(format!(
                "jump #{} at block {} is outside [{}, {}]",
                index, jump.position, start_block, end_block
            )));
        }
        if jump.position < reachable_from {
            return Err(invalid(format!(
                "jump #{} at block {} is never reached, production resumes at {}",
                index, jump.position, reachable_from
            )));
        }
        reachable_from = jump.resume_block(start_block);
    }
    Ok(())
}

fn validate_pauses(
    pauses: &[Pause],
    start_block: BlockNumber,
    end_block: BlockNumber,
) -> Result<(), ControllerError> {
    let mut positions = HashSet::with_capacity(pauses.len());
    for pause in pauses {
        if !positions.insert(pause.position) {
            return Err(invalid(format!(
                "more than one pause scheduled at block {}",
                pause.position
            )));
        }
        if pause.duration_ms == 0 {
            return Err(invalid(format!(
                "pause at block {} has a zero duration",
                pause.position
            )));
        }
        if pause.position < start_block || pause.position > end_block {
            return Err(invalid(format!(
                "pause at block {} is outside [{}, {}]",
                pause.position, start_block, end_block
            )));
        }
    }
    Ok(())
}

fn validate_blocks(
    blocks: &[Segment],
    segments: usize,
    range_size: usize,
) -> Result<(), ControllerError> {
    if blocks.len() != segments {
        return Err(invalid(format!(
            "{} block segments were provided, {} are required",
            blocks.len(),
            segments
        )));
    }
    if let Some((index, segment)) = blocks
        .iter()
        .enumerate()
        .find(|(_, segment)| segment.len() != range_size)
    {
        return Err(invalid(format!(
            "segment #{} has {} blocks, {} are required",
            index,
            segment.len(),
            range_size
        )));
    }
    Ok(())
}

// Ask the OS for a free port until one is not claimed by another chain
fn probe_free_port(
    host: &str,
    ledger: &ResourceLedger,
    taken: &[u16],
) -> Result<u16, ControllerError> {
    for _ in 0..MAX_PORT_PROBES {
        let listener = TcpListener::bind((host, 0)).map_err(ControllerError::PortExhausted)?;
        let port = listener
            .local_addr()
            .map_err(ControllerError::PortExhausted)?
            .port();
        if !ledger.is_port_claimed(port) && !taken.contains(&port) {
            trace!("Probed free port {}", port);
            return Ok(port);
        }
    }

    Err(ControllerError::PortExhausted(IoError::new(
        ErrorKind::AddrInUse,
        format!("{} probed ports were all claimed", MAX_PORT_PROBES),
    )))
}

/// Fill in every default of a descriptor, validate it and claim its
/// identifier and ports in the ledger
pub fn resolve_chain(
    descriptor: ChainDescriptor,
    ledger: &SharedLedger,
    host: &str,
) -> Result<(NewChainInfo, ChainPlan, Reservation), ControllerError> {
    let start_block = descriptor.start_block.unwrap_or(DEFAULT_START_BLOCK);
    let end_block = match descriptor.end_block {
        Some(end_block) => end_block,
        None => start_block
            .checked_add(DEFAULT_BLOCK_RANGE - 1)
            .ok_or_else(|| invalid("start block is too high"))?,
    };
    if end_block < start_block {
        return Err(invalid(format!(
            "end block {} is below start block {}",
            end_block, start_block
        )));
    }
    let range_size = usize::try_from(end_block - start_block)
        .ok()
        .and_then(|size| size.checked_add(1))
        .ok_or_else(|| invalid("block range is too large"))?;

    let block_interval_ms = descriptor
        .block_interval_ms
        .unwrap_or(DEFAULT_BLOCK_INTERVAL_MS);
    if block_interval_ms == 0 {
        return Err(invalid("block interval must be positive"));
    }

    validate_jumps(&descriptor.jumps, start_block, end_block)?;
    validate_pauses(&descriptor.pauses, start_block, end_block)?;
    if let Some(block_num) = descriptor
        .transactions
        .keys()
        .find(|block_num| **block_num < start_block || **block_num > end_block)
    {
        return Err(invalid(format!(
            "transactions scripted for block {} outside [{}, {}]",
            block_num, start_block, end_block
        )));
    }

    let segments = descriptor.jumps.len() + 1;
    let block_source = match (&descriptor.blocks, descriptor.block_generation) {
        (Some(blocks), _) => {
            validate_blocks(blocks, segments, range_size)?;
            BlockSource::Explicit
        }
        (None, Some(strategy)) => {
            let total = range_size
                .checked_mul(segments)
                .filter(|total| *total <= MAX_MATERIALIZED_BLOCKS);
            if total.is_none() {
                return Err(invalid(format!(
                    "generating {} blocks on {} segments exceeds {} blocks",
                    range_size, segments, MAX_MATERIALIZED_BLOCKS
                )));
            }
            BlockSource::Generated(strategy)
        }
        (None, None) => BlockSource::Empty,
    };

    let start_time = descriptor.start_time.unwrap_or_else(|| {
        next_block_aligned_timestamp(get_current_time_in_millis(), block_interval_ms)
    });

    // Everything below runs under the ledger lock
    let mut guard = ledger.lock();

    let chain_id = match descriptor.chain_id {
        Some(chain_id) if guard.is_chain_id_claimed(&chain_id) => {
            return Err(ControllerError::DuplicateChain(chain_id));
        }
        Some(chain_id) => chain_id,
        None => loop {
            let chain_id = ChainId::random();
            if !guard.is_chain_id_claimed(&chain_id) {
                break chain_id;
            }
        },
    };

    for port in [descriptor.ship_port, descriptor.rpc_port].into_iter().flatten() {
        if guard.is_port_claimed(port) {
            return Err(ControllerError::PortInUse(port));
        }
    }
    let ship_port = match descriptor.ship_port {
        Some(port) => port,
        None => {
            let taken: Vec<u16> = descriptor.rpc_port.into_iter().collect();
            probe_free_port(host, &guard, &taken)?
        }
    };
    let rpc_port = match descriptor.rpc_port {
        Some(port) => port,
        None => probe_free_port(host, &guard, &[ship_port])?,
    };
    if ship_port == rpc_port {
        return Err(ControllerError::PortInUse(rpc_port));
    }

    let ports = [ship_port, rpc_port];
    guard.claim(chain_id.clone(), ports);
    drop(guard);

    let reservation = Reservation {
        ledger: Arc::clone(ledger),
        chain_id: chain_id.clone(),
        ports,
        committed: false,
    };

    let info = NewChainInfo {
        chain_id,
        ship_port,
        rpc_port,
        start_time,
        block_interval_ms,
        start_block,
        end_block,
        abi: descriptor.abi.unwrap_or_else(default_abi),
        pacing: descriptor.pacing.unwrap_or_default(),
        block_source,
        segments,
        jumps: descriptor.jumps,
        pauses: descriptor.pauses,
        modules: descriptor.modules,
    };
    let plan = ChainPlan {
        blocks: descriptor.blocks,
        transactions: descriptor.transactions,
    };

    Ok((info, plan, reservation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockchain_common::{
        api::PacingMode,
        block::BlockGenerationStrategy,
        config::DEFAULT_BIND_HOST,
    };

    fn ledger() -> SharedLedger {
        Arc::new(Mutex::new(ResourceLedger::default()))
    }

    #[test]
    fn test_defaults() {
        let ledger = ledger();
        let (info, mut plan, _reservation) =
            resolve_chain(ChainDescriptor::new(), &ledger, DEFAULT_BIND_HOST).unwrap();

        assert_eq!(info.chain_id.as_str().len(), 64);
        assert_ne!(info.ship_port, info.rpc_port);
        assert_eq!(info.block_interval_ms, DEFAULT_BLOCK_INTERVAL_MS);
        assert_eq!(info.start_block, 1);
        assert_eq!(info.end_block, 1000);
        assert_eq!(info.start_time % DEFAULT_BLOCK_INTERVAL_MS, 0);
        assert_eq!(info.pacing, PacingMode::RealTime);
        assert_eq!(info.abi, default_abi());
        assert_eq!(info.block_source, BlockSource::Empty);
        assert_eq!(info.segments, 1);
        assert!(plan.take_block_history(&info).is_empty());
        assert!(plan.transactions.is_empty());

        let guard = ledger.lock();
        assert!(guard.is_chain_id_claimed(&info.chain_id));
        assert!(guard.is_port_claimed(info.ship_port));
        assert!(guard.is_port_claimed(info.rpc_port));
    }

    #[test]
    fn test_generated_history_per_jump() {
        let descriptor = ChainDescriptor::new()
            .with_block_range(0, 9)
            .with_jump(3, 2)
            .with_block_generation(BlockGenerationStrategy::InOrder);
        let (info, mut plan, _reservation) =
            resolve_chain(descriptor, &ledger(), DEFAULT_BIND_HOST).unwrap();

        assert_eq!(info.segments, 2);
        let history = plan.take_block_history(&info);
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|segment| segment.len() == 10));
    }

    #[test]
    fn test_reservation_released_on_drop() {
        let ledger = ledger();
        let descriptor = ChainDescriptor::new()
            .with_chain_id("alpha")
            .with_ports(40001, 40002);
        let (_, _, reservation) =
            resolve_chain(descriptor.clone(), &ledger, DEFAULT_BIND_HOST).unwrap();

        assert!(matches!(
            resolve_chain(descriptor.clone(), &ledger, DEFAULT_BIND_HOST),
            Err(ControllerError::DuplicateChain(_))
        ));
        assert!(matches!(
            resolve_chain(
                ChainDescriptor::new().with_ports(40002, 40003),
                &ledger,
                DEFAULT_BIND_HOST
            ),
            Err(ControllerError::PortInUse(40002))
        ));

        drop(reservation);
        assert_eq!(ledger.lock().claimed_ports(), 0);

        let (_, _, reservation) = resolve_chain(descriptor, &ledger, DEFAULT_BIND_HOST).unwrap();
        reservation.commit();
        assert_eq!(ledger.lock().claimed_ports(), 2);
    }

    #[test]
    fn test_probed_ports_skip_claims() {
        let ledger = ledger();
        let mut ports = HashSet::new();
        let mut reservations = Vec::new();
        for _ in 0..10 {
            let (info, _, reservation) =
                resolve_chain(ChainDescriptor::new(), &ledger, DEFAULT_BIND_HOST).unwrap();
            assert!(ports.insert(info.ship_port));
            assert!(ports.insert(info.rpc_port));
            reservations.push(reservation);
        }
        assert_eq!(ledger.lock().claimed_ports(), 20);
    }

    #[test]
    fn test_invalid_descriptors() {
        let ledger = ledger();
        let cases = vec![
            ChainDescriptor::new().with_block_range(10, 9),
            ChainDescriptor::new().with_block_range(1, 10).with_jump(11, 1),
            ChainDescriptor::new().with_block_range(1, 10).with_jump(5, 0),
            // Second jump sits before the resume point of the first
            ChainDescriptor::new()
                .with_block_range(1, 10)
                .with_jump(8, 2)
                .with_jump(3, 1),
            ChainDescriptor::new().with_block_range(1, 10).with_pause(0, 100),
            ChainDescriptor::new().with_block_range(1, 10).with_pause(5, 0),
            ChainDescriptor::new()
                .with_block_range(1, 10)
                .with_pause(5, 100)
                .with_pause(5, 200),
            ChainDescriptor::new()
                .with_block_range(1, u64::MAX)
                .with_block_generation(BlockGenerationStrategy::Random),
            ChainDescriptor::new()
                .with_block_range(1, MAX_MATERIALIZED_BLOCKS as u64 / 2 + 1)
                .with_jump(10, 1)
                .with_block_generation(BlockGenerationStrategy::InOrder),
            ChainDescriptor::new().with_block_interval(0),
            ChainDescriptor::new()
                .with_block_range(1, 3)
                .with_jump(2, 1)
                .with_blocks(vec![vec![mockchain_common::crypto::Hash::zero(); 3]]),
            ChainDescriptor::new()
                .with_block_range(1, 3)
                .with_blocks(vec![vec![mockchain_common::crypto::Hash::zero(); 2]]),
            ChainDescriptor::new().with_block_range(1, 3).with_action(
                4,
                ActionDescriptor::new("token", "issue", serde_json::Value::Null),
            ),
        ];

        for descriptor in cases {
            let result = resolve_chain(descriptor.clone(), &ledger, DEFAULT_BIND_HOST);
            assert!(
                matches!(result, Err(ControllerError::InvalidChainConfig(_))),
                "{:?} was accepted",
                descriptor
            );
        }
        // Rejected descriptors claim nothing
        assert_eq!(ledger.lock().claimed_ports(), 0);

        assert!(matches!(
            resolve_chain(
                ChainDescriptor::new().with_ports(40010, 40010),
                &ledger,
                DEFAULT_BIND_HOST
            ),
            Err(ControllerError::PortInUse(40010))
        ));
    }

    #[test]
    fn test_jump_on_max_block() {
        let descriptor = ChainDescriptor::new()
            .with_block_range(u64::MAX - 10, u64::MAX)
            .with_jump(u64::MAX - 5, 2)
            .with_jump(u64::MAX, 1);
        let (info, mut plan, _reservation) =
            resolve_chain(descriptor, &ledger(), DEFAULT_BIND_HOST).unwrap();

        assert_eq!(info.segments, 3);
        assert_eq!(info.jumps[1].resume_block(info.start_block), u64::MAX);
        assert!(plan.take_block_history(&info).is_empty());

        // Whole range without generated history is fine
        let descriptor = ChainDescriptor::new().with_block_range(1, u64::MAX);
        assert!(resolve_chain(descriptor, &ledger(), DEFAULT_BIND_HOST).is_ok());
    }

    #[test]
    fn test_explicit_blocks() {
        let blocks = vec![
            vec![mockchain_common::crypto::Hash::zero(); 3],
            vec![mockchain_common::crypto::Hash::max(); 3],
        ];
        let descriptor = ChainDescriptor::new()
            .with_block_range(5, 7)
            .with_jump(6, 1)
            .with_blocks(blocks.clone());
        let (info, mut plan, _reservation) =
            resolve_chain(descriptor, &ledger(), DEFAULT_BIND_HOST).unwrap();

        assert_eq!(info.block_source, BlockSource::Explicit);
        assert_eq!(plan.take_block_history(&info), blocks);
    }
}
