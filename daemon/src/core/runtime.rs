use super::{
    backend::ChainBackend,
    engine::{ChainEngine, PauseCallback},
    error::{ControllerError, EngineError},
};
use crate::rpc::{EndpointError, NetworkEndpoint};
use futures::FutureExt;
use log::{info, warn};
use mockchain_common::api::{ChainId, NewChainInfo};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::Mutex as AsyncMutex;

/// Lifecycle of a chain: Created -> Up <-> Down -> Destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    // Registered, endpoints never opened
    Created,
    Up,
    Down,
    Destroyed,
}

impl Display for RuntimeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Self::Created => "created",
            Self::Up => "up",
            Self::Down => "down",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{}", str)
    }
}

pub struct Endpoints<E> {
    pub ship: E,
    pub rpc: E,
}

#[derive(Debug)]
struct Lifecycle {
    state: RuntimeState,
    // Bumped on every transition
    epoch: u64,
}

/// Network half of a chain: its two endpoints and the up/down flag.
/// This is all a pause cycle can reach.
pub struct ChainNetwork<E: NetworkEndpoint> {
    chain_id: ChainId,
    endpoints: AsyncMutex<Option<Endpoints<E>>>,
    lifecycle: Mutex<Lifecycle>,
    // Serializes overlapping pause cycles
    pause_guard: AsyncMutex<()>,
}

impl<E: NetworkEndpoint> ChainNetwork<E> {
    pub fn new(chain_id: ChainId) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            endpoints: AsyncMutex::new(None),
            lifecycle: Mutex::new(Lifecycle {
                state: RuntimeState::Created,
                epoch: 0,
            }),
            pause_guard: AsyncMutex::new(()),
        })
    }

    /// Callback handed to the engine, it only keeps a weak handle on the network
    pub fn pause_callback(network: &Arc<Self>) -> PauseCallback {
        let network = Arc::downgrade(network);
        Arc::new(move |duration: Duration| {
            let network: Weak<Self> = network.clone();
            async move {
                if let Some(network) = network.upgrade() {
                    network.pause_cycle(duration).await;
                }
            }
            .boxed()
        })
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub async fn attach(&self, endpoints: Endpoints<E>) {
        *self.endpoints.lock().await = Some(endpoints);
    }

    pub fn state(&self) -> RuntimeState {
        self.lifecycle.lock().state
    }

    fn epoch(&self) -> u64 {
        self.lifecycle.lock().epoch
    }

    pub fn is_up(&self) -> bool {
        self.state() == RuntimeState::Up
    }

    // A destroyed network never comes back, returns the new epoch otherwise
    fn transition(&self, next: RuntimeState) -> Option<u64> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == RuntimeState::Destroyed {
            return None;
        }
        lifecycle.state = next;
        lifecycle.epoch = lifecycle.epoch.wrapping_add(1);
        Some(lifecycle.epoch)
    }

    fn not_found(&self) -> ControllerError {
        ControllerError::NotFound(self.chain_id.clone())
    }

    pub async fn ports(&self) -> Option<(u16, u16)> {
        self.endpoints
            .lock()
            .await
            .as_ref()
            .map(|endpoints| (endpoints.ship.get_port(), endpoints.rpc.get_port()))
    }

    /// Listening status of the stream and query endpoints
    pub async fn listening(&self) -> (bool, bool) {
        self.endpoints
            .lock()
            .await
            .as_ref()
            .map(|endpoints| (endpoints.ship.is_listening(), endpoints.rpc.is_listening()))
            .unwrap_or((false, false))
    }

    /// Open both endpoints, or none of them
    pub async fn up(&self) -> Result<(), ControllerError> {
        let mut guard = self.endpoints.lock().await;
        if self.state() == RuntimeState::Destroyed {
            return Err(self.not_found());
        }
        let endpoints = guard
            .as_mut()
            .ok_or_else(|| EndpointError::NotAttached(self.chain_id.to_string()))?;

        endpoints.ship.listen().await?;
        if let Err(e) = endpoints.rpc.listen().await {
            if let Err(close_err) = endpoints.ship.close().await {
                warn!(
                    "Chain {}: cannot close stream endpoint after failed start: {}",
                    self.chain_id, close_err
                );
            }
            return Err(e.into());
        }

        if self.transition(RuntimeState::Up).is_none() {
            return Err(self.not_found());
        }
        info!("Chain {}: network is up", self.chain_id);
        Ok(())
    }

    async fn close_endpoints(&self) -> Result<(), EndpointError> {
        let mut guard = self.endpoints.lock().await;
        let Some(endpoints) = guard.as_mut() else {
            return Ok(());
        };

        // Both are closed even if the first one fails
        let ship = endpoints.ship.close().await;
        let rpc = endpoints.rpc.close().await;
        ship.and(rpc)
    }

    /// Close both endpoints, resolves once both report closed
    pub async fn down(&self) -> Result<(), ControllerError> {
        self.take_down().await.map(|_| ())
    }

    async fn take_down(&self) -> Result<u64, ControllerError> {
        if self.state() == RuntimeState::Destroyed {
            return Err(self.not_found());
        }

        // Servers are stopped even when a port is not released in time
        let closed = self.close_endpoints().await;
        let epoch = self
            .transition(RuntimeState::Down)
            .ok_or_else(|| self.not_found())?;
        closed?;

        info!("Chain {}: network is down", self.chain_id);
        Ok(epoch)
    }

    /// Mark the network destroyed and close it for good
    pub async fn retire(&self) -> Result<(), ControllerError> {
        self.lifecycle.lock().state = RuntimeState::Destroyed;
        self.close_endpoints().await?;
        Ok(())
    }

    /// Take an up network down for `duration`, then bring it back up.
    /// A network that is not up, or that is moved by someone else while
    /// paused, is left as it is.
    pub async fn pause_cycle(&self, duration: Duration) {
        let _guard = self.pause_guard.lock().await;
        let state = self.state();
        if state != RuntimeState::Up {
            info!(
                "Chain {}: network is {}, skipping pause of {}ms",
                self.chain_id,
                state,
                duration.as_millis()
            );
            return;
        }

        info!(
            "Chain {}: pausing network for {}ms",
            self.chain_id,
            duration.as_millis()
        );
        let epoch = match self.take_down().await {
            Ok(epoch) => epoch,
            Err(e) => {
                warn!("Chain {}: pause cannot take network down: {}", self.chain_id, e);
                return;
            }
        };

        tokio::time::sleep(duration).await;

        if self.epoch() != epoch {
            info!(
                "Chain {}: network changed to {} during pause, leaving it",
                self.chain_id,
                self.state()
            );
            return;
        }
        match self.up().await {
            Ok(()) => info!("Chain {}: pause is over", self.chain_id),
            Err(e) => warn!("Chain {}: pause cannot bring network up: {}", self.chain_id, e),
        }
    }
}

/// One registered chain: its engine, its network half and its resolved record
pub struct ChainRuntime<B: ChainBackend> {
    info: NewChainInfo,
    engine: AsyncMutex<B::Engine>,
    network: Arc<ChainNetwork<B::Endpoint>>,
}

impl<B: ChainBackend> ChainRuntime<B> {
    pub fn new(
        info: NewChainInfo,
        engine: B::Engine,
        network: Arc<ChainNetwork<B::Endpoint>>,
    ) -> Self {
        Self {
            info,
            engine: AsyncMutex::new(engine),
            network,
        }
    }

    pub fn info(&self) -> &NewChainInfo {
        &self.info
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.info.chain_id
    }

    pub fn state(&self) -> RuntimeState {
        self.network.state()
    }

    pub fn is_up(&self) -> bool {
        self.network.is_up()
    }

    pub fn network(&self) -> &Arc<ChainNetwork<B::Endpoint>> {
        &self.network
    }

    pub fn ports(&self) -> [u16; 2] {
        [self.info.ship_port, self.info.rpc_port]
    }

    pub async fn stop_engine(&self) -> Result<(), EngineError> {
        self.engine.lock().await.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Instant;

    type EventLog = Arc<Mutex<Vec<String>>>;

    // Records listen and close calls, close can be made to fail
    struct RecordingEndpoint {
        name: &'static str,
        port: u16,
        listening: bool,
        fail_close: bool,
        events: EventLog,
    }

    #[async_trait]
    impl NetworkEndpoint for RecordingEndpoint {
        async fn listen(&mut self) -> Result<(), EndpointError> {
            self.listening = true;
            self.events.lock().push(format!("listen {}", self.name));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), EndpointError> {
            self.listening = false;
            self.events.lock().push(format!("close {}", self.name));
            if self.fail_close {
                return Err(EndpointError::PortNotReleased(self.port));
            }
            Ok(())
        }

        fn get_port(&self) -> u16 {
            self.port
        }

        fn is_listening(&self) -> bool {
            self.listening
        }
    }

    async fn network(fail_close: bool) -> (Arc<ChainNetwork<RecordingEndpoint>>, EventLog) {
        let events = EventLog::default();
        let endpoint = |name: &'static str, port: u16| RecordingEndpoint {
            name,
            port,
            listening: false,
            fail_close,
            events: Arc::clone(&events),
        };
        let network = ChainNetwork::new(ChainId::from("alpha"));
        network
            .attach(Endpoints {
                ship: endpoint("ship", 1),
                rpc: endpoint("rpc", 2),
            })
            .await;
        (network, events)
    }

    #[tokio::test]
    async fn test_overlapping_pauses_run_one_after_another() {
        let (network, events) = network(false).await;
        network.up().await.unwrap();
        events.lock().clear();

        let callback = ChainNetwork::pause_callback(&network);
        let started = Instant::now();
        tokio::join!(
            callback(Duration::from_millis(100)),
            callback(Duration::from_millis(100))
        );

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(network.state(), RuntimeState::Up);
        let cycle = ["close ship", "close rpc", "listen ship", "listen rpc"];
        let expected: Vec<String> = cycle
            .iter()
            .chain(cycle.iter())
            .map(|event| event.to_string())
            .collect();
        assert_eq!(*events.lock(), expected);
    }

    #[tokio::test]
    async fn test_pause_leaves_network_that_is_not_up() {
        let (network, events) = network(false).await;
        network.pause_cycle(Duration::from_millis(10)).await;
        assert_eq!(network.state(), RuntimeState::Created);

        network.up().await.unwrap();
        network.down().await.unwrap();
        events.lock().clear();
        network.pause_cycle(Duration::from_millis(10)).await;
        assert_eq!(network.state(), RuntimeState::Down);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_down_during_pause_is_kept() {
        let (network, _events) = network(false).await;
        network.up().await.unwrap();

        let pause = tokio::spawn({
            let network = Arc::clone(&network);
            async move { network.pause_cycle(Duration::from_millis(200)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(network.state(), RuntimeState::Down);
        network.down().await.unwrap();
        pause.await.unwrap();

        assert_eq!(network.state(), RuntimeState::Down);
        assert_eq!(network.listening().await, (false, false));
    }

    #[tokio::test]
    async fn test_failed_close_still_marks_network_down() {
        let (network, events) = network(true).await;
        network.up().await.unwrap();

        assert!(matches!(
            network.down().await,
            Err(ControllerError::Endpoint(EndpointError::PortNotReleased(1)))
        ));
        assert_eq!(network.state(), RuntimeState::Down);
        assert!(!network.is_up());
        // Both endpoints were asked to close
        let closes = events
            .lock()
            .iter()
            .filter(|event| event.starts_with("close"))
            .count();
        assert_eq!(closes, 2);
    }
}
