use super::{
    backend::{ChainBackend, SimulatedBackend},
    engine::{ChainEngine, EngineParams},
    error::ControllerError,
    resolver::{resolve_chain, ChainPlan, ResourceLedger, SharedLedger},
    runtime::{ChainNetwork, ChainRuntime},
};
use futures::future::join_all;
use log::{debug, error, info, warn};
use mockchain_common::{
    api::{ChainDescriptor, ChainId, NewChainInfo},
    rpc::ChainRpcClient,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Owns every simulated chain of the process
pub struct Controller<B: ChainBackend = SimulatedBackend> {
    backend: B,
    chains: RwLock<HashMap<ChainId, Arc<ChainRuntime<B>>>>,
    ledger: SharedLedger,
    // Number of full stops in flight
    stopping: AtomicUsize,
}

// Counts one full stop for as long as it lives
struct StopGuard<'a>(&'a AtomicUsize);

impl<'a> StopGuard<'a> {
    fn enter(stopping: &'a AtomicUsize) -> Self {
        stopping.fetch_add(1, Ordering::SeqCst);
        Self(stopping)
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Controller<SimulatedBackend> {
    pub fn new() -> Self {
        Self::with_backend(SimulatedBackend::default())
    }
}

impl Default for Controller<SimulatedBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ChainBackend> Controller<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            chains: RwLock::new(HashMap::new()),
            ledger: Arc::new(Mutex::new(ResourceLedger::default())),
            stopping: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst) > 0
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.read().keys().cloned().collect()
    }

    pub fn get_runtime<I: AsRef<str>>(
        &self,
        chain_id: I,
    ) -> Result<Arc<ChainRuntime<B>>, ControllerError> {
        let chain_id = chain_id.as_ref();
        self.chains
            .read()
            .get(chain_id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(ChainId::from(chain_id)))
    }

    /// Query client bound to the chain's query endpoint
    pub fn get_rpc<I: AsRef<str>>(&self, chain_id: I) -> Result<ChainRpcClient, ControllerError> {
        let runtime = self.get_runtime(chain_id)?;
        Ok(ChainRpcClient::new(
            runtime.info().rpc_url(self.backend.bind_host()),
        ))
    }

    // Modules, schedules, history and transactions, in that order
    async fn prepare_engine(
        &self,
        engine: &mut B::Engine,
        info: &NewChainInfo,
        plan: &mut ChainPlan,
    ) -> Result<(), ControllerError> {
        for module in &info.modules {
            engine
                .init_module(module)
                .await
                .map_err(|source| ControllerError::ModuleInit {
                    chain_id: info.chain_id.clone(),
                    module: module.clone(),
                    source,
                })?;
        }

        engine.set_jumps(info.jumps.clone());
        engine.set_pauses(info.pauses.clone());
        for (segment, hashes) in plan.take_block_history(info).into_iter().enumerate() {
            engine.set_block_history(segment, hashes)?;
        }
        engine.set_transactions(std::mem::take(&mut plan.transactions));
        Ok(())
    }

    // Undo a partially created chain, the reservation releases the ledger claims
    async fn rollback(
        &self,
        chain_id: &ChainId,
        engine: &mut B::Engine,
        network: &ChainNetwork<B::Endpoint>,
    ) {
        if let Err(e) = engine.stop().await {
            error!("Chain {}: cannot stop engine during rollback: {}", chain_id, e);
        }
        if let Err(e) = network.retire().await {
            error!("Chain {}: cannot close endpoints during rollback: {}", chain_id, e);
        }
    }

    /// Resolve, build and register a new chain.
    /// The chain is left in the `Created` state with its network down.
    pub async fn initialize_chain(
        &self,
        descriptor: ChainDescriptor,
    ) -> Result<NewChainInfo, ControllerError> {
        if self.is_stopping() {
            return Err(ControllerError::Stopping);
        }

        let (info, mut plan, reservation) =
            resolve_chain(descriptor, &self.ledger, self.backend.bind_host())?;
        let chain_id = info.chain_id.clone();
        debug!(
            "Chain {}: resolved with ports {} / {}",
            chain_id, info.ship_port, info.rpc_port
        );

        let network: Arc<ChainNetwork<B::Endpoint>> = ChainNetwork::new(chain_id.clone());
        let mut engine = self.backend.create_engine(
            EngineParams::from(&info),
            ChainNetwork::pause_callback(&network),
        )?;

        if let Err(e) = self.prepare_engine(&mut engine, &info, &mut plan).await {
            self.rollback(&chain_id, &mut engine, &network).await;
            return Err(e);
        }

        match self
            .backend
            .create_endpoints(&engine, info.ship_port, info.rpc_port)
        {
            Ok(endpoints) => network.attach(endpoints).await,
            Err(e) => {
                self.rollback(&chain_id, &mut engine, &network).await;
                return Err(e.into());
            }
        }

        if let Err(e) = engine.start() {
            self.rollback(&chain_id, &mut engine, &network).await;
            return Err(e.into());
        }

        let runtime = Arc::new(ChainRuntime::new(info.clone(), engine, network));
        let registered = {
            let mut chains = self.chains.write();
            // A full stop may have started while this chain was built
            if self.is_stopping() {
                false
            } else {
                chains.insert(chain_id.clone(), Arc::clone(&runtime));
                true
            }
        };

        if !registered {
            if let Err(e) = runtime.stop_engine().await {
                error!("Chain {}: cannot stop engine during rollback: {}", chain_id, e);
            }
            if let Err(e) = runtime.network().retire().await {
                error!("Chain {}: cannot close endpoints during rollback: {}", chain_id, e);
            }
            return Err(ControllerError::Stopping);
        }

        reservation.commit();
        info!(
            "Chain {} created: blocks {} to {}, stream on {}, query on {}",
            chain_id, info.start_block, info.end_block, info.ship_port, info.rpc_port
        );
        Ok(info)
    }

    pub async fn chain_network_up<I: AsRef<str>>(
        &self,
        chain_id: I,
    ) -> Result<(), ControllerError> {
        self.get_runtime(chain_id)?.network().up().await
    }

    pub async fn chain_network_down<I: AsRef<str>>(
        &self,
        chain_id: I,
    ) -> Result<(), ControllerError> {
        self.get_runtime(chain_id)?.network().down().await
    }

    /// Stop the engine, close the network, then forget the chain.
    /// Every step runs even if an earlier one failed.
    pub async fn destroy_chain<I: AsRef<str>>(&self, chain_id: I) -> Result<(), ControllerError> {
        let runtime = self.get_runtime(chain_id)?;
        let chain_id = runtime.chain_id().clone();
        info!("Chain {}: destroying", chain_id);

        let mut errors: Vec<ControllerError> = Vec::new();
        if let Err(e) = runtime.stop_engine().await {
            error!("Chain {}: engine stop failed: {}", chain_id, e);
            errors.push(e.into());
        }
        if let Err(e) = runtime.network().retire().await {
            error!("Chain {}: network teardown failed: {}", chain_id, e);
            errors.push(e);
        }

        self.chains.write().remove(&chain_id);
        self.ledger.lock().release(&chain_id, runtime.ports());

        if errors.is_empty() {
            info!("Chain {} destroyed", chain_id);
            Ok(())
        } else {
            Err(ControllerError::Teardown { chain_id, errors })
        }
    }

    /// Destroy every chain concurrently and report all failures together
    pub async fn full_stop(&self) -> Result<(), ControllerError> {
        let guard = StopGuard::enter(&self.stopping);
        let chain_ids = self.chain_ids();
        info!("Full stop of {} chain(s)", chain_ids.len());

        let results =
            join_all(chain_ids.iter().map(|chain_id| self.destroy_chain(chain_id))).await;
        let errors: Vec<ControllerError> = results
            .into_iter()
            .filter_map(Result::err)
            // Destroyed concurrently by another caller
            .filter(|e| !e.is_not_found())
            .collect();

        drop(guard);
        if errors.is_empty() {
            info!("Full stop complete");
            Ok(())
        } else {
            warn!("Full stop complete with {} failure(s)", errors.len());
            Err(ControllerError::FullStop(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stopping_until_last_full_stop_ends() {
        let controller = Controller::new();
        assert!(!controller.is_stopping());

        let first = StopGuard::enter(&controller.stopping);
        let second = StopGuard::enter(&controller.stopping);
        drop(first);
        assert!(controller.is_stopping());
        assert!(matches!(
            controller.initialize_chain(ChainDescriptor::new()).await,
            Err(ControllerError::Stopping)
        ));

        drop(second);
        assert!(!controller.is_stopping());
        // A full stop on an empty controller clears its own count
        controller.full_stop().await.unwrap();
        assert!(!controller.is_stopping());
    }
}
