use super::{
    engine::{ChainEngine, EngineParams, PauseCallback, SimulatedChain},
    error::EngineError,
    runtime::Endpoints,
};
use crate::rpc::{EndpointError, HttpEndpoint, NetworkEndpoint};
use mockchain_common::config::DEFAULT_BIND_HOST;
use std::sync::Arc;

/// Builds the engine and the endpoints of every chain a controller creates
pub trait ChainBackend: Send + Sync + 'static {
    type Engine: ChainEngine;
    type Endpoint: NetworkEndpoint;

    // Host the endpoints bind to, also used to probe free ports
    fn bind_host(&self) -> &str;

    fn create_engine(
        &self,
        params: EngineParams,
        on_pause: PauseCallback,
    ) -> Result<Self::Engine, EngineError>;

    fn create_endpoints(
        &self,
        engine: &Self::Engine,
        ship_port: u16,
        rpc_port: u16,
    ) -> Result<Endpoints<Self::Endpoint>, EndpointError>;
}

/// In-process chains served over actix-web
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    bind_host: String,
}

impl SimulatedBackend {
    pub fn new<H: Into<String>>(bind_host: H) -> Self {
        Self {
            bind_host: bind_host.into(),
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(DEFAULT_BIND_HOST)
    }
}

impl ChainBackend for SimulatedBackend {
    type Engine = SimulatedChain;
    type Endpoint = HttpEndpoint;

    fn bind_host(&self) -> &str {
        &self.bind_host
    }

    fn create_engine(
        &self,
        params: EngineParams,
        on_pause: PauseCallback,
    ) -> Result<Self::Engine, EngineError> {
        Ok(SimulatedChain::new(params, on_pause))
    }

    fn create_endpoints(
        &self,
        engine: &Self::Engine,
        ship_port: u16,
        rpc_port: u16,
    ) -> Result<Endpoints<Self::Endpoint>, EndpointError> {
        let state = engine.state();
        Ok(Endpoints {
            ship: HttpEndpoint::stream(self.bind_host.as_str(), ship_port, Arc::clone(state)),
            rpc: HttpEndpoint::query(self.bind_host.as_str(), rpc_port, Arc::clone(state)),
        })
    }
}
