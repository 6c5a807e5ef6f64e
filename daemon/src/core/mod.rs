pub mod backend;
pub mod controller;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod runtime;

pub use backend::{ChainBackend, SimulatedBackend};
pub use controller::Controller;
pub use error::{ControllerError, EngineError};
pub use runtime::{ChainNetwork, ChainRuntime, Endpoints, RuntimeState};
