mod endpoint;
pub mod control;
pub mod query;
pub mod stream;

pub use endpoint::{EndpointKind, HttpEndpoint};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Cannot bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Port {0} was not released after closing its server")]
    PortNotReleased(u16),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("No endpoints are attached to chain '{0}'")]
    NotAttached(String),
}

/// A listening interface of a chain bound to one host port
#[async_trait]
pub trait NetworkEndpoint: Send + Sync + 'static {
    // Start accepting connections, a no-op when already listening
    async fn listen(&mut self) -> Result<(), EndpointError>;

    // Resolves once every connection is dropped and the port can be bound again
    async fn close(&mut self) -> Result<(), EndpointError>;

    fn get_port(&self) -> u16;

    fn is_listening(&self) -> bool;
}
