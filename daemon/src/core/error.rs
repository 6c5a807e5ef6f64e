use crate::rpc::EndpointError;
use mockchain_common::api::ChainId;
use thiserror::Error;

/// Errors raised by a chain engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown module '{0}'")]
    UnknownModule(String),

    #[error("Module '{module}' failed to initialize: {reason}")]
    ModuleInit { module: String, reason: String },

    #[error("Block production is already started")]
    AlreadyStarted,

    #[error("Segment {index} is out of range, the chain has {segments} segments")]
    InvalidSegment { index: usize, segments: usize },

    #[error("Block production task failed: {0}")]
    Stop(String),
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Chain '{0}' already exists")]
    DuplicateChain(ChainId),

    #[error("Chain '{0}' not found")]
    NotFound(ChainId),

    #[error("Chain '{chain_id}' failed to initialize module '{module}': {source}")]
    ModuleInit {
        chain_id: ChainId,
        module: String,
        #[source]
        source: EngineError,
    },

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("No free port available: {0}")]
    PortExhausted(#[source] std::io::Error),

    #[error("Invalid chain configuration: {0}")]
    InvalidChainConfig(String),

    #[error("Controller is stopping, no chain can be created")]
    Stopping,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("Teardown of chain '{chain_id}' failed: {}", join_errors(.errors))]
    Teardown {
        chain_id: ChainId,
        errors: Vec<ControllerError>,
    },

    #[error("Full stop failed for {} chain(s): {}", .0.len(), join_errors(.0))]
    FullStop(Vec<ControllerError>),
}

impl ControllerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregated_message() {
        let err = ControllerError::FullStop(vec![
            ControllerError::Teardown {
                chain_id: ChainId::from("alpha"),
                errors: vec![ControllerError::Engine(EngineError::Stop(
                    "boom".to_owned(),
                ))],
            },
            ControllerError::NotFound(ChainId::from("beta")),
        ]);

        assert_eq!(
            err.to_string(),
            "Full stop failed for 2 chain(s): Teardown of chain 'alpha' failed: \
             Block production task failed: boom; Chain 'beta' not found"
        );
    }
}
