use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcClientError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },
    #[error("Invalid response from {url}: {source}")]
    InvalidResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl RpcClientError {
    // HTTP status reported by the chain, if the server answered
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}
