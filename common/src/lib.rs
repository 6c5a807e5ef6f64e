pub mod api;
pub mod block;
pub mod config;
pub mod crypto;
pub mod time;

#[cfg(feature = "logger")]
pub mod logger;

#[cfg(feature = "rpc-client")]
pub mod rpc;
