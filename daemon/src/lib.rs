// Mockchain daemon library
// Exposes the controller and its collaborators for the binary and the tests

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod core;
pub mod rpc;
