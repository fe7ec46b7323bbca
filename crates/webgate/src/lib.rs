//! Host shim around the relay crates: config file, CLI, listener, and the
//! grant-administration endpoints a real host application would provide
//! through its own service layer.

pub mod cli;
pub mod config;
pub mod server;
