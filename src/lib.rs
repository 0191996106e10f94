pub mod collectors;
pub mod command;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod server;
