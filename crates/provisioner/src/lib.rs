pub mod archive;
pub mod bootstrap;
mod checks;
mod cli;
pub mod config;
mod console;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod readiness;
pub mod resources;
pub mod retry;
pub mod runner;
pub mod ssh_keys;
pub mod state;
pub mod terraform;
mod utils;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use cli::Cli;
pub use config::ProvisionerConfig;
pub use error::ProvisionError;
pub use orchestrator::{Action, Job, JobInput, Provisioner};
pub use utils::logging::{setup_logging, LokiShutdown};
