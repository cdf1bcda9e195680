//! Shared service plumbing
//!
//! Provides the functions every gateway service needs at startup:
//! - logging initialization
//! - command-line arguments (`cli` feature)
//! - startup banner
//! - shutdown signal handling

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;

// Re-export CLI dependencies when cli feature is enabled
#[cfg(feature = "cli")]
pub use clap;

#[cfg(feature = "cli")]
pub use clap::{Args, Parser};
