//! Service startup helpers
//!
//! Startup banner and logging setup driven by [`ServiceArgs`].

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};
use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    /// Package version of the calling service
    pub version: String,
    pub description: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    /// Per-service log directory under `root`
    pub fn log_dir(&self, root: &std::path::Path) -> std::path::PathBuf {
        root.join(&self.name)
    }
}

pub fn print_startup_banner(service: &ServiceInfo) {
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Initialize logging for a service from its command-line arguments
///
/// Files go to `<log_dir>/<service>/` when a log directory is given.
pub fn init_logging(
    service: &ServiceInfo,
    args: &ServiceArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig {
        service_name: service.name.clone(),
        log_dir: args.log_dir.as_deref().map(|root| service.log_dir(root)),
        level: args.parse_log_level(),
        enable_json: args.json_logs,
    };
    logging::init_with_config(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_log_dir_is_per_service() {
        let service = ServiceInfo::new("pollsrv", "0.1.0", "poller");
        assert_eq!(
            service.log_dir(Path::new("/var/log/gateway")),
            Path::new("/var/log/gateway/pollsrv")
        );
    }
}
