//! Polling service entry point

use std::path::PathBuf;

use clap::Parser;
use common::service_bootstrap::{self, ServiceInfo};
use common::ServiceArgs;
use errors::{GatewayError, GatewayResult};
use pollsrv::config::SiteConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Modbus polling service")]
struct Args {
    /// Site configuration file (YAML or JSON)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "POLLSRV_CONFIG",
        default_value = "config/pollsrv.yaml"
    )]
    config: PathBuf,

    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let args = Args::parse();

    let service_info = ServiceInfo::new(
        "pollsrv",
        env!("CARGO_PKG_VERSION"),
        "Modbus register polling service",
    );
    service_bootstrap::init_logging(&service_info, &args.service)
        .map_err(|e| GatewayError::StartupFailed(format!("logging: {}", e)))?;
    service_bootstrap::print_startup_banner(&service_info);

    let site = SiteConfig::load(&args.config)?;
    site.validate()?;
    let (drivers, registry) = pollsrv::prepare(&site)?;
    info!(
        "Site {}/{}: {} devices, {} drivers",
        site.site.tenant,
        site.site.location,
        registry.len(),
        drivers.len()
    );

    // Validation mode: validate and exit
    if args.service.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let listener = common::shutdown::cancel_on_shutdown(cancel.clone());
    let result = pollsrv::run(site, registry, cancel.clone()).await;
    cancel.cancel();
    if let Err(e) = listener.await {
        warn!("Shutdown listener failed: {}", e);
    }

    info!("pollsrv stopped");
    result
}
