//! Modbus polling service
//!
//! Loads a site configuration, builds one engine per device and polls them
//! until shutdown. Reports flow from the poll tasks to a single sink over an
//! mpsc channel.

pub mod config;
pub mod driver;
pub mod poller;
pub mod registry;
pub mod report;
pub mod sink;

use config::SiteConfig;
use driver::DriverCache;
use errors::{GatewayError, GatewayResult};
use futures::future::join_all;
use poller::PollExit;
use registry::EngineRegistry;
use sink::ReportSink;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Reports buffered between poll tasks and the sink
pub const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Poll every device of `site` until `cancel` fires or every device retires
pub async fn run(
    site: SiteConfig,
    registry: EngineRegistry,
    cancel: CancellationToken,
) -> GatewayResult<()> {
    if registry.is_empty() {
        return Err(GatewayError::StartupFailed("no devices to poll".to_string()));
    }

    let (tx, rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
    let sink = tokio::spawn(ReportSink::new(site.site.clone(), rx).run());

    let tasks = poller::spawn_all(registry.into_devices(), &site.polling, &tx, &cancel);
    drop(tx);
    info!("Polling {} devices", tasks.len());

    let (serials, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let mut retired = 0;
    for (serial, result) in serials.iter().zip(join_all(handles).await) {
        match result {
            Ok(PollExit::Retired) => retired += 1,
            Ok(exit) => info!("{} stopped: {:?}", serial, exit),
            Err(e) => error!("{}", GatewayError::Internal(format!("{} task: {}", serial, e))),
        }
    }

    let stats = sink
        .await
        .map_err(|e| GatewayError::Internal(format!("sink task: {}", e)))?;
    info!(
        "Stopped: {} reports, {} retired devices",
        stats.reports, retired
    );
    Ok(())
}

/// Load drivers and build the registry for `site`
pub fn prepare(site: &SiteConfig) -> GatewayResult<(DriverCache, EngineRegistry)> {
    let mut drivers = DriverCache::new();
    drivers.load_site(site)?;
    let registry = EngineRegistry::build(site, &mut drivers)?;
    Ok((drivers, registry))
}
