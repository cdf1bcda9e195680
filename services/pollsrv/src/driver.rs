//! Driver document loading
//!
//! Each driver file is read and validated once; devices of the same model
//! share the parsed schema.

use crate::config::{DeviceConfig, SiteConfig};
use errors::{GatewayError, GatewayResult};
use modbus_driver::{DriverSchema, RegisterKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct DriverCache {
    drivers: HashMap<PathBuf, Arc<DriverSchema>>,
}

impl DriverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed driver at `path`, loading it on first use
    pub fn load(&mut self, path: &Path) -> GatewayResult<Arc<DriverSchema>> {
        if let Some(schema) = self.drivers.get(path) {
            return Ok(Arc::clone(schema));
        }

        let bytes = std::fs::read(path).map_err(|e| {
            GatewayError::Configuration(format!("driver {}: {}", path.display(), e))
        })?;
        let schema = DriverSchema::from_slice(&bytes)
            .map(Arc::new)
            .map_err(|e| GatewayError::driver(path.display().to_string(), e))?;

        info!(
            "Driver loaded: {} ({} input, {} holding)",
            path.display(),
            schema.points(RegisterKind::Input).len(),
            schema.points(RegisterKind::Holding).len()
        );
        self.drivers.insert(path.to_path_buf(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Load every driver the site references
    pub fn load_site(&mut self, site: &SiteConfig) -> GatewayResult<()> {
        for device in &site.devices {
            let schema = self.load(&device.driver)?;
            check_selection(device, &schema);
        }
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<Arc<DriverSchema>> {
        self.drivers.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

/// Configured point names missing from the driver
///
/// They are still polled and come back as per-point errors.
pub fn undeclared_points(device: &DeviceConfig, schema: &DriverSchema) -> Vec<String> {
    let input = device
        .points
        .input_registers
        .iter()
        .filter(|name| !schema.points(RegisterKind::Input).contains(name));
    let holding = device
        .points
        .holding_registers
        .iter()
        .filter(|name| !schema.points(RegisterKind::Holding).contains(name));
    input.chain(holding).cloned().collect()
}

fn check_selection(device: &DeviceConfig, schema: &DriverSchema) {
    let missing = undeclared_points(device, schema);
    if !missing.is_empty() {
        warn!(
            "{}: {} points not in driver: {}",
            device.serial_number,
            missing.len(),
            missing.join(", ")
        );
    }
}
