//! Device engines for a site
//!
//! TCP devices each get their own connection. Every RTU device of the site
//! shares one serial bus, so requests on the line are serialized.

use crate::config::{DeviceConfig, PollingConfig, Protocol, SerialConfig, SiteConfig};
use crate::driver::DriverCache;
use errors::{config_error, GatewayResult};
use modbus_driver::{BusHandle, DeviceEngine, RtuTransport, TcpParams, TcpTransport};
use std::time::Duration;
use tracing::info;

/// Creates the bus a device talks through
pub trait BusFactory {
    fn tcp(&mut self, device: &DeviceConfig, host: &str, timeout: Duration) -> BusHandle;

    /// Called once per site, the handle is cloned into every RTU engine
    fn serial(&mut self, serial: &SerialConfig) -> BusHandle;
}

/// Real TCP sockets and serial ports
#[derive(Debug, Default)]
pub struct WireBuses;

impl BusFactory for WireBuses {
    fn tcp(&mut self, device: &DeviceConfig, host: &str, timeout: Duration) -> BusHandle {
        BusHandle::dedicated(TcpTransport::new(TcpParams::new(
            host,
            device.port,
            timeout,
        )))
    }

    fn serial(&mut self, serial: &SerialConfig) -> BusHandle {
        BusHandle::shared(RtuTransport::new(serial.params()))
    }
}

/// One configured device and its engine
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub config: DeviceConfig,
    pub engine: DeviceEngine,
}

#[derive(Debug, Default)]
pub struct EngineRegistry {
    devices: Vec<DeviceEntry>,
    serial_bus: Option<BusHandle>,
}

impl EngineRegistry {
    /// Engines over real transports
    pub fn build(site: &SiteConfig, drivers: &mut DriverCache) -> GatewayResult<Self> {
        Self::build_with(site, drivers, &mut WireBuses)
    }

    pub fn build_with(
        site: &SiteConfig,
        drivers: &mut DriverCache,
        buses: &mut dyn BusFactory,
    ) -> GatewayResult<Self> {
        let mut registry = Self::default();
        for device in &site.devices {
            let bus = match device.protocol {
                Protocol::Tcp => {
                    let host = device.host.as_deref().ok_or_else(|| {
                        config_error!("{}: TCP device without host", device.serial_number)
                    })?;
                    buses.tcp(device, host, site.polling.timeout())
                },
                Protocol::Rtu => registry.serial_bus(site, buses)?,
            };
            registry.add(device, bus, drivers, &site.polling)?;
        }
        info!(
            "Registry: {} devices, serial bus {}",
            registry.devices.len(),
            if registry.serial_bus.is_some() {
                "in use"
            } else {
                "unused"
            }
        );
        Ok(registry)
    }

    fn serial_bus(
        &mut self,
        site: &SiteConfig,
        buses: &mut dyn BusFactory,
    ) -> GatewayResult<BusHandle> {
        if let Some(bus) = &self.serial_bus {
            return Ok(bus.clone());
        }
        let serial = site
            .serial
            .as_ref()
            .ok_or_else(|| config_error!("RTU devices configured without a serial section"))?;
        let bus = buses.serial(serial);
        self.serial_bus = Some(bus.clone());
        Ok(bus)
    }

    fn add(
        &mut self,
        device: &DeviceConfig,
        bus: BusHandle,
        drivers: &mut DriverCache,
        polling: &PollingConfig,
    ) -> GatewayResult<()> {
        let schema = drivers.load(&device.driver)?;
        let engine = DeviceEngine::with_config(
            device.slave_id,
            schema,
            polling.decoder.strategy(),
            bus,
            polling.engine_config(),
        );
        info!(
            "Device {} ({}) slave {} on {}",
            device.serial_number,
            device.model,
            device.slave_id,
            engine.bus().label()
        );
        self.devices.push(DeviceEntry {
            config: device.clone(),
            engine,
        });
        Ok(())
    }

    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<DeviceEntry> {
        self.devices
    }

    pub fn get(&self, serial_number: &str) -> Option<&DeviceEntry> {
        self.devices
            .iter()
            .find(|d| d.config.serial_number == serial_number)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
