//! Bonded Device Discovery
//!
//! Picks the HxM out of the devices already paired with this host. No live
//! scan is performed: the HxM must be bonded at the OS level first.

use crate::domain::models::DeviceDescriptor;
use crate::domain::settings::SelectionPolicy;
use crate::infrastructure::bluetooth::error::{MonitorError, Result};
use tracing::{debug, info};

/// Name prefix every Zephyr HxM advertises
pub const DEFAULT_PREFIX: &str = "HXM";

/// Source of bonded devices (the platform adapter in production)
pub trait BondedDevices: Send + Sync {
    fn bonded_devices(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// Bonded devices listed in the settings file
pub struct SettingsRegistry {
    devices: Option<Vec<DeviceDescriptor>>,
}

impl SettingsRegistry {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices: Some(devices),
        }
    }

    /// A registry standing in for a host without a usable adapter
    pub fn unavailable() -> Self {
        Self { devices: None }
    }
}

impl BondedDevices for SettingsRegistry {
    fn bonded_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.devices.clone().ok_or_else(|| {
            MonitorError::AdapterUnavailable("no bonded device registry configured".to_string())
        })
    }
}

/// Return the first device whose name starts with `prefix` (case-sensitive).
pub fn select<'a, I>(devices: I, prefix: &str) -> Option<DeviceDescriptor>
where
    I: IntoIterator<Item = &'a DeviceDescriptor>,
{
    devices
        .into_iter()
        .find(|d| d.name.starts_with(prefix))
        .cloned()
}

#[derive(Debug, Clone)]
pub struct DeviceSelector {
    prefix: String,
    policy: SelectionPolicy,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, SelectionPolicy::FirstMatch)
    }
}

impl DeviceSelector {
    pub fn new(prefix: impl Into<String>, policy: SelectionPolicy) -> Self {
        Self {
            prefix: prefix.into(),
            policy,
        }
    }

    pub fn select(&self, devices: &[DeviceDescriptor]) -> Option<DeviceDescriptor> {
        debug!(
            "Looking for '{}' among {} bonded devices",
            self.prefix,
            devices.len()
        );

        let found = match self.policy {
            SelectionPolicy::FirstMatch => select(devices, &self.prefix),
            SelectionPolicy::LowestAddress => devices
                .iter()
                .filter(|d| d.name.starts_with(&self.prefix))
                .min_by(|a, b| a.address.cmp(&b.address))
                .cloned(),
        };

        if let Some(device) = &found {
            info!(
                "Found a device whose name starts with '{}': {} ({})",
                self.prefix, device.name, device.address
            );
        }
        found
    }

    /// Enumerate bonded devices and pick one
    pub fn find(&self, registry: &dyn BondedDevices) -> Result<DeviceDescriptor> {
        let devices = registry.bonded_devices()?;
        self.select(&devices)
            .ok_or_else(|| MonitorError::DeviceNotFound {
                prefix: self.prefix.clone(),
            })
    }
}
