//! Devices reported by the agent

use tracing::debug;
use wavepoint_common::{DeviceDescriptor, MAX_DEVICES};

#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table; entries past the protocol limit are dropped
    pub fn set_devices(&mut self, mut devices: Vec<DeviceDescriptor>) {
        devices.truncate(MAX_DEVICES);
        debug!(target: "wavepoint_core::device", count = devices.len(), "Device table updated");
        self.devices = devices;
    }

    pub fn unset_active(&mut self) {
        for dev in &mut self.devices {
            dev.active = false;
        }
    }

    pub fn active_device(&self) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.active)
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }
}
