//! GPU device descriptors reported by the agent

use crate::error::Result;
use crate::wire::{ByteReader, ByteWriter};
use serde::{Deserialize, Serialize};

/// Maximum number of devices carried by one Devices notification
pub const MAX_DEVICES: usize = 16;

pub const DEVICE_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub chip_id: u64,
    pub shader_engines: u32,
    pub compute_units: u32,
    pub simds_per_cu: u32,
    pub waves_per_cu: u32,
    pub engine_clock_mhz: u32,
    pub memory_clock_mhz: u32,
    /// Set while a dispatch is running on this device
    pub active: bool,
}

impl DeviceDescriptor {
    pub const ENCODED_SIZE: usize = DEVICE_NAME_LEN + 8 + 7 * 4 + 4;

    /// Peak concurrent wavefronts the device can hold
    pub fn max_waves(&self) -> u64 {
        u64::from(self.compute_units) * u64::from(self.waves_per_cu)
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.fixed_str(&self.name, DEVICE_NAME_LEN)
            .u64(self.chip_id)
            .u32(self.shader_engines)
            .u32(self.compute_units)
            .u32(self.simds_per_cu)
            .u32(self.waves_per_cu)
            .u32(self.engine_clock_mhz)
            .u32(self.memory_clock_mhz)
            .u32(u32::from(self.active))
            .zeros(4);
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let desc = Self {
            name: r.fixed_str(DEVICE_NAME_LEN)?,
            chip_id: r.u64()?,
            shader_engines: r.u32()?,
            compute_units: r.u32()?,
            simds_per_cu: r.u32()?,
            waves_per_cu: r.u32()?,
            engine_clock_mhz: r.u32()?,
            memory_clock_mhz: r.u32()?,
            active: r.u32()? != 0,
        };
        r.skip(4)?;
        Ok(desc)
    }
}
