//! Wave coordinates and the live-wave records published by the agent

use crate::error::Result;
use crate::wire::{ByteReader, ByteWriter};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lanes per wavefront
pub const WAVE_LANES: usize = 64;

/// A 3D work-group or work-item coordinate.
///
/// `(-1,-1,-1)` means "unknown" and is distinct from `(0,0,0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveDim3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl WaveDim3 {
    pub const UNKNOWN: WaveDim3 = WaveDim3 {
        x: -1,
        y: -1,
        z: -1,
    };

    pub const ZERO: WaveDim3 = WaveDim3 { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// True if any axis still carries the sentinel
    pub fn is_unknown(&self) -> bool {
        self.x < 0 || self.y < 0 || self.z < 0
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.i32(self.x).i32(self.y).i32(self.z);
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            x: r.i32()?,
            y: r.i32()?,
            z: r.i32()?,
        })
    }
}

impl Default for WaveDim3 {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for WaveDim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Find `name:` in `text` and read a `x,y,z` coordinate after it.
///
/// Whitespace is allowed around the colon and the commas. All three
/// components are required; anything after the third digit group is left
/// for the next argument.
pub fn parse_dim_argument(text: &str, name: &str) -> Option<WaveDim3> {
    let name = name.trim_start();
    let start = text.find(name)?;
    let mut rest = &text[start + name.len()..];

    if !name.is_empty() {
        rest = rest.trim_start();
        rest = rest.strip_prefix(':')?;
    }

    let mut values = [0i32; 3];
    for (i, slot) in values.iter_mut().enumerate() {
        if i > 0 {
            rest = rest.trim_start().strip_prefix(',')?;
        }
        rest = rest.trim_start();
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        *slot = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
    }

    Some(WaveDim3::new(values[0], values[1], values[2]))
}

/// One live wavefront, as laid out in the wave-info region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveInfo {
    pub work_group: WaveDim3,
    pub work_items: Vec<WaveDim3>,
    /// Bit `i` set means lane `i` is executing
    pub exec_mask: u64,
    /// Process address of the wave's program counter
    pub pc: u64,
    pub wave_address: u64,
}

impl WaveInfo {
    /// Encoded size: work-group, 64 lane coordinates, mask, pc, address
    pub const ENCODED_SIZE: usize = 12 + WAVE_LANES * 12 + 8 + 8 + 8;

    /// True if some executing lane of this wave is `(work_group, work_item)`
    pub fn has_active_lane(&self, work_group: WaveDim3, work_item: WaveDim3) -> bool {
        self.work_group == work_group
            && self
                .work_items
                .iter()
                .enumerate()
                .take(WAVE_LANES)
                .any(|(lane, wi)| *wi == work_item && self.exec_mask & (1u64 << lane) != 0)
    }

    /// First executing lane, used when focus must be bootstrapped
    pub fn first_active_item(&self) -> Option<WaveDim3> {
        self.work_items
            .iter()
            .enumerate()
            .take(WAVE_LANES)
            .find(|(lane, _)| self.exec_mask & (1u64 << lane) != 0)
            .map(|(_, wi)| *wi)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::ENCODED_SIZE);
        self.work_group.encode(&mut w);
        for lane in 0..WAVE_LANES {
            self.work_items
                .get(lane)
                .copied()
                .unwrap_or(WaveDim3::ZERO)
                .encode(&mut w);
        }
        w.u64(self.exec_mask).u64(self.pc).u64(self.wave_address);
        w.into_bytes()
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let work_group = WaveDim3::decode(r)?;
        let mut work_items = Vec::with_capacity(WAVE_LANES);
        for _ in 0..WAVE_LANES {
            work_items.push(WaveDim3::decode(r)?);
        }
        Ok(Self {
            work_group,
            work_items,
            exec_mask: r.u64()?,
            pc: r.u64()?,
            wave_address: r.u64()?,
        })
    }

    /// Decode the first `count` records of a wave-info region snapshot
    pub fn decode_table(data: &[u8], count: usize) -> Result<Vec<WaveInfo>> {
        let mut r = ByteReader::new(data);
        (0..count).map(|_| WaveInfo::decode(&mut r)).collect()
    }
}
