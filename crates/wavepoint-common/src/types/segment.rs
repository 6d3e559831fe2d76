//! Loaded code-segment descriptors from the loadmap region

use crate::error::{Error, Result};
use crate::wire::{ByteReader, ByteWriter};
use serde::{Deserialize, Serialize};

/// One loaded code segment.
///
/// The agent publishes these as `[u64 count][count x descriptor]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub device: u64,
    pub executable: u64,
    pub storage_type: u32,
    pub storage_base: u64,
    pub storage_size: u64,
    pub storage_offset: u64,
    /// Process (device-memory) address the segment is loaded at
    pub segment_base: u64,
    pub segment_size: u64,
    /// Address of the segment inside the code object
    pub segment_base_elf_va: u64,
    pub is_executed: bool,
}

impl SegmentDescriptor {
    pub const ENCODED_SIZE: usize = 80;

    /// Does `elf_addr` fall inside this segment's ELF image range
    pub fn contains_elf(&self, elf_addr: u64) -> bool {
        elf_addr >= self.segment_base_elf_va
            && elf_addr - self.segment_base_elf_va < self.segment_size.max(1)
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.u64(self.device)
            .u64(self.executable)
            .u32(self.storage_type)
            .zeros(4)
            .u64(self.storage_base)
            .u64(self.storage_size)
            .u64(self.storage_offset)
            .u64(self.segment_base)
            .u64(self.segment_size)
            .u64(self.segment_base_elf_va)
            .u32(u32::from(self.is_executed))
            .zeros(4);
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let device = r.u64()?;
        let executable = r.u64()?;
        let storage_type = r.u32()?;
        r.skip(4)?;
        let desc = Self {
            device,
            executable,
            storage_type,
            storage_base: r.u64()?,
            storage_size: r.u64()?,
            storage_offset: r.u64()?,
            segment_base: r.u64()?,
            segment_size: r.u64()?,
            segment_base_elf_va: r.u64()?,
            is_executed: r.u32()? != 0,
        };
        r.skip(4)?;
        Ok(desc)
    }
}

/// Decode a full loadmap region snapshot
pub fn decode_loadmap(data: &[u8]) -> Result<Vec<SegmentDescriptor>> {
    let mut r = ByteReader::new(data);
    let count = r.u64()? as usize;
    if count.saturating_mul(SegmentDescriptor::ENCODED_SIZE) > r.remaining() {
        return Err(Error::InvalidPacket(format!(
            "loadmap declares {} segments but holds {} bytes",
            count,
            r.remaining()
        )));
    }
    (0..count).map(|_| SegmentDescriptor::decode(&mut r)).collect()
}

pub fn encode_loadmap(segments: &[SegmentDescriptor]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(8 + segments.len() * SegmentDescriptor::ENCODED_SIZE);
    w.u64(segments.len() as u64);
    for seg in segments {
        seg.encode(&mut w);
    }
    w.into_bytes()
}
