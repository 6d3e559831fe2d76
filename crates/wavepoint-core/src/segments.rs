//! ELF-relative ↔ process address translation for the loaded code object

use crate::shm::{Region, SharedMemory};
use tracing::{debug, trace};
use wavepoint_common::{decode_loadmap, Error, Result, SegmentDescriptor};

/// Last loadmap snapshot and the segment currently executing
#[derive(Debug, Default)]
pub struct SegmentTranslator {
    segments: Vec<SegmentDescriptor>,
    executing: Option<usize>,
}

impl SegmentTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the loadmap region. An absent region empties the table.
    pub fn refresh(&mut self, shm: &dyn SharedMemory) -> Result<()> {
        let segments = match shm.read_region(Region::LoadMap)? {
            Some(raw) => decode_loadmap(&raw)?,
            None => Vec::new(),
        };
        self.load(segments);
        Ok(())
    }

    /// Replace the table with `segments`
    pub fn load(&mut self, segments: Vec<SegmentDescriptor>) {
        self.executing = segments.iter().position(|s| s.is_executed);
        debug!(
            target: "wavepoint_core::segments",
            count = segments.len(),
            executing = ?self.executing,
            "Loaded segment table"
        );
        self.segments = segments;
    }

    pub fn reset(&mut self) {
        self.segments.clear();
        self.executing = None;
    }

    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    pub fn executing_segment(&self) -> Option<&SegmentDescriptor> {
        self.executing.and_then(|i| self.segments.get(i))
    }

    fn current(&self) -> Result<&SegmentDescriptor> {
        self.executing_segment().ok_or(Error::NoExecutingSegment)
    }

    /// ELF-relative address → process address
    pub fn resolve_code_address(&self, elf_addr: u64) -> Result<u64> {
        let seg = self.current()?;
        let addr = elf_addr
            .wrapping_sub(seg.segment_base_elf_va)
            .wrapping_add(seg.segment_base);
        trace!(target: "wavepoint_core::segments", elf_addr, addr, "Resolved code address");
        Ok(addr)
    }

    /// Process address → ELF-relative address
    pub fn resolve_process_address(&self, addr: u64) -> Result<u64> {
        let seg = self.current()?;
        Ok(addr
            .wrapping_sub(seg.segment_base)
            .wrapping_add(seg.segment_base_elf_va))
    }
}
