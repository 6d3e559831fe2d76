//! Momentary (single-step) breakpoint records

use crate::error::Result;
use crate::wire::{ByteReader, ByteWriter};
use serde::{Deserialize, Serialize};

/// A one-shot breakpoint the agent removes once any wave reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentaryBreakpoint {
    /// ELF-relative address
    pub pc: u64,
    pub line: u64,
}

impl MomentaryBreakpoint {
    pub const ENCODED_SIZE: usize = 16;

    pub fn encode_table(entries: &[MomentaryBreakpoint]) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(entries.len() * Self::ENCODED_SIZE);
        for entry in entries {
            w.u64(entry.pc).u64(entry.line);
        }
        w.into_bytes()
    }

    pub fn decode_table(data: &[u8], count: usize) -> Result<Vec<MomentaryBreakpoint>> {
        let mut r = ByteReader::new(data);
        (0..count)
            .map(|_| {
                Ok(MomentaryBreakpoint {
                    pc: r.u64()?,
                    line: r.u64()?,
                })
            })
            .collect()
    }
}
