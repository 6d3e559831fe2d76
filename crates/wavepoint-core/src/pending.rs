//! Requests buffered until the agent (and debug info) can take them.
//!
//! Fixed slot array; removal clears a slot in place and later insertions
//! reuse the first free slot. Scans always start at slot zero.

use crate::breakpoint::{BreakpointRequest, RequestLocation};
use tracing::debug;
use wavepoint_common::{Error, Result};

#[derive(Debug)]
pub struct PendingRequestCache {
    slots: Vec<BreakpointRequest>,
    live: usize,
}

fn empty_slot() -> BreakpointRequest {
    let mut slot = BreakpointRequest::new(-1, RequestLocation::Unknown, Default::default());
    slot.clear();
    slot
}

impl PendingRequestCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| empty_slot()).collect(),
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Store a deep copy of `request`. Buffering the same breakpoint twice
    /// is a no-op.
    pub fn push(&mut self, request: &BreakpointRequest) -> Result<usize> {
        if let Some(existing) = self
            .slots
            .iter()
            .position(|s| !s.is_unknown() && s.number == request.number && s.matches(request))
        {
            debug!(target: "wavepoint_core::pending", number = request.number, "Already buffered");
            return Ok(existing);
        }
        let slot = self
            .slots
            .iter()
            .position(BreakpointRequest::is_unknown)
            .ok_or(Error::CacheFull {
                capacity: self.capacity(),
            })?;
        self.slots[slot] = request.clone();
        self.live += 1;
        debug!(target: "wavepoint_core::pending", number = request.number, slot, "Request buffered");
        Ok(slot)
    }

    /// Slots holding a request accepted by `ready`, in slot order
    pub fn ready_slots(&self, mut ready: impl FnMut(&BreakpointRequest) -> bool) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_unknown() && ready(s))
            .map(|(i, _)| i)
            .collect()
    }

    /// Copy out a slot's request and clear the slot
    pub fn take(&mut self, slot: usize) -> Option<BreakpointRequest> {
        let entry = self.slots.get_mut(slot).filter(|s| !s.is_unknown())?;
        let request = entry.clone();
        entry.clear();
        self.live -= 1;
        Some(request)
    }

    /// Drop the request owned by host breakpoint `number`
    pub fn remove_by_number(&mut self, number: i32) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|s| !s.is_unknown() && s.number == number)
        {
            Some(slot) => {
                slot.clear();
                self.live -= 1;
                true
            }
            None => {
                debug!(target: "wavepoint_core::pending", number, "Breakpoint not buffered");
                false
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreakpointRequest> {
        self.slots.iter().filter(|s| !s.is_unknown())
    }

    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.live = 0;
    }
}
