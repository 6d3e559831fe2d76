//! GPU breakpoints: request model, resolution and agent hand-off

pub mod report;
pub mod request;

pub use report::StopReport;
pub use request::*;

use crate::host::HostDebugger;
use crate::session::GpuDebugSession;
use tracing::{debug, info, warn};
use wavepoint_common::protocol::CommandPacket;
use wavepoint_common::{Error, Result};

/// Per-breakpoint payload the host stores for this subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuBreakpoint {
    pub number: i32,
    pub request: BreakpointRequest,
    /// Process address sent to the agent
    pub pc: Option<u64>,
    /// ELF-relative address the process address was derived from
    pub pc_relative: Option<u64>,
    /// Overwritten with the agent's count on every hit report
    pub hit_count: u64,
    pub enabled: bool,
}

impl GpuBreakpoint {
    pub fn new(request: BreakpointRequest) -> Self {
        Self {
            number: request.number,
            request,
            pc: None,
            pc_relative: None,
            hit_count: 0,
            enabled: true,
        }
    }
}

/// Outcome of handing a request to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Packet written. Source breakpoints carry their process address.
    Sent { pc: Option<u64> },
    /// Agent or debug information not ready; kept in the pending cache
    Buffered,
    /// The line has no code
    NotMapped,
}

impl GpuDebugSession {
    /// True if `text` uses the GPU breakpoint prefix
    pub fn claims_breakpoint(&self, text: &str) -> bool {
        RequestParser::new(&self.config.breakpoint_prefix, self.dbginfo.active_file()).claims(text)
    }

    /// Parse breakpoint text for host breakpoint `number`
    pub fn parse_breakpoint(
        &self,
        number: i32,
        text: &str,
        condition: Option<&str>,
    ) -> Result<BreakpointRequest> {
        RequestParser::new(&self.config.breakpoint_prefix, self.dbginfo.active_file())
            .parse(number, text, condition)
    }

    fn ready_for(&self, request: &BreakpointRequest) -> bool {
        self.channel.is_open()
            && (request.kind() != RequestKind::SourceLocation || self.dbginfo.is_available())
    }

    /// Send `request` to the agent, or buffer it until the agent can take it
    pub fn resolve(
        &mut self,
        host: &mut dyn HostDebugger,
        request: &BreakpointRequest,
    ) -> Result<Resolution> {
        if !self.ready_for(request) {
            self.pending.push(request)?;
            return Ok(Resolution::Buffered);
        }
        self.send_request(host, request)
    }

    fn send_request(
        &mut self,
        host: &mut dyn HostDebugger,
        request: &BreakpointRequest,
    ) -> Result<Resolution> {
        match &request.location {
            RequestLocation::KernelFunction { .. } | RequestLocation::AnyLocation { .. } => {
                let name = request
                    .location
                    .kernel_name()
                    .unwrap_or(ANY_KERNEL_PATTERN);
                self.channel.send(&CommandPacket::create_kernel(
                    request.number,
                    name,
                    request.condition.to_packet(),
                ))?;
                info!(target: "wavepoint_core::breakpoint", number = request.number, kernel = name, "Kernel breakpoint sent");
                Ok(Resolution::Sent { pc: None })
            }
            RequestLocation::SourceLocation { file, line, .. } => {
                self.send_source(host, request, file.as_deref(), *line)
            }
            RequestLocation::Unknown => Err(Error::Internal(format!(
                "breakpoint {} has no location",
                request.number
            ))),
        }
    }

    fn send_source(
        &mut self,
        host: &mut dyn HostDebugger,
        request: &BreakpointRequest,
        file: Option<&str>,
        line: u64,
    ) -> Result<Resolution> {
        // one line table per code object, so lines are looked up without a file
        let Some(location) = self.dbginfo.resolve_line(None, line)? else {
            let shown = file.unwrap_or(self.dbginfo.active_file());
            host.notice(&format!("[rocm-gdb: No line {} in {}]", line, shown));
            return Ok(Resolution::NotMapped);
        };
        let Some(pc_relative) = self.dbginfo.first_address(&location)? else {
            debug!(target: "wavepoint_core::breakpoint", line = location.line, "Line has no addresses");
            return Ok(Resolution::NotMapped);
        };

        if self.segments.executing_segment().is_none() {
            self.segments.refresh(self.shm.as_ref())?;
        }
        let pc = self.segments.resolve_code_address(pc_relative)?;

        let source_line = self.dbginfo.source_line(location.line);
        let line_num = i32::try_from(location.line)
            .map_err(|_| Error::Internal(format!("line {} does not fit a packet", location.line)))?;
        self.channel.send(&CommandPacket::create_source(
            request.number,
            pc,
            line_num,
            &source_line,
            request.condition.to_packet(),
        ))?;
        info!(
            target: "wavepoint_core::breakpoint",
            number = request.number,
            line = location.line,
            pc = format_args!("{:#x}", pc),
            "Source breakpoint sent"
        );

        let mut resolved = request.clone();
        if let RequestLocation::SourceLocation {
            source_line: slot, ..
        } = &mut resolved.location
        {
            *slot = Some(source_line);
        }
        let updated = match host.gpu_breakpoint_mut(request.number) {
            Some(bp) => {
                bp.request = resolved;
                bp.pc = Some(pc);
                bp.pc_relative = Some(pc_relative);
                true
            }
            None => false,
        };
        if updated {
            host.notify_breakpoint_modified(request.number);
        } else {
            debug!(target: "wavepoint_core::breakpoint", number = request.number, "No host breakpoint to update");
        }
        Ok(Resolution::Sent { pc: Some(pc) })
    }

    /// Send every buffered request the agent can take now.
    ///
    /// Returns how many were sent. Source requests stay buffered while debug
    /// information is unavailable.
    pub fn flush_pending(&mut self, host: &mut dyn HostDebugger) -> Result<usize> {
        let channel_open = self.channel.is_open();
        let dbginfo_ready = self.dbginfo.is_available();
        let slots = self.pending.ready_slots(|r| {
            channel_open && (r.kind() != RequestKind::SourceLocation || dbginfo_ready)
        });

        let mut sent = 0;
        for slot in slots {
            let Some(request) = self.pending.take(slot) else {
                continue;
            };
            match self.send_request(host, &request) {
                Ok(Resolution::Sent { .. }) => sent += 1,
                Ok(_) => {}
                Err(e) if e.is_protocol_violation() || matches!(e, Error::AgentNotReady) => {
                    self.pending.push(&request)?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(target: "wavepoint_core::breakpoint", number = request.number, error = %e, "Buffered breakpoint failed to resolve");
                }
            }
        }
        if sent > 0 {
            debug!(target: "wavepoint_core::breakpoint", sent, left = self.pending.len(), "Pending cache flushed");
        }
        Ok(sent)
    }

    /// Re-resolve every source breakpoint that was placed in an earlier code
    /// object. Addresses do not survive a reload.
    pub fn adjust_all(&mut self, host: &mut dyn HostDebugger) -> Result<usize> {
        let mut adjusted = 0;
        for number in host.gpu_breakpoint_numbers() {
            let request = match host.gpu_breakpoint(number) {
                Some(bp)
                    if bp.pc_relative.is_some()
                        && bp.request.kind() == RequestKind::SourceLocation =>
                {
                    bp.request.clone()
                }
                _ => continue,
            };
            // a failed reload may have buffered it; the fresh resolve replaces that copy
            self.pending.remove_by_number(number);
            match self.resolve(host, &request) {
                Ok(_) => adjusted += 1,
                Err(e) if e.is_protocol_violation() => return Err(e),
                Err(e) => {
                    warn!(target: "wavepoint_core::breakpoint", number, error = %e, "Could not re-resolve breakpoint");
                }
            }
        }
        Ok(adjusted)
    }

    /// Overwrite hit counts with the agent's. Unused slots (-1) and numbers
    /// the host no longer knows are skipped.
    pub fn update_statistics(
        &mut self,
        host: &mut dyn HostDebugger,
        ids: &[i32],
        hit_counts: &[i32],
    ) {
        for (&number, &count) in ids.iter().zip(hit_counts) {
            if number < 0 {
                continue;
            }
            let Some(bp) = host.gpu_breakpoint_mut(number) else {
                debug!(target: "wavepoint_core::breakpoint", number, "Hit reported for a deleted breakpoint");
                continue;
            };
            bp.hit_count = u64::try_from(count).unwrap_or(0);
            host.notify_breakpoint_modified(number);
        }
    }

    /// Forget breakpoint `number`: drop any buffered copy and, once the
    /// agent is listening, tell it the breakpoint is gone
    pub fn delete_breakpoint(&mut self, number: i32) -> Result<()> {
        let was_buffered = self.pending.remove_by_number(number);
        if self.channel.is_open() {
            self.channel.send(&CommandPacket::delete(number))?;
        } else if !was_buffered {
            warn!(
                target: "wavepoint_core::breakpoint",
                number, "Could not find breakpoint in the breakpoint cache"
            );
        }
        Ok(())
    }

    pub fn disable_breakpoint(&mut self, host: &mut dyn HostDebugger, number: i32) -> Result<()> {
        self.channel.send(&CommandPacket::disable(number))?;
        let found = match host.gpu_breakpoint_mut(number) {
            Some(bp) => {
                bp.enabled = false;
                true
            }
            None => false,
        };
        if found {
            host.notify_breakpoint_modified(number);
        }
        Ok(())
    }
}
