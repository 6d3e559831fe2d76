//! Source-level stepping through momentary breakpoints

use crate::host::HostDebugger;
use crate::session::{notice, GpuDebugSession};
use crate::shm::Region;
use tracing::{debug, error, info, warn};
use wavepoint_common::protocol::CommandPacket;
use wavepoint_common::{Error, MomentaryBreakpoint, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    In,
    Over,
    Out,
}

impl GpuDebugSession {
    /// ELF-relative PC of the focused wave, else of the first wave; 0 when
    /// no wave is live. Fails when no segment is executing.
    pub fn current_pc(&self) -> Result<u64> {
        let waves = self.read_waves()?;
        let Some(wave) = self.focus.focused_wave(&waves).or_else(|| waves.first()) else {
            return Ok(0);
        };
        self.segments.resolve_process_address(wave.pc).map_err(|e| {
            warn!(
                target: "wavepoint_core::step",
                pc = format_args!("{:#x}", wave.pc),
                error = %e,
                "Wave PC is outside the loaded code"
            );
            e
        })
    }

    /// Plant momentary breakpoints for one source step and let the dispatch
    /// run. Returns how many were planted; zero means the step was abandoned
    /// and the user was told.
    pub fn set_step_breakpoints(
        &mut self,
        host: &mut dyn HostDebugger,
        kind: StepKind,
        count: u32,
    ) -> Result<usize> {
        let pc = self.current_pc()?;
        // at the kernel's first stop there is no line yet, so over behaves like in
        let kind = if pc == 0 && kind == StepKind::Over {
            StepKind::In
        } else {
            kind
        };

        let Some(session) = self.dbginfo.session().filter(|_| self.dbginfo.is_available()) else {
            notice(host, "could not perform GPU step");
            return Ok(0);
        };
        if kind != StepKind::In && pc == 0 {
            notice(host, "could not perform GPU step");
            return Ok(0);
        }
        if count != 1 {
            notice(host, "Only single steps are currently supported, converting to single step");
        }

        let addresses = match kind {
            StepKind::In => session.all_mapped_addresses(),
            StepKind::Over | StepKind::Out => session
                .step_addresses(pc, kind == StepKind::Out)
                .map_err(Error::from)?,
        };
        if addresses.is_empty() {
            notice(host, "Could not perform GPU step");
            return Ok(0);
        }

        let entries: Vec<MomentaryBreakpoint> = addresses
            .iter()
            .map(|&pc| MomentaryBreakpoint {
                pc,
                line: session.address_to_line(pc).map(|l| l.line).unwrap_or(0),
            })
            .collect();
        let table = MomentaryBreakpoint::encode_table(&entries);
        let max_size = self.config.shared_memory.momentary.max_size;
        if table.len() >= max_size {
            error!(
                target: "wavepoint_core::step",
                addresses = entries.len(),
                required = table.len(),
                max_size,
                "Momentary breakpoint buffer overflow"
            );
            return Err(Error::SharedMemory(format!(
                "{} step addresses need {} bytes, momentary region holds {}",
                entries.len(),
                table.len(),
                max_size
            )));
        }
        self.shm.write_region(Region::MomentaryBreakpoints, &table)?;

        let planted = entries.len();
        let packet_count = i32::try_from(planted)
            .map_err(|_| Error::Internal(format!("{} momentary breakpoints", planted)))?;
        self.channel.send(&CommandPacket::momentary(packet_count))?;
        self.continue_dispatch()?;
        info!(target: "wavepoint_core::step", ?kind, pc, planted, "Step breakpoints set");
        Ok(planted)
    }

    /// Let the stopped dispatch run
    pub fn continue_dispatch(&mut self) -> Result<()> {
        self.channel.send(&CommandPacket::continue_dispatch())?;
        debug!(target: "wavepoint_core::step", "Continue sent");
        Ok(())
    }
}
