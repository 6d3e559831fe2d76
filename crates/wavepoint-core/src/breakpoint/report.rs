//! Breakpoint listing text and stop reports

use super::{GpuBreakpoint, RequestKind, RequestLocation};
use crate::host::HostDebugger;
use crate::session::{notice, GpuDebugSession};
use std::path::Path;
use tracing::debug;
use wavepoint_common::protocol::{ConditionCode, PredispatchState};
use wavepoint_common::{Result, WaveDim3, WaveInfo};

/// Address column for kernel breakpoints, which have none
const NO_ADDRESS: &str = "---    ";

/// Address and description columns of a breakpoint listing
pub fn print_location(bp: &GpuBreakpoint) -> String {
    match &bp.request.location {
        RequestLocation::KernelFunction { name } if name.starts_with('*') => {
            format!("{}Every GPU dispatch({})", NO_ADDRESS, name)
        }
        RequestLocation::KernelFunction { name } => format!("{}{}", NO_ADDRESS, name),
        RequestLocation::AnyLocation { pattern } => {
            format!("{}Every GPU dispatch({})", NO_ADDRESS, pattern)
        }
        RequestLocation::SourceLocation {
            file,
            line,
            source_line,
        } => {
            let address = format!("PC:0x{:04x} ", bp.pc.unwrap_or(0));
            match source_line {
                Some(text) => format!(
                    "{}{} {}@line {}",
                    address,
                    text,
                    file.as_deref().unwrap_or("<unknown>"),
                    line
                ),
                None => format!("{}Unknown HSAIL source line", address),
            }
        }
        RequestLocation::Unknown => "Unknown GPU breakpoint type".to_string(),
    }
}

/// Condition column; only `Equal` conditions are worth showing
pub fn print_condition(bp: &GpuBreakpoint) -> Option<String> {
    let cond = &bp.request.condition;
    (cond.code == ConditionCode::Equal)
        .then(|| format!("WG: {} and WI: {}  Active", cond.work_group, cond.work_item))
}

/// Why the device stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReport {
    /// Entry to a kernel, before any wave ran
    KernelEntry {
        number: i32,
        kernel: String,
        condition: Option<String>,
    },
    Breakpoint {
        number: i32,
        location: String,
        condition: Option<String>,
    },
    /// A wave stopped where no breakpoint is set
    SourceLine {
        pc: u64,
        source_line: String,
        file: String,
        line: u64,
    },
}

impl StopReport {
    pub fn lines(&self) -> Vec<String> {
        match self {
            StopReport::KernelEntry {
                number,
                kernel,
                condition,
            } => vec![format!(
                "Breakpoint {} at GPU Kernel, {}(){}",
                number,
                kernel,
                condition.as_deref().map(|c| format!(" {}", c)).unwrap_or_default()
            )],
            StopReport::Breakpoint {
                number,
                location,
                condition,
            } => {
                let mut lines = vec![format!("Breakpoint {} at {}", number, location)];
                if let Some(c) = condition {
                    lines.push(format!("Condition: {}", c));
                }
                lines
            }
            StopReport::SourceLine {
                pc,
                source_line,
                file,
                line,
            } => vec![format!(
                "PC:0x{:04x} \t {} {}@line {}",
                pc, source_line, file, line
            )],
        }
    }
}

fn gpu_breakpoints<'h>(
    host: &'h dyn HostDebugger,
    numbers: &'h [i32],
) -> impl Iterator<Item = &'h GpuBreakpoint> + 'h {
    numbers.iter().filter_map(move |n| host.gpu_breakpoint(*n))
}

fn basename(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

impl GpuDebugSession {
    /// Work out why the device stopped and tell the user.
    ///
    /// Picks the first wave, in table order, that sits on a breakpoint whose
    /// condition it satisfies.
    pub fn report_stop(&mut self, host: &mut dyn HostDebugger) -> Result<Option<StopReport>> {
        let waves = self.read_waves()?;
        let report = if waves.is_empty() {
            if self.agent.predispatch == PredispatchState::EnteredPredispatch {
                self.kernel_entry_report(&*host)
            } else {
                None
            }
        } else {
            let (report, focus_moved) = self.wave_report(&*host, &waves);
            if focus_moved {
                notice(host, &self.focus.describe());
            }
            report
        };

        match &report {
            Some(r) => {
                for line in r.lines() {
                    notice(host, &line);
                }
            }
            None => debug!(target: "wavepoint_core::breakpoint", waves = waves.len(), "Nothing to report"),
        }
        Ok(report)
    }

    fn kernel_entry_report(&self, host: &dyn HostDebugger) -> Option<StopReport> {
        let kernel = self.kernels.active_kernel_name()?;
        let numbers = host.gpu_breakpoint_numbers();
        let bp = gpu_breakpoints(host, &numbers)
            .find(|bp| {
                matches!(&bp.request.location, RequestLocation::KernelFunction { name } if name == kernel)
            })
            .or_else(|| {
                gpu_breakpoints(host, &numbers).find(|bp| bp.request.kind() == RequestKind::AnyLocation)
            })?;

        Some(StopReport::KernelEntry {
            number: bp.number,
            kernel: kernel.to_string(),
            condition: print_condition(bp),
        })
    }

    /// The report, and whether focus moved visibly on the way
    fn wave_report(
        &mut self,
        host: &dyn HostDebugger,
        waves: &[WaveInfo],
    ) -> (Option<StopReport>, bool) {
        let mut focus_moved = false;
        if self.focus.is_unknown() {
            let first = &waves[0];
            let item = first
                .first_active_item()
                .or_else(|| first.work_items.first().copied())
                .unwrap_or(WaveDim3::ZERO);
            focus_moved = self.focus.set_focus(first.work_group, item, waves).is_visible();
        }

        let numbers = host.gpu_breakpoint_numbers();
        for wave in waves {
            let hit = gpu_breakpoints(host, &numbers).find(|bp| bp.pc == Some(wave.pc));

            match hit {
                Some(bp) => {
                    let cond = &bp.request.condition;
                    if !cond.matches_work_group(wave.work_group) {
                        continue;
                    }
                    if cond.code == ConditionCode::Equal {
                        let change = self.focus.set_focus(cond.work_group, cond.work_item, waves);
                        focus_moved |= change.is_visible();
                    }
                    let report = StopReport::Breakpoint {
                        number: bp.number,
                        location: print_location(bp),
                        condition: print_condition(bp),
                    };
                    return (Some(report), focus_moved);
                }
                None => {
                    let Ok(elf_pc) = self.segments.resolve_process_address(wave.pc) else {
                        continue;
                    };
                    match self.dbginfo.pc_info(elf_pc) {
                        Some((line, file)) if line != 0 => {
                            let report = StopReport::SourceLine {
                                pc: wave.pc,
                                source_line: self.dbginfo.source_line(line),
                                file: basename(&file),
                                line,
                            };
                            return (Some(report), focus_moved);
                        }
                        _ => {}
                    }
                }
            }
        }
        (None, focus_moved)
    }
}
