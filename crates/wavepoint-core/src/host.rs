//! What the subsystem needs from the host debugger

use crate::breakpoint::{BreakpointRequest, GpuBreakpoint};
use std::collections::BTreeMap;
use wavepoint_common::Result;

/// Services consumed from the host debugger.
///
/// The host owns breakpoint storage; each GPU breakpoint carries a
/// [`GpuBreakpoint`] payload that only this subsystem writes.
pub trait HostDebugger {
    /// Numbers of all host breakpoints that carry a GPU payload, ascending
    fn gpu_breakpoint_numbers(&self) -> Vec<i32>;

    fn gpu_breakpoint(&self, number: i32) -> Option<&GpuBreakpoint>;

    fn gpu_breakpoint_mut(&mut self, number: i32) -> Option<&mut GpuBreakpoint>;

    /// The payload of breakpoint `number` changed
    fn notify_breakpoint_modified(&mut self, number: i32);

    /// Evaluate an expression in the inferior
    fn evaluate_expression(&mut self, expression: &str) -> Result<()>;

    /// Make `tid` the current host thread; false if it does not exist
    fn select_host_thread(&mut self, tid: i32) -> bool;

    /// Print a line for the user
    fn notice(&mut self, text: &str);
}

/// Self-contained host: breakpoint table, expression log and notice log.
/// Drives the engine from the CLI and from tests.
#[derive(Debug, Default)]
pub struct StandaloneHost {
    pub breakpoints: BTreeMap<i32, GpuBreakpoint>,
    pub modified: Vec<i32>,
    pub expressions: Vec<String>,
    pub notices: Vec<String>,
    pub threads: Vec<i32>,
    pub selected_thread: Option<i32>,
}

impl StandaloneHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host breakpoint holding `request`
    pub fn add_breakpoint(&mut self, request: &BreakpointRequest) {
        self.breakpoints
            .insert(request.number, GpuBreakpoint::new(request.clone()));
    }

    pub fn remove_breakpoint(&mut self, number: i32) -> Option<GpuBreakpoint> {
        self.breakpoints.remove(&number)
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }
}

impl HostDebugger for StandaloneHost {
    fn gpu_breakpoint_numbers(&self) -> Vec<i32> {
        self.breakpoints.keys().copied().collect()
    }

    fn gpu_breakpoint(&self, number: i32) -> Option<&GpuBreakpoint> {
        self.breakpoints.get(&number)
    }

    fn gpu_breakpoint_mut(&mut self, number: i32) -> Option<&mut GpuBreakpoint> {
        self.breakpoints.get_mut(&number)
    }

    fn notify_breakpoint_modified(&mut self, number: i32) {
        self.modified.push(number);
    }

    fn evaluate_expression(&mut self, expression: &str) -> Result<()> {
        self.expressions.push(expression.to_string());
        Ok(())
    }

    fn select_host_thread(&mut self, tid: i32) -> bool {
        if self.threads.contains(&tid) {
            self.selected_thread = Some(tid);
            true
        } else {
            false
        }
    }

    fn notice(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }
}
