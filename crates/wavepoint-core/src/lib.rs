//! wavepoint engine
//!
//! Debugger-side half of GPU kernel debugging: turns user breakpoint text
//! into agent commands, follows the agent's notifications, and tracks which
//! wave the user is looking at. The host debugger is reached through
//! [`HostDebugger`]; the agent through two FIFOs and shared memory.

pub mod breakpoint;
pub mod channel;
pub mod config;
pub mod dbginfo;
pub mod device;
pub mod dispatcher;
pub mod dwarf;
pub mod focus;
pub mod host;
pub mod kernel;
pub mod pending;
pub mod segments;
pub mod session;
pub mod shm;
pub mod step;

pub use breakpoint::{
    BreakpointCondition, BreakpointRequest, GpuBreakpoint, RequestKind, RequestLocation,
    RequestParser, Resolution, StopReport,
};
pub use channel::AgentCommandChannel;
pub use config::SessionConfig;
pub use dbginfo::{DebugInfoBackend, DebugInfoResolver, DebugInfoSession};
pub use dispatcher::{NotificationReader, ReadOutcome};
pub use dwarf::DwarfBackend;
pub use focus::{FocusChange, FocusTracker};
pub use host::{HostDebugger, StandaloneHost};
pub use session::{AgentState, GpuDebugSession, NOTICE_PREFIX};
pub use shm::{MemorySharedMemory, Region, SharedMemory, SysvSharedMemory};
pub use step::StepKind;
pub use wavepoint_common::{Error, Result};
