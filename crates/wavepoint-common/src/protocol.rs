//! Fixed-size packets exchanged with the device agent over the FIFOs.
//!
//! Both directions use one packet size per direction so that a single
//! read or write moves exactly one message. Unused fields are zero-filled.

use crate::error::{Error, Result};
use crate::types::{DeviceDescriptor, WaveDim3, MAX_DEVICES};
use crate::wire::{ByteReader, ByteWriter};
use serde::{Deserialize, Serialize};

/// Capacity of the source-line text field, terminator included
pub const MAX_SOURCE_LINE_LEN: usize = 256;

/// Capacity of the kernel-name text field, terminator included
pub const MAX_KERNEL_NAME_LEN: usize = 256;

/// Breakpoint slots in one BreakpointHit notification
pub const MAX_REPORTABLE_BREAKPOINTS: usize = 32;

/// Encoded size of [`PacketCondition`]
const CONDITION_SIZE: usize = 4 + 12 + 12;

/// Size of every debugger → agent packet
pub const COMMAND_PACKET_SIZE: usize =
    4 + 4 + 8 + 4 + CONDITION_SIZE + 4 + 4 + MAX_SOURCE_LINE_LEN + MAX_KERNEL_NAME_LEN;

const NOTIFICATION_PAYLOAD_SIZE: usize = 8 + MAX_DEVICES * DeviceDescriptor::ENCODED_SIZE;

/// Size of every agent → debugger packet
pub const NOTIFICATION_PACKET_SIZE: usize = 4 + NOTIFICATION_PAYLOAD_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum CommandTag {
    Unknown = 0,
    CreateBreakpoint = 1,
    DeleteBreakpoint = 2,
    DisableBreakpoint = 3,
    MomentaryBreakpoint = 4,
    ContinueDispatch = 5,
    SetLogging = 6,
}

impl CommandTag {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => CommandTag::CreateBreakpoint,
            2 => CommandTag::DeleteBreakpoint,
            3 => CommandTag::DisableBreakpoint,
            4 => CommandTag::MomentaryBreakpoint,
            5 => CommandTag::ContinueDispatch,
            6 => CommandTag::SetLogging,
            _ => CommandTag::Unknown,
        }
    }
}

/// Agent-side logging switch carried by SetLogging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum LoggingDirective {
    Unknown = 0,
    EnableAll = 1,
    DisableAll = 2,
}

impl LoggingDirective {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => LoggingDirective::EnableAll,
            2 => LoggingDirective::DisableAll,
            _ => LoggingDirective::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum ConditionCode {
    #[default]
    Unknown = 0,
    Any = 1,
    Equal = 2,
}

impl ConditionCode {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => ConditionCode::Any,
            2 => ConditionCode::Equal,
            _ => ConditionCode::Unknown,
        }
    }
}

/// Condition as the agent evaluates it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketCondition {
    pub code: ConditionCode,
    pub work_group: WaveDim3,
    pub work_item: WaveDim3,
}

impl Default for PacketCondition {
    fn default() -> Self {
        Self {
            code: ConditionCode::Unknown,
            work_group: WaveDim3::ZERO,
            work_item: WaveDim3::ZERO,
        }
    }
}

/// Debugger → agent command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPacket {
    pub tag: CommandTag,
    /// Host breakpoint number
    pub breakpoint_id: i32,
    /// Process address of the breakpoint
    pub pc: u64,
    pub line_num: i32,
    pub condition: PacketCondition,
    pub logging: LoggingDirective,
    pub momentary_count: i32,
    pub source_line: String,
    pub kernel_name: String,
}

impl CommandPacket {
    fn empty(tag: CommandTag) -> Self {
        Self {
            tag,
            breakpoint_id: 0,
            pc: 0,
            line_num: 0,
            condition: PacketCondition::default(),
            logging: LoggingDirective::Unknown,
            momentary_count: 0,
            source_line: String::new(),
            kernel_name: String::new(),
        }
    }

    /// Breakpoint at a resolved source line. The agent never re-reads source,
    /// so the line text travels with the packet.
    pub fn create_source(
        breakpoint_id: i32,
        pc: u64,
        line_num: i32,
        source_line: &str,
        condition: PacketCondition,
    ) -> Self {
        Self {
            breakpoint_id,
            pc,
            line_num,
            condition,
            source_line: source_line.to_string(),
            ..Self::empty(CommandTag::CreateBreakpoint)
        }
    }

    /// Breakpoint on entry to every dispatch of `kernel_name`
    pub fn create_kernel(breakpoint_id: i32, kernel_name: &str, condition: PacketCondition) -> Self {
        Self {
            breakpoint_id,
            condition,
            kernel_name: kernel_name.to_string(),
            ..Self::empty(CommandTag::CreateBreakpoint)
        }
    }

    pub fn delete(breakpoint_id: i32) -> Self {
        Self {
            breakpoint_id,
            ..Self::empty(CommandTag::DeleteBreakpoint)
        }
    }

    pub fn disable(breakpoint_id: i32) -> Self {
        Self {
            breakpoint_id,
            ..Self::empty(CommandTag::DisableBreakpoint)
        }
    }

    pub fn momentary(count: i32) -> Self {
        Self {
            momentary_count: count,
            ..Self::empty(CommandTag::MomentaryBreakpoint)
        }
    }

    pub fn continue_dispatch() -> Self {
        Self::empty(CommandTag::ContinueDispatch)
    }

    pub fn set_logging(directive: LoggingDirective) -> Self {
        Self {
            logging: directive,
            ..Self::empty(CommandTag::SetLogging)
        }
    }

    /// Check the fields each tag requires
    pub fn validate(&self) -> Result<()> {
        let ok = match self.tag {
            CommandTag::CreateBreakpoint => {
                self.breakpoint_id >= 0 && (!self.kernel_name.is_empty() || self.line_num > 0)
            }
            CommandTag::DeleteBreakpoint | CommandTag::DisableBreakpoint => self.breakpoint_id >= 0,
            CommandTag::MomentaryBreakpoint => self.momentary_count > 0,
            CommandTag::ContinueDispatch => true,
            CommandTag::SetLogging => self.logging != LoggingDirective::Unknown,
            CommandTag::Unknown => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidPacket(format!(
                "{:?} packet is missing required fields (id {}, line {}, count {})",
                self.tag, self.breakpoint_id, self.line_num, self.momentary_count
            )))
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(COMMAND_PACKET_SIZE);
        w.u32(self.tag as u32)
            .i32(self.breakpoint_id)
            .u64(self.pc)
            .i32(self.line_num)
            .u32(self.condition.code as u32);
        self.condition.work_group.encode(&mut w);
        self.condition.work_item.encode(&mut w);
        w.u32(self.logging as u32)
            .i32(self.momentary_count)
            .fixed_str(&self.source_line, MAX_SOURCE_LINE_LEN)
            .fixed_str(&self.kernel_name, MAX_KERNEL_NAME_LEN);
        w.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let tag = CommandTag::from_u32(r.u32()?);
        let breakpoint_id = r.i32()?;
        let pc = r.u64()?;
        let line_num = r.i32()?;
        let condition = PacketCondition {
            code: ConditionCode::from_u32(r.u32()?),
            work_group: WaveDim3::decode(&mut r)?,
            work_item: WaveDim3::decode(&mut r)?,
        };
        Ok(Self {
            tag,
            breakpoint_id,
            pc,
            line_num,
            condition,
            logging: LoggingDirective::from_u32(r.u32()?),
            momentary_count: r.i32()?,
            source_line: r.fixed_str(MAX_SOURCE_LINE_LEN)?,
            kernel_name: r.fixed_str(MAX_KERNEL_NAME_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum PredispatchState {
    Unknown = 0,
    EnteredPredispatch = 1,
    LeftPredispatch = 2,
}

impl PredispatchState {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => PredispatchState::EnteredPredispatch,
            2 => PredispatchState::LeftPredispatch,
            _ => PredispatchState::Unknown,
        }
    }
}

/// Agent → debugger event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// A new code object was published in the binary region
    NewBinary {
        kernel_name: String,
        work_group_size: WaveDim3,
        grid_size: WaveDim3,
    },
    Predispatch {
        state: PredispatchState,
        host_tid: i32,
    },
    StartDebugThread {
        tid: i32,
    },
    BreakpointHit {
        /// Host breakpoint numbers, -1 for unused slots
        ids: Vec<i32>,
        hit_counts: Vec<i32>,
        active_waves: u32,
    },
    BeginDebugging,
    EndDebugging {
        dispatch_completed: bool,
    },
    FocusChange {
        work_group: WaveDim3,
        work_item: WaveDim3,
    },
    AgentError {
        code: i32,
    },
    KillComplete {
        successful: bool,
    },
    NewActiveWaves {
        count: u32,
    },
    Devices(Vec<DeviceDescriptor>),
    /// Tag this build does not know; carried through so the reader keeps going
    Unknown(u32),
}

mod tag {
    pub const NEW_BINARY: u32 = 1;
    pub const PREDISPATCH: u32 = 2;
    pub const START_DEBUG_THREAD: u32 = 3;
    pub const BREAKPOINT_HIT: u32 = 4;
    pub const BEGIN_DEBUGGING: u32 = 5;
    pub const END_DEBUGGING: u32 = 6;
    pub const FOCUS_CHANGE: u32 = 7;
    pub const AGENT_ERROR: u32 = 8;
    pub const KILL_COMPLETE: u32 = 9;
    pub const NEW_ACTIVE_WAVES: u32 = 10;
    pub const DEVICES: u32 = 11;
}

impl Notification {
    pub fn tag(&self) -> u32 {
        match self {
            Notification::NewBinary { .. } => tag::NEW_BINARY,
            Notification::Predispatch { .. } => tag::PREDISPATCH,
            Notification::StartDebugThread { .. } => tag::START_DEBUG_THREAD,
            Notification::BreakpointHit { .. } => tag::BREAKPOINT_HIT,
            Notification::BeginDebugging => tag::BEGIN_DEBUGGING,
            Notification::EndDebugging { .. } => tag::END_DEBUGGING,
            Notification::FocusChange { .. } => tag::FOCUS_CHANGE,
            Notification::AgentError { .. } => tag::AGENT_ERROR,
            Notification::KillComplete { .. } => tag::KILL_COMPLETE,
            Notification::NewActiveWaves { .. } => tag::NEW_ACTIVE_WAVES,
            Notification::Devices(_) => tag::DEVICES,
            Notification::Unknown(tag) => *tag,
        }
    }

    /// Decode one full packet
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != NOTIFICATION_PACKET_SIZE {
            return Err(Error::ShortRead {
                read: data.len(),
                expected: NOTIFICATION_PACKET_SIZE,
            });
        }
        let mut r = ByteReader::new(data);
        let tag = r.u32()?;
        let notification = match tag {
            tag::NEW_BINARY => Notification::NewBinary {
                kernel_name: r.fixed_str(MAX_KERNEL_NAME_LEN)?,
                work_group_size: WaveDim3::decode(&mut r)?,
                grid_size: WaveDim3::decode(&mut r)?,
            },
            tag::PREDISPATCH => Notification::Predispatch {
                state: PredispatchState::from_u32(r.u32()?),
                host_tid: r.i32()?,
            },
            tag::START_DEBUG_THREAD => Notification::StartDebugThread { tid: r.i32()? },
            tag::BREAKPOINT_HIT => {
                let mut ids = Vec::with_capacity(MAX_REPORTABLE_BREAKPOINTS);
                for _ in 0..MAX_REPORTABLE_BREAKPOINTS {
                    ids.push(r.i32()?);
                }
                let mut hit_counts = Vec::with_capacity(MAX_REPORTABLE_BREAKPOINTS);
                for _ in 0..MAX_REPORTABLE_BREAKPOINTS {
                    hit_counts.push(r.i32()?);
                }
                Notification::BreakpointHit {
                    ids,
                    hit_counts,
                    active_waves: r.u32()?,
                }
            }
            tag::BEGIN_DEBUGGING => Notification::BeginDebugging,
            tag::END_DEBUGGING => Notification::EndDebugging {
                dispatch_completed: r.u32()? != 0,
            },
            tag::FOCUS_CHANGE => Notification::FocusChange {
                work_group: WaveDim3::decode(&mut r)?,
                work_item: WaveDim3::decode(&mut r)?,
            },
            tag::AGENT_ERROR => Notification::AgentError { code: r.i32()? },
            tag::KILL_COMPLETE => Notification::KillComplete {
                successful: r.u32()? != 0,
            },
            tag::NEW_ACTIVE_WAVES => Notification::NewActiveWaves { count: r.u32()? },
            tag::DEVICES => {
                let count = (r.u32()? as usize).min(MAX_DEVICES);
                r.skip(4)?;
                let mut devices = Vec::with_capacity(count);
                for _ in 0..count {
                    devices.push(DeviceDescriptor::decode(&mut r)?);
                }
                Notification::Devices(devices)
            }
            other => Notification::Unknown(other),
        };
        Ok(notification)
    }

    /// Encode as the agent would. Used by loopback agents and tests.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(NOTIFICATION_PACKET_SIZE);
        w.u32(self.tag());
        match self {
            Notification::NewBinary {
                kernel_name,
                work_group_size,
                grid_size,
            } => {
                w.fixed_str(kernel_name, MAX_KERNEL_NAME_LEN);
                work_group_size.encode(&mut w);
                grid_size.encode(&mut w);
            }
            Notification::Predispatch { state, host_tid } => {
                w.u32(*state as u32).i32(*host_tid);
            }
            Notification::StartDebugThread { tid } => {
                w.i32(*tid);
            }
            Notification::BreakpointHit {
                ids,
                hit_counts,
                active_waves,
            } => {
                for i in 0..MAX_REPORTABLE_BREAKPOINTS {
                    w.i32(ids.get(i).copied().unwrap_or(-1));
                }
                for i in 0..MAX_REPORTABLE_BREAKPOINTS {
                    w.i32(hit_counts.get(i).copied().unwrap_or(0));
                }
                w.u32(*active_waves);
            }
            Notification::BeginDebugging | Notification::Unknown(_) => {}
            Notification::EndDebugging { dispatch_completed } => {
                w.u32(u32::from(*dispatch_completed));
            }
            Notification::FocusChange {
                work_group,
                work_item,
            } => {
                work_group.encode(&mut w);
                work_item.encode(&mut w);
            }
            Notification::AgentError { code } => {
                w.i32(*code);
            }
            Notification::KillComplete { successful } => {
                w.u32(u32::from(*successful));
            }
            Notification::NewActiveWaves { count } => {
                w.u32(*count);
            }
            Notification::Devices(devices) => {
                let devices = &devices[..devices.len().min(MAX_DEVICES)];
                w.u32(devices.len() as u32).zeros(4);
                for dev in devices {
                    dev.encode(&mut w);
                }
            }
        }
        w.pad_to(NOTIFICATION_PACKET_SIZE);
        w.into_bytes()
    }
}
