//! One GPU debug session
//!
//! Everything the subsystem remembers lives here and is torn down with the
//! session: the debug-info cache, loaded segments, pending requests, kernel
//! catalog, focus and the two agent channels.

use crate::channel::AgentCommandChannel;
use crate::config::SessionConfig;
use crate::dbginfo::{save_read_only, DebugInfoBackend, DebugInfoResolver};
use crate::device::DeviceTable;
use crate::dispatcher::NotificationReader;
use crate::dwarf::DwarfBackend;
use crate::focus::{is_active, parse_focus_args, FocusChange, FocusTracker};
use crate::host::HostDebugger;
use crate::kernel::KernelCatalog;
use crate::pending::PendingRequestCache;
use crate::segments::SegmentTranslator;
use crate::shm::{Region, SharedMemory, SysvSharedMemory};
use std::fs;
use tracing::{debug, info, warn};
use wavepoint_common::protocol::{CommandPacket, LoggingDirective, PredispatchState};
use wavepoint_common::{Result, WaveInfo};

/// Prefix of every line shown to the user
pub const NOTICE_PREFIX: &str = "[ROCm-gdb]: ";

pub(crate) fn notice(host: &mut dyn HostDebugger, text: &str) {
    host.notice(&format!("{}{}", NOTICE_PREFIX, text));
}

/// What the agent last told us about the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentState {
    /// Between BeginDebugging and EndDebugging
    pub focus_device: bool,
    pub active_waves: u32,
    pub predispatch: PredispatchState,
    /// Host thread that launched the dispatch
    pub dispatch_host_tid: Option<i32>,
    pub debug_thread_tid: Option<i32>,
    pub last_agent_error: Option<i32>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            focus_device: false,
            active_waves: 0,
            predispatch: PredispatchState::Unknown,
            dispatch_host_tid: None,
            debug_thread_tid: None,
            last_agent_error: None,
        }
    }
}

pub struct GpuDebugSession {
    pub(crate) config: SessionConfig,
    pub(crate) dbginfo: DebugInfoResolver,
    pub(crate) segments: SegmentTranslator,
    pub(crate) shm: Box<dyn SharedMemory>,
    pub(crate) pending: PendingRequestCache,
    pub(crate) channel: AgentCommandChannel,
    pub(crate) reader: Option<NotificationReader>,
    pub(crate) kernels: KernelCatalog,
    pub(crate) focus: FocusTracker,
    pub(crate) devices: DeviceTable,
    pub(crate) agent: AgentState,
}

impl GpuDebugSession {
    pub fn new(
        config: SessionConfig,
        backend: Box<dyn DebugInfoBackend>,
        shm: Box<dyn SharedMemory>,
    ) -> Self {
        let dbginfo = DebugInfoResolver::new(backend, config.source_dump_path.clone());
        let pending = PendingRequestCache::new(config.pending_capacity);
        Self {
            config,
            dbginfo,
            segments: SegmentTranslator::new(),
            shm,
            pending,
            channel: AgentCommandChannel::closed(),
            reader: None,
            kernels: KernelCatalog::new(),
            focus: FocusTracker::new(),
            devices: DeviceTable::new(),
            agent: AgentState::default(),
        }
    }

    /// DWARF debug info and System V shared memory
    pub fn with_defaults(config: SessionConfig) -> Self {
        let shm = SysvSharedMemory::new(config.shared_memory.clone());
        Self::new(config, Box::new(DwarfBackend), Box::new(shm))
    }

    /// First setup stage: start listening to the agent
    pub fn attach_notifications(&mut self, reader: NotificationReader) {
        self.reader = Some(reader);
        debug!(target: "wavepoint_core::session", "Notification reader attached");
    }

    pub fn attach_notification_fifo(&mut self) -> Result<()> {
        let reader = NotificationReader::open_fifo(&self.config.fifo.agent_to_gdb)?;
        self.attach_notifications(reader);
        Ok(())
    }

    /// Second setup stage: the agent is ready for commands. Buffered
    /// breakpoints go out now; returns how many.
    pub fn open_command_channel(
        &mut self,
        host: &mut dyn HostDebugger,
        channel: AgentCommandChannel,
    ) -> Result<usize> {
        self.channel = channel;
        self.kernels.clear_all();
        if self.config.agent_logging || self.config.agent_logging_forced() {
            self.set_agent_logging(host, true)?;
        }
        let flushed = self.flush_pending(host)?;
        info!(target: "wavepoint_core::session", flushed, "Agent command channel open");
        Ok(flushed)
    }

    pub fn open_command_fifo(&mut self, host: &mut dyn HostDebugger) -> Result<usize> {
        let channel = AgentCommandChannel::open_fifo(&self.config.fifo.gdb_to_agent)?;
        self.open_command_channel(host, channel)
    }

    pub fn is_initialized(&self) -> bool {
        self.channel.is_open()
    }

    /// Turn the agent's logging on or off. Off is refused while the logging
    /// environment variable is set.
    pub fn set_agent_logging(&mut self, host: &mut dyn HostDebugger, enable: bool) -> Result<()> {
        if !enable && self.config.agent_logging_forced() {
            notice(
                host,
                &format!(
                    "Agent logging stays on while {} is set",
                    self.config.agent_logging_env
                ),
            );
            return Ok(());
        }
        self.config.agent_logging = enable;
        if !self.channel.is_open() {
            debug!(target: "wavepoint_core::session", enable, "Agent logging recorded for channel open");
            return Ok(());
        }
        let directive = if enable {
            LoggingDirective::EnableAll
        } else {
            LoggingDirective::DisableAll
        };
        self.channel.send(&CommandPacket::set_logging(directive))
    }

    /// Ask the agent to kill every live wave. Completion arrives later as a
    /// KillComplete notification. Returns false when there was nothing to kill.
    pub fn kill_all_waves(&mut self, host: &mut dyn HostDebugger, is_quit: bool) -> Result<bool> {
        if !self.agent.focus_device || self.agent.active_waves == 0 {
            return Ok(false);
        }
        let expression = format!(
            "{}({})",
            self.config.inferior_functions.kill,
            i32::from(is_quit)
        );
        host.evaluate_expression(&expression)?;
        info!(target: "wavepoint_core::session", waves = self.agent.active_waves, is_quit, "Kill requested");
        Ok(true)
    }

    /// Handle `wg:x,y,z wi:x,y,z` from the focus-switch command
    pub fn switch_focus(&mut self, host: &mut dyn HostDebugger, args: &str) -> Result<FocusChange> {
        let (work_group, work_item) = parse_focus_args(args)?;
        let waves = self.read_waves()?;
        if !is_active(&waves, work_group, work_item) {
            notice(host, "work-group and work-item provided not active");
            return Ok(FocusChange::Rejected);
        }

        let expression = format!(
            "{}({},{},{},{},{},{})",
            self.config.inferior_functions.set_focus,
            work_group.x,
            work_group.y,
            work_group.z,
            work_item.x,
            work_item.y,
            work_item.z
        );
        host.evaluate_expression(&expression)?;

        let change = self.focus.set_focus(work_group, work_item, &waves);
        if change.is_visible() {
            notice(host, &self.focus.describe());
        }
        Ok(change)
    }

    /// Select the host thread that launched the current dispatch
    pub fn switch_to_dispatch_thread(&self, host: &mut dyn HostDebugger) -> bool {
        match self.agent.dispatch_host_tid {
            Some(tid) if host.select_host_thread(tid) => true,
            Some(tid) => {
                warn!(target: "wavepoint_core::session", tid, "Dispatch thread not found");
                false
            }
            None => false,
        }
    }

    /// Live waves from the wave-info region. No dispatch means no waves.
    pub fn read_waves(&self) -> Result<Vec<WaveInfo>> {
        let count = self.agent.active_waves as usize;
        if count == 0 {
            return Ok(Vec::new());
        }
        match self.shm.read_region(Region::WaveInfo)? {
            Some(raw) => WaveInfo::decode_table(&raw, count),
            None => Ok(Vec::new()),
        }
    }

    /// Copy the agent's ISA dump next to the saved source
    pub(crate) fn save_isa(&self) -> Result<()> {
        let isa = &self.config.isa;
        let bytes = fs::read(&isa.agent_isa_path)?;
        save_read_only(&isa.dump_path, &bytes)?;
        debug!(target: "wavepoint_core::session", path = %isa.dump_path.display(), "ISA saved");
        Ok(())
    }

    /// Drop both channels, unlink the FIFOs and remove the shared regions
    pub fn close(&mut self) {
        let command_path = self.channel.path().map(|p| p.to_path_buf());
        self.channel.close();
        let notify_path = self
            .reader
            .take()
            .and_then(|r| r.path().map(|p| p.to_path_buf()));

        for path in command_path.into_iter().chain(notify_path) {
            if let Err(e) = fs::remove_file(&path) {
                debug!(target: "wavepoint_core::session", path = %path.display(), error = %e, "FIFO not removed");
            }
        }
        for region in Region::ALL {
            if let Err(e) = self.shm.remove_region(region) {
                warn!(target: "wavepoint_core::session", ?region, error = %e, "Could not remove region");
            }
        }
        self.segments.reset();
        self.dbginfo.invalidate();
        info!(target: "wavepoint_core::session", "Session closed");
    }

    /// Release per-process state when the inferior exits
    pub fn final_cleanup(&mut self) {
        self.kernels.clear_all();
        if !self.pending.is_empty() {
            warn!(
                target: "wavepoint_core::session",
                pending = self.pending.len(),
                "Breakpoints never reached the agent"
            );
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn agent(&self) -> &AgentState {
        &self.agent
    }

    pub fn kernels(&self) -> &KernelCatalog {
        &self.kernels
    }

    pub fn focus(&self) -> &FocusTracker {
        &self.focus
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn pending(&self) -> &PendingRequestCache {
        &self.pending
    }

    pub fn segments(&self) -> &SegmentTranslator {
        &self.segments
    }

    pub fn dbginfo(&self) -> &DebugInfoResolver {
        &self.dbginfo
    }

    pub fn channel(&self) -> &AgentCommandChannel {
        &self.channel
    }

    pub fn notification_reader(&self) -> Option<&NotificationReader> {
        self.reader.as_ref()
    }
}
