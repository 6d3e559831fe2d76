//! Agent → debugger notifications
//!
//! The host's event loop calls [`GpuDebugSession::handle_agent_event`] when
//! the notification FIFO polls readable. Each call performs one read; an
//! empty read is a spurious wake-up.

use crate::host::HostDebugger;
use crate::session::{notice, GpuDebugSession};
use crate::shm::read_binary_image;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};
use wavepoint_common::protocol::{Notification, PredispatchState, NOTIFICATION_PACKET_SIZE};
use wavepoint_common::{Error, Result, WaveDim3};

/// Result of one read attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Nothing to read
    Idle,
    /// Fewer bytes than one packet; the agent speaks another protocol version
    ShortRead(usize),
    Packet(Notification),
}

/// Read end of the notification FIFO
pub struct NotificationReader {
    reader: Box<dyn Read>,
    path: Option<PathBuf>,
    short_reads: u64,
}

impl NotificationReader {
    pub fn from_reader(reader: Box<dyn Read>) -> Self {
        Self {
            reader,
            path: None,
            short_reads: 0,
        }
    }

    /// Open the agent's FIFO without blocking for a writer
    pub fn open_fifo(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| {
                error!(target: "wavepoint_core::dispatcher", path = %path.display(), error = %e, "Failed to open notification FIFO");
                Error::Io(e)
            })?;
        debug!(target: "wavepoint_core::dispatcher", path = %path.display(), "Notification FIFO opened");
        Ok(Self {
            reader: Box::new(file),
            path: Some(path.to_path_buf()),
            short_reads: 0,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Short reads seen so far
    pub fn short_reads(&self) -> u64 {
        self.short_reads
    }

    /// One read of at most one packet
    pub fn poll(&mut self) -> Result<ReadOutcome> {
        let mut buf = vec![0u8; NOTIFICATION_PACKET_SIZE];
        let n = match self.reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                return Ok(ReadOutcome::Idle)
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if n == 0 {
            return Ok(ReadOutcome::Idle);
        }
        if n != NOTIFICATION_PACKET_SIZE {
            self.short_reads += 1;
            error!(
                target: "wavepoint_core::dispatcher",
                read = n,
                expected = NOTIFICATION_PACKET_SIZE,
                "Short read from agent, protocol mismatch"
            );
            return Ok(ReadOutcome::ShortRead(n));
        }
        Ok(ReadOutcome::Packet(Notification::decode(&buf)?))
    }
}

impl GpuDebugSession {
    /// Read and handle at most one notification
    pub fn handle_agent_event(&mut self, host: &mut dyn HostDebugger) -> Result<ReadOutcome> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(ReadOutcome::Idle);
        };
        let outcome = reader.poll()?;
        match &outcome {
            ReadOutcome::Idle => trace!(target: "wavepoint_core::dispatcher", "Spurious wake-up"),
            ReadOutcome::ShortRead(n) => notice(
                host,
                &format!(
                    "Incomplete notification from the agent ({} of {} bytes)",
                    n, NOTIFICATION_PACKET_SIZE
                ),
            ),
            ReadOutcome::Packet(notification) => self.dispatch_notification(host, notification)?,
        }
        Ok(outcome)
    }

    /// Apply one decoded notification
    pub fn dispatch_notification(
        &mut self,
        host: &mut dyn HostDebugger,
        notification: &Notification,
    ) -> Result<()> {
        debug!(target: "wavepoint_core::dispatcher", tag = notification.tag(), "Notification");
        match notification {
            Notification::NewBinary {
                kernel_name,
                work_group_size,
                grid_size,
            } => self.on_new_binary(host, kernel_name, *work_group_size, *grid_size)?,
            Notification::Predispatch { state, host_tid } => {
                self.agent.predispatch = *state;
                self.agent.dispatch_host_tid = Some(*host_tid);
                if *state == PredispatchState::Unknown {
                    warn!(target: "wavepoint_core::dispatcher", host_tid, "Unknown predispatch state");
                }
            }
            Notification::StartDebugThread { tid } => {
                self.agent.debug_thread_tid = Some(*tid);
                debug!(target: "wavepoint_core::dispatcher", tid, "Agent debug thread started");
            }
            Notification::BreakpointHit {
                ids,
                hit_counts,
                active_waves,
            } => {
                self.update_statistics(host, ids, hit_counts);
                self.agent.active_waves = *active_waves;
            }
            Notification::BeginDebugging => {
                self.agent.focus_device = true;
                self.agent.active_waves = 0;
            }
            Notification::EndDebugging { dispatch_completed } => {
                self.agent.focus_device = false;
                if *dispatch_completed {
                    self.dbginfo.set_unavailable();
                }
                self.agent.active_waves = 0;
                self.focus.clear();
                self.devices.unset_active();
                info!(target: "wavepoint_core::dispatcher", completed = dispatch_completed, "Debugging ended");
            }
            Notification::FocusChange {
                work_group,
                work_item,
            } => self.on_focus_change(host, *work_group, *work_item)?,
            Notification::AgentError { code } => {
                self.agent.last_agent_error = Some(*code);
                error!(target: "wavepoint_core::dispatcher", code, "Agent reported an error");
                notice(host, &format!("Agent Error: {}", code));
            }
            Notification::KillComplete { successful } => {
                if *successful {
                    self.agent.active_waves = 0;
                } else {
                    notice(host, "Could not kill waves safely");
                }
            }
            Notification::NewActiveWaves { count } => self.agent.active_waves = *count,
            Notification::Devices(devices) => self.devices.set_devices(devices.clone()),
            Notification::Unknown(tag) => {
                warn!(target: "wavepoint_core::dispatcher", tag, "Unsupported notification type");
            }
        }
        Ok(())
    }

    fn on_new_binary(
        &mut self,
        host: &mut dyn HostDebugger,
        kernel_name: &str,
        work_group_size: WaveDim3,
        grid_size: WaveDim3,
    ) -> Result<()> {
        self.dbginfo.invalidate();

        let max_size = self.config.shared_memory.binary.max_size;
        let loaded = match read_binary_image(self.shm.as_ref(), max_size) {
            Ok(Some(image)) => self.dbginfo.load(image),
            Ok(None) => Err(Error::DebugInfoUnavailable),
            Err(e) => Err(e),
        };
        let loaded = match loaded {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(target: "wavepoint_core::dispatcher", kernel = kernel_name, error = %e, "No debug information for dispatch");
                notice(
                    host,
                    "The code object for the current dispatch does not contain debug information",
                );
                None
            }
        };

        self.kernels
            .register_dispatch(kernel_name, work_group_size, grid_size);

        if loaded.is_some() && self.config.isa.show {
            if let Err(e) = self.save_isa() {
                warn!(target: "wavepoint_core::dispatcher", error = %e, "ISA dump failed");
            }
        }

        if let Err(e) = self.segments.refresh(self.shm.as_ref()) {
            warn!(target: "wavepoint_core::dispatcher", error = %e, "Could not read the loaded segments");
        }

        // existing breakpoints first; the flush needs the session they rebuild
        let adjusted = self.adjust_all(host)?;
        let flushed = self.flush_pending(host)?;
        info!(
            target: "wavepoint_core::dispatcher",
            kernel = kernel_name,
            debug_info = loaded.is_some(),
            adjusted,
            flushed,
            "New binary"
        );
        Ok(())
    }

    fn on_focus_change(
        &mut self,
        host: &mut dyn HostDebugger,
        work_group: WaveDim3,
        work_item: WaveDim3,
    ) -> Result<()> {
        let waves = self.read_waves()?;
        let change = self.focus.set_focus(work_group, work_item, &waves);
        if change.is_visible() {
            notice(host, &self.focus.describe());
        }
        debug!(target: "wavepoint_core::dispatcher", ?change, "Agent moved focus");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct WouldBlock;

    impl Read for WouldBlock {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::WouldBlock, "empty"))
        }
    }

    #[test]
    fn test_empty_and_would_block_are_idle() {
        let mut r = NotificationReader::from_reader(Box::new(Cursor::new(Vec::new())));
        assert_eq!(r.poll().unwrap(), ReadOutcome::Idle);
        let mut r = NotificationReader::from_reader(Box::new(WouldBlock));
        assert_eq!(r.poll().unwrap(), ReadOutcome::Idle);
        assert_eq!(r.short_reads(), 0);
    }

    #[test]
    fn test_one_packet_per_poll() {
        let mut bytes = Notification::NewActiveWaves { count: 3 }.encode();
        bytes.extend(Notification::BeginDebugging.encode());
        let mut r = NotificationReader::from_reader(Box::new(Cursor::new(bytes)));
        assert_eq!(
            r.poll().unwrap(),
            ReadOutcome::Packet(Notification::NewActiveWaves { count: 3 })
        );
        assert_eq!(r.poll().unwrap(), ReadOutcome::Packet(Notification::BeginDebugging));
        assert_eq!(r.poll().unwrap(), ReadOutcome::Idle);
    }

    #[test]
    fn test_short_read_counted() {
        let mut r = NotificationReader::from_reader(Box::new(Cursor::new(vec![1u8; 12])));
        assert_eq!(r.poll().unwrap(), ReadOutcome::ShortRead(12));
        assert_eq!(r.short_reads(), 1);
        assert_eq!(r.poll().unwrap(), ReadOutcome::Idle);
        assert_eq!(r.short_reads(), 1);
    }

    #[test]
    fn test_unknown_tag_decodes() {
        let bytes = Notification::Unknown(77).encode();
        let mut r = NotificationReader::from_reader(Box::new(Cursor::new(bytes)));
        assert_eq!(r.poll().unwrap(), ReadOutcome::Packet(Notification::Unknown(77)));
    }
}
