//! Debugger → agent command channel

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace};
use wavepoint_common::protocol::{CommandPacket, COMMAND_PACKET_SIZE};
use wavepoint_common::{Error, Result};

/// Write end of the command FIFO.
///
/// Every packet goes out in one write. Fire-and-forget: a successful write
/// does not mean the agent has applied the command.
pub struct AgentCommandChannel {
    writer: Option<Box<dyn Write>>,
    path: Option<PathBuf>,
    sent: u64,
}

impl Default for AgentCommandChannel {
    fn default() -> Self {
        Self::closed()
    }
}

impl AgentCommandChannel {
    pub fn closed() -> Self {
        Self {
            writer: None,
            path: None,
            sent: 0,
        }
    }

    pub fn from_writer(writer: Box<dyn Write>) -> Self {
        Self {
            writer: Some(writer),
            path: None,
            sent: 0,
        }
    }

    /// Open the FIFO the agent reads commands from
    pub fn open_fifo(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().write(true).open(path).map_err(|e| {
            error!(target: "wavepoint_core::channel", path = %path.display(), error = %e, "Failed to open command FIFO");
            Error::Io(e)
        })?;
        debug!(target: "wavepoint_core::channel", path = %path.display(), "Command FIFO opened");
        Ok(Self {
            writer: Some(Box::new(file)),
            path: Some(path.to_path_buf()),
            sent: 0,
        })
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn packets_sent(&self) -> u64 {
        self.sent
    }

    /// Validate and write one packet.
    ///
    /// An invalid packet or a partial write breaks the protocol; the channel
    /// is closed and no further commands are sent.
    pub fn send(&mut self, packet: &CommandPacket) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::AgentNotReady)?;

        if let Err(e) = packet.validate() {
            error!(target: "wavepoint_core::channel", tag = ?packet.tag, error = %e, "Refusing invalid packet");
            self.close();
            return Err(e);
        }

        let bytes = packet.encode();
        let written = match writer.write(&bytes) {
            Ok(n) => n,
            Err(e) => {
                error!(target: "wavepoint_core::channel", error = %e, "Command write failed");
                self.close();
                return Err(Error::Io(e));
            }
        };
        if written != COMMAND_PACKET_SIZE {
            error!(
                target: "wavepoint_core::channel",
                written,
                expected = COMMAND_PACKET_SIZE,
                "Short write to agent"
            );
            self.close();
            return Err(Error::ShortWrite {
                written,
                expected: COMMAND_PACKET_SIZE,
            });
        }
        writer.flush()?;

        self.sent += 1;
        trace!(
            target: "wavepoint_core::channel",
            tag = ?packet.tag,
            id = packet.breakpoint_id,
            pc = packet.pc,
            "Command sent"
        );
        Ok(())
    }

    pub fn close(&mut self) {
        if self.writer.take().is_some() {
            debug!(target: "wavepoint_core::channel", "Command channel closed");
        }
    }
}
