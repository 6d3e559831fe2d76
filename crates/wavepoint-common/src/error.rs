//! Error types for wavepoint

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid GPU breakpoint: {0}")]
    BreakpointSyntax(String),

    #[error("Invalid breakpoint condition: {0}")]
    ConditionSyntax(String),

    #[error("Invalid focus arguments: {0}")]
    FocusSyntax(String),

    #[error("Debug information error (code {code}): {message}")]
    DebugInfo { code: i32, message: String },

    #[error("Debug information is not available for the current dispatch")]
    DebugInfoUnavailable,

    #[error("No executing segment found")]
    NoExecutingSegment,

    #[error("Agent is not ready")]
    AgentNotReady,

    #[error("Breakpoint cache is full ({capacity} entries)")]
    CacheFull { capacity: usize },

    #[error("Short write to agent: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Short read from agent: {read} of {expected} bytes")]
    ShortRead { read: usize, expected: usize },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// True for failures that break the closed agent contract.
    ///
    /// The session stops talking to the agent after one of these.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::ShortWrite { .. } | Error::ShortRead { .. } | Error::InvalidPacket(_)
        )
    }
}
