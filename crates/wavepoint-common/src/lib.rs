//! wavepoint common types
//!
//! Wire protocol, shared-memory record layouts, errors and logging shared
//! by the debugger-side engine and the diagnostic CLI.

pub mod error;
pub mod logging;
pub mod protocol;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
pub use logging::{init_debug_logging, init_host_logging, init_logging, LogConfig};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
