//! Session configuration
//!
//! Every field has a default matching the agent's well-known values, so an
//! empty TOML document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wavepoint_common::{Error, LogConfig, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Literal that marks breakpoint text as a GPU breakpoint
    #[serde(default = "default_prefix")]
    pub breakpoint_prefix: String,
    /// Breakpoints that can be buffered before the agent is ready
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,
    /// File the kernel's high-level source is saved to
    #[serde(default = "default_source_dump_path")]
    pub source_dump_path: PathBuf,
    /// Ask the agent to log everything
    #[serde(default)]
    pub agent_logging: bool,
    /// When this environment variable is set the agent's logging is never turned off
    #[serde(default = "default_agent_logging_env")]
    pub agent_logging_env: String,
    #[serde(default)]
    pub fifo: FifoConfig,
    #[serde(default)]
    pub shared_memory: SharedMemoryConfig,
    #[serde(default)]
    pub isa: IsaConfig,
    #[serde(default)]
    pub inferior_functions: InferiorFunctions,
    #[serde(default = "LogConfig::host")]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoConfig {
    #[serde(default = "default_gdb_to_agent")]
    pub gdb_to_agent: PathBuf,
    #[serde(default = "default_agent_to_gdb")]
    pub agent_to_gdb: PathBuf,
}

/// Key and maximum size of one shared-memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub key: i32,
    pub max_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedMemoryConfig {
    #[serde(default = "default_binary_region")]
    pub binary: RegionConfig,
    #[serde(default = "default_wave_info_region")]
    pub wave_info: RegionConfig,
    #[serde(default = "default_loadmap_region")]
    pub loadmap: RegionConfig,
    #[serde(default = "default_momentary_region")]
    pub momentary: RegionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsaConfig {
    /// Copy the agent's ISA dump after every new binary
    #[serde(default)]
    pub show: bool,
    #[serde(default = "default_agent_isa_path")]
    pub agent_isa_path: PathBuf,
    #[serde(default = "default_isa_dump_path")]
    pub dump_path: PathBuf,
}

/// Names of the agent-side functions invoked through expression evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferiorFunctions {
    #[serde(default = "default_set_focus_fn")]
    pub set_focus: String,
    #[serde(default = "default_kill_fn")]
    pub kill: String,
}

fn default_prefix() -> String {
    "rocm".to_string()
}

fn default_pending_capacity() -> usize {
    1024
}

fn default_source_dump_path() -> PathBuf {
    PathBuf::from("temp_source")
}

fn default_agent_logging_env() -> String {
    "ROCM_GDB_ENABLE_LOG".to_string()
}

fn default_gdb_to_agent() -> PathBuf {
    PathBuf::from("fifo-gdb-w")
}

fn default_agent_to_gdb() -> PathBuf {
    PathBuf::from("fifo-agent-w")
}

fn default_binary_region() -> RegionConfig {
    RegionConfig {
        key: 1234,
        max_size: 8 << 20,
    }
}

fn default_wave_info_region() -> RegionConfig {
    RegionConfig {
        key: 2222,
        max_size: 4 << 20,
    }
}

fn default_loadmap_region() -> RegionConfig {
    RegionConfig {
        key: 3333,
        max_size: 1 << 20,
    }
}

fn default_momentary_region() -> RegionConfig {
    RegionConfig {
        key: 4444,
        max_size: 1 << 20,
    }
}

fn default_agent_isa_path() -> PathBuf {
    PathBuf::from("hsail_isa_dump.txt")
}

fn default_isa_dump_path() -> PathBuf {
    PathBuf::from("temp_isa")
}

fn default_set_focus_fn() -> String {
    "SetHsailThreadCmdInfo".to_string()
}

fn default_kill_fn() -> String {
    "KillHsailDebug".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            breakpoint_prefix: default_prefix(),
            pending_capacity: default_pending_capacity(),
            source_dump_path: default_source_dump_path(),
            agent_logging: false,
            agent_logging_env: default_agent_logging_env(),
            fifo: FifoConfig::default(),
            shared_memory: SharedMemoryConfig::default(),
            isa: IsaConfig::default(),
            inferior_functions: InferiorFunctions::default(),
            logging: LogConfig::host(),
        }
    }
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            gdb_to_agent: default_gdb_to_agent(),
            agent_to_gdb: default_agent_to_gdb(),
        }
    }
}

impl Default for SharedMemoryConfig {
    fn default() -> Self {
        Self {
            binary: default_binary_region(),
            wave_info: default_wave_info_region(),
            loadmap: default_loadmap_region(),
            momentary: default_momentary_region(),
        }
    }
}

impl Default for IsaConfig {
    fn default() -> Self {
        Self {
            show: false,
            agent_isa_path: default_agent_isa_path(),
            dump_path: default_isa_dump_path(),
        }
    }
}

impl Default for InferiorFunctions {
    fn default() -> Self {
        Self {
            set_focus: default_set_focus_fn(),
            kill: default_kill_fn(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.breakpoint_prefix.trim().is_empty() {
            return Err(Error::Config("breakpoint_prefix must not be empty".into()));
        }
        if self.pending_capacity == 0 {
            return Err(Error::Config("pending_capacity must be positive".into()));
        }
        Ok(())
    }

    /// True when the agent's logging must stay on regardless of `agent_logging`
    pub fn agent_logging_forced(&self) -> bool {
        std::env::var_os(&self.agent_logging_env).is_some()
    }
}
