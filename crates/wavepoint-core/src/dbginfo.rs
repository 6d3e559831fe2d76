//! Debug-information resolver
//!
//! Owns the one debug-info session built from the code object the agent
//! published for the current dispatch.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;
use tracing::{debug, info, warn};
use wavepoint_common::protocol::MAX_SOURCE_LINE_LEN;
use wavepoint_common::{Error, Result};

/// Stand-in file name the line table uses for the embedded kernel text
const EMBEDDED_IMAGE_FILE: &str = "hsa::self().elf";

/// Errors reported by a debug-info backend
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum DbgInfoError {
    #[error("location not found")]
    NotFound,
    #[error("binary has no high-level section")]
    NoHighLevelBinary,
    #[error("binary has no debug information")]
    NoDebugInfo,
    #[error("malformed debug information: {0}")]
    Malformed(String),
}

impl DbgInfoError {
    pub fn code(&self) -> i32 {
        match self {
            DbgInfoError::NotFound => 1,
            DbgInfoError::NoHighLevelBinary => 2,
            DbgInfoError::NoDebugInfo => 3,
            DbgInfoError::Malformed(_) => 4,
        }
    }
}

impl From<DbgInfoError> for Error {
    fn from(e: DbgInfoError) -> Self {
        Error::DebugInfo {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// How the code object is packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    /// Device code plus the embedded high-level kernel text
    TwoLevel,
    /// Device code with a line table only
    SingleLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocation {
    pub file: Option<String>,
    pub line: u64,
}

/// Queries over one loaded code object
pub trait DebugInfoSession {
    /// Closest line at or after `line` that has code
    fn nearest_mapped_line(
        &self,
        file: Option<&str>,
        line: u64,
    ) -> std::result::Result<CodeLocation, DbgInfoError>;

    /// ELF-relative addresses of `location`, lowest first
    fn line_to_addresses(
        &self,
        location: &CodeLocation,
    ) -> std::result::Result<Vec<u64>, DbgInfoError>;

    fn address_to_line(&self, addr: u64) -> std::result::Result<CodeLocation, DbgInfoError>;

    fn all_mapped_addresses(&self) -> Vec<u64>;

    /// Where execution may stop after stepping over (or out of) the line at `pc`
    fn step_addresses(
        &self,
        pc: u64,
        step_out: bool,
    ) -> std::result::Result<Vec<u64>, DbgInfoError>;

    /// Kernel text carried inside a two-level binary
    fn source_text(&self) -> Option<&str>;

    fn first_file_name(&self) -> Option<&str>;
}

/// Factory for sessions; the library behind it is swappable
pub trait DebugInfoBackend {
    fn open(
        &self,
        image: &[u8],
        format: BinaryFormat,
    ) -> std::result::Result<Box<dyn DebugInfoSession>, DbgInfoError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugInfoStatus {
    Unavailable,
    Available,
}

/// Result of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedInfo {
    pub format: BinaryFormat,
    /// Set when kernel text was saved to disk
    pub saved_source: Option<PathBuf>,
}

pub struct DebugInfoResolver {
    backend: Box<dyn DebugInfoBackend>,
    session: Option<Box<dyn DebugInfoSession>>,
    status: DebugInfoStatus,
    source_dump_path: PathBuf,
    active_file: String,
}

impl DebugInfoResolver {
    pub fn new(backend: Box<dyn DebugInfoBackend>, source_dump_path: impl Into<PathBuf>) -> Self {
        let source_dump_path = source_dump_path.into();
        let active_file = source_dump_path.display().to_string();
        Self {
            backend,
            session: None,
            status: DebugInfoStatus::Unavailable,
            source_dump_path,
            active_file,
        }
    }

    pub fn status(&self) -> DebugInfoStatus {
        self.status
    }

    pub fn is_available(&self) -> bool {
        self.status == DebugInfoStatus::Available && self.session.is_some()
    }

    /// Mark the current session's data stale without dropping the session
    pub fn set_unavailable(&mut self) {
        self.status = DebugInfoStatus::Unavailable;
    }

    /// Drop the cached session
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!(target: "wavepoint_core::dbginfo", "Debug-info session released");
        }
        self.status = DebugInfoStatus::Unavailable;
    }

    /// File name used for implicit-file source breakpoints
    pub fn active_file(&self) -> &str {
        &self.active_file
    }

    pub fn session(&self) -> Option<&dyn DebugInfoSession> {
        self.session.as_deref()
    }

    /// Build a session from `image`, two-level first, single-level on fallback.
    ///
    /// On failure the image is dropped and the resolver stays unavailable;
    /// there is no retry.
    pub fn load(&mut self, image: Vec<u8>) -> Result<LoadedInfo> {
        self.invalidate();

        let (session, format) = match self.backend.open(&image, BinaryFormat::TwoLevel) {
            Ok(session) => (session, BinaryFormat::TwoLevel),
            Err(DbgInfoError::NoHighLevelBinary) => {
                debug!(target: "wavepoint_core::dbginfo", "No high-level section, trying single-level");
                let session = self.backend.open(&image, BinaryFormat::SingleLevel)?;
                (session, BinaryFormat::SingleLevel)
            }
            Err(e) => return Err(e.into()),
        };
        drop(image);

        let saved_source = match session.source_text() {
            Some(text) => {
                // line lookups do not need the file; only the host's source view does
                self.active_file = self.source_dump_path.display().to_string();
                match save_read_only(&self.source_dump_path, text.as_bytes()) {
                    Ok(()) => Some(self.source_dump_path.clone()),
                    Err(e) => {
                        warn!(
                            target: "wavepoint_core::dbginfo",
                            path = %self.source_dump_path.display(),
                            error = %e,
                            "Could not save kernel source"
                        );
                        None
                    }
                }
            }
            None => {
                if let Some(first) = session.first_file_name() {
                    self.active_file = first.to_string();
                }
                None
            }
        };

        info!(
            target: "wavepoint_core::dbginfo",
            ?format,
            active_file = %self.active_file,
            "Debug information loaded"
        );
        self.session = Some(session);
        self.status = DebugInfoStatus::Available;
        Ok(LoadedInfo {
            format,
            saved_source,
        })
    }

    fn require(&self) -> Result<&dyn DebugInfoSession> {
        self.session.as_deref().ok_or(Error::DebugInfoUnavailable)
    }

    /// Resolve a requested line to the nearest line with code.
    ///
    /// `Ok(None)` means the line is not mapped, a normal outcome.
    pub fn resolve_line(&self, file: Option<&str>, line: u64) -> Result<Option<CodeLocation>> {
        match self.require()?.nearest_mapped_line(file, line) {
            Ok(location) => Ok(Some(location)),
            Err(DbgInfoError::NotFound) => Ok(None),
            Err(e) => {
                warn!(target: "wavepoint_core::dbginfo", line, error = %e, "Line resolution failed");
                Err(e.into())
            }
        }
    }

    /// First ELF-relative address for `location`. One mapped address per
    /// source line is the breakpoint granularity.
    pub fn first_address(&self, location: &CodeLocation) -> Result<Option<u64>> {
        match self.require()?.line_to_addresses(location) {
            Ok(addrs) => Ok(addrs.first().copied()),
            Err(DbgInfoError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Line and file for an ELF-relative address
    pub fn pc_info(&self, elf_addr: u64) -> Option<(u64, String)> {
        let location = self.session()?.address_to_line(elf_addr).ok()?;
        let file = match location.file {
            Some(file) if !file.contains(EMBEDDED_IMAGE_FILE) => file,
            _ => self.active_file.clone(),
        };
        Some((location.line, file))
    }

    /// Trimmed text of source line `line` (1-based) for breakpoint packets
    pub fn source_line(&self, line: u64) -> String {
        let text = self
            .session()
            .and_then(|s| s.source_text())
            .and_then(|text| nth_line(text, line));
        extract_statement(text.unwrap_or(""))
    }
}

fn nth_line(text: &str, line: u64) -> Option<&str> {
    let index = usize::try_from(line.checked_sub(1)?).ok()?;
    text.lines().nth(index)
}

/// Leading whitespace dropped, cut after the first `;`, bounded to the packet
/// field, never empty.
pub fn extract_statement(line: &str) -> String {
    let line = line.trim_start();
    let line = line.split(['\n', '\r']).next().unwrap_or("");
    let line = match line.find(';') {
        Some(i) => &line[..=i],
        None => line,
    };
    let mut end = line.len().min(MAX_SOURCE_LINE_LEN - 1);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    if end == 0 {
        " ".to_string()
    } else {
        line[..end].to_string()
    }
}

/// Write `bytes` to `path` and mark it read-only, replacing any previous copy
pub(crate) fn save_read_only(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.exists() {
        let mut perms = fs::metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    fs::write(path, bytes)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)?;
    Ok(())
}
