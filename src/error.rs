//! Error types and the numeric status taxonomy.
//!
//! Every fallible operation returns [`Result`]. The numeric codes are kept
//! stable so they can be logged, stored, or passed across an FFI boundary:
//!
//! | Range      | Group        |
//! |------------|--------------|
//! | `1..=2`    | success with information (converged, max generations) |
//! | `0`        | success      |
//! | `-1..=-5`  | general      |
//! | `-10..=-12`| genome       |
//! | `-20..=-22`| population   |
//! | `-30..=-32`| configuration|
//! | `-40..=-42`| file I/O     |

use std::io;
use std::path::PathBuf;

use crate::compute::gpu::GpuError;

/// Numeric status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Converged = 1,
    MaxGenerations = 2,

    Unknown = -1,
    NullPointer = -2,
    OutOfMemory = -3,
    InvalidArg = -4,
    NotImplemented = -5,

    GenomeEmpty = -10,
    GenomeTooLarge = -11,
    GenomeInvalid = -12,

    PopulationEmpty = -20,
    PopulationFull = -21,
    PopulationSize = -22,

    ConfigNotFound = -30,
    ConfigParse = -31,
    ConfigInvalid = -32,

    FileNotFound = -40,
    FileRead = -41,
    FileWrite = -42,
}

impl ErrorCode {
    /// Look up a code by its numeric value.
    pub fn from_i32(code: i32) -> Option<Self> {
        let code = match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::Converged,
            2 => ErrorCode::MaxGenerations,
            -1 => ErrorCode::Unknown,
            -2 => ErrorCode::NullPointer,
            -3 => ErrorCode::OutOfMemory,
            -4 => ErrorCode::InvalidArg,
            -5 => ErrorCode::NotImplemented,
            -10 => ErrorCode::GenomeEmpty,
            -11 => ErrorCode::GenomeTooLarge,
            -12 => ErrorCode::GenomeInvalid,
            -20 => ErrorCode::PopulationEmpty,
            -21 => ErrorCode::PopulationFull,
            -22 => ErrorCode::PopulationSize,
            -30 => ErrorCode::ConfigNotFound,
            -31 => ErrorCode::ConfigParse,
            -32 => ErrorCode::ConfigInvalid,
            -40 => ErrorCode::FileNotFound,
            -41 => ErrorCode::FileRead,
            -42 => ErrorCode::FileWrite,
            _ => return None,
        };
        Some(code)
    }

    /// Numeric value of this code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Positive codes and zero are successes.
    pub fn is_success(self) -> bool {
        self.as_i32() >= 0
    }

    /// Human-readable message.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "Success",
            ErrorCode::Converged => "Optimization converged",
            ErrorCode::MaxGenerations => "Maximum generations reached",
            ErrorCode::Unknown => "Unknown error",
            ErrorCode::NullPointer => "Null pointer argument",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::InvalidArg => "Invalid argument",
            ErrorCode::NotImplemented => "Not implemented",
            ErrorCode::GenomeEmpty => "Genome is empty",
            ErrorCode::GenomeTooLarge => "Genome too large",
            ErrorCode::GenomeInvalid => "Invalid genome",
            ErrorCode::PopulationEmpty => "Population is empty",
            ErrorCode::PopulationFull => "Population is full",
            ErrorCode::PopulationSize => "Invalid population size",
            ErrorCode::ConfigNotFound => "Configuration file not found",
            ErrorCode::ConfigParse => "Configuration parse error",
            ErrorCode::ConfigInvalid => "Invalid configuration",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::FileRead => "File read error",
            ErrorCode::FileWrite => "File write error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw numeric code to its message.
pub fn error_string(code: i32) -> &'static str {
    ErrorCode::from_i32(code)
        .map(ErrorCode::as_str)
        .unwrap_or("Undefined error code")
}

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EvoError {
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Out of memory: could not reserve {0} bytes")]
    OutOfMemory(usize),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Genome is empty")]
    GenomeEmpty,

    #[error("Genome too large: {size} bytes exceeds limit of {limit}")]
    GenomeTooLarge { size: usize, limit: usize },

    #[error("Invalid genome: {0}")]
    GenomeInvalid(String),

    #[error("Population is empty")]
    PopulationEmpty,

    #[error("Population is full (capacity {0})")]
    PopulationFull(usize),

    #[error("Invalid population size: {0}")]
    PopulationSize(String),

    #[error("Domain registry is full ({0} slots)")]
    RegistryFull(usize),

    #[error("Domain not registered: {0}")]
    DomainNotFound(String),

    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("File read error: {0}")]
    FileRead(#[source] io::Error),

    #[error("File write error: {0}")]
    FileWrite(#[source] io::Error),

    #[error("Checkpoint checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("Incompatible checkpoint version {found:?} (reader supports {supported})")]
    VersionMismatch {
        found: String,
        supported: &'static str,
    },

    #[error("Malformed checkpoint: {0}")]
    CheckpointFormat(String),

    #[error("Accelerator error: {0}")]
    Gpu(#[from] GpuError),
}

impl EvoError {
    /// Numeric code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EvoError::InvalidArg(_) => ErrorCode::InvalidArg,
            EvoError::OutOfMemory(_) => ErrorCode::OutOfMemory,
            EvoError::NotImplemented(_) => ErrorCode::NotImplemented,
            EvoError::GenomeEmpty => ErrorCode::GenomeEmpty,
            EvoError::GenomeTooLarge { .. } => ErrorCode::GenomeTooLarge,
            EvoError::GenomeInvalid(_) => ErrorCode::GenomeInvalid,
            EvoError::PopulationEmpty => ErrorCode::PopulationEmpty,
            EvoError::PopulationFull(_) | EvoError::RegistryFull(_) => ErrorCode::PopulationFull,
            EvoError::PopulationSize(_) => ErrorCode::PopulationSize,
            EvoError::ConfigNotFound(_) | EvoError::DomainNotFound(_) => ErrorCode::ConfigNotFound,
            EvoError::ConfigParse(_) => ErrorCode::ConfigParse,
            EvoError::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            EvoError::FileNotFound(_) => ErrorCode::FileNotFound,
            EvoError::FileRead(_)
            | EvoError::ChecksumMismatch { .. }
            | EvoError::VersionMismatch { .. }
            | EvoError::CheckpointFormat(_) => ErrorCode::FileRead,
            EvoError::FileWrite(_) => ErrorCode::FileWrite,
            EvoError::Gpu(_) => ErrorCode::Unknown,
        }
    }

    pub(crate) fn invalid_arg(msg: impl Into<String>) -> Self {
        EvoError::InvalidArg(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = EvoError> = std::result::Result<T, E>;

/// Log an error with context before propagating it.
///
/// ```rust
/// use evocore::{EvoError, LogErr, Result};
///
/// fn load() -> Result<()> {
///     Err(EvoError::PopulationEmpty)
/// }
///
/// let r = load().log_context("loading population");
/// assert!(r.is_err());
/// ```
pub trait LogErr {
    fn log_context(self, context: &str) -> Self;
}

impl<T> LogErr for Result<T> {
    fn log_context(self, context: &str) -> Self {
        if let Err(e) = &self {
            log::error!("{}: {} (code {})", context, e, e.code().as_i32());
        }
        self
    }
}
