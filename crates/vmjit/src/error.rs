//! Error kinds, one variant per failure mode in spec.md §7.
//!
//! All of these are reported through the engine's message callback (see
//! [`crate::logging`]) rather than a separate error channel; `JitError` is
//! the value the controller matches on internally to decide whether to log
//! at warning or error severity and whether to drop a lazy record.

use crate::bytecode::Opcode;
use std::path::PathBuf;

pub type JitResult<T> = Result<T, JitError>;

#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("function {function_id} references opcode {opcode} with no translator stencil")]
    UnsupportedOpcode { function_id: u32, opcode: Opcode },

    #[error("bytecode for function {function_id} is malformed: {reason}")]
    InvalidBytecode { function_id: u32, reason: String },

    #[error("C compilation failed for function {function_id}:\n{stderr}")]
    CCompilationFailed { function_id: u32, stderr: String },

    #[error("linker could not resolve extern `{symbol}`")]
    ExternResolutionFailed { symbol: String },

    #[error("compiled shared object for function {function_id} did not export `{symbol}`")]
    EntryPointNotFound { function_id: u32, symbol: String },

    #[error("io error while invoking the C compiler: {0}")]
    Io(#[from] std::io::Error),

    #[error("dynamic loading failed: {0}")]
    Loading(#[from] libloading::Error),

    #[error("config file {path:?} could not be read: {source}")]
    ConfigIo { path: PathBuf, source: std::io::Error },

    #[error("config file {path:?} is not valid TOML: {source}")]
    ConfigParse { path: PathBuf, source: toml::de::Error },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
