//! The JIT configuration value type (spec.md §3), cloned per compiler
//! instance, and an `atlas-config`-style TOML loader on top of it.

use crate::bytecode::Opcode;
use crate::error::{JitError, JitResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Severity levels the translator and controller log at (component H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Verbose,
    Info,
    PerfWarning,
    Warning,
    Error,
}

/// Maps each [`LogSeverity`] to an engine message-type, or drops it. `None`
/// is the "drop" sentinel spec.md §3 calls out (the original used `-1`;
/// `Option` is the idiomatic Rust equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogTargets {
    pub verbose: Option<MessageType>,
    pub info: Option<MessageType>,
    pub perf_warning: Option<MessageType>,
    pub warning: Option<MessageType>,
    pub error: Option<MessageType>,
}

impl Default for LogTargets {
    fn default() -> Self {
        LogTargets {
            verbose: None,
            info: Some(MessageType::Information),
            perf_warning: Some(MessageType::Warning),
            warning: Some(MessageType::Warning),
            error: Some(MessageType::Error),
        }
    }
}

impl LogTargets {
    pub fn target_for(&self, severity: LogSeverity) -> Option<MessageType> {
        match severity {
            LogSeverity::Verbose => self.verbose,
            LogSeverity::Info => self.info,
            LogSeverity::PerfWarning => self.perf_warning,
            LogSeverity::Warning => self.warning,
            LogSeverity::Error => self.error,
        }
    }
}

/// The engine's own message-severity enumeration (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Triggers {
    /// Bypass the hit counter entirely, compile on first registration.
    pub eager: bool,
    /// Counter threshold for the lazy controller's counting trampoline.
    pub hits_before_func_compile: u32,
}

impl Default for Triggers {
    fn default() -> Self {
        Triggers {
            eager: false,
            hits_before_func_compile: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CGenOptions {
    /// Interleave disassembly comments into emitted C (component B is used
    /// only when this is set).
    pub human_readable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    /// Force fallback for these opcodes regardless of translator support.
    #[serde(skip)]
    pub blacklist_instructions: Vec<Opcode>,
    /// Force fallback after every instance of this opcode, if set.
    #[serde(skip)]
    pub fallback_after_instruction: Option<Opcode>,
    /// Emit a runtime debug-message at each function entry.
    pub trace_functions: bool,
    /// Permit per-function metadata to toggle dump behavior.
    pub allow_function_metadata_debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Emit a performance warning on shutdown if nothing was ever compiled.
    pub warn_if_never_compiled: bool,
    pub log_targets: LogTargets,
    /// Write the generated C to this sink when set (free-form text).
    pub dump_c_code: Option<String>,
    /// Write the post-optimization IR/assembly to this sink when set.
    pub dump_mir_code: Option<String>,
    pub triggers: Triggers,
    /// Optimization level passed to the C-compiler backend (0-3).
    pub mir_optimization_level: u8,
    pub c: CGenOptions,
    pub debug: DebugOptions,
    /// Reserved; no behavior is defined for it yet.
    pub experimental_stack_elision: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            warn_if_never_compiled: true,
            log_targets: LogTargets::default(),
            dump_c_code: None,
            dump_mir_code: None,
            triggers: Triggers::default(),
            mir_optimization_level: 1,
            c: CGenOptions::default(),
            debug: DebugOptions::default(),
            experimental_stack_elision: false,
        }
    }
}

impl JitConfig {
    /// A config tuned for tests: eager compilation, human-readable C dumps,
    /// everything logged. Mirrors `atlas-jit`'s `JitConfig::for_testing()`.
    pub fn for_testing() -> Self {
        JitConfig {
            triggers: Triggers {
                eager: true,
                hits_before_func_compile: 0,
            },
            c: CGenOptions { human_readable: true },
            log_targets: LogTargets {
                verbose: Some(MessageType::Information),
                ..LogTargets::default()
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> JitResult<Self> {
        toml::from_str(text).map_err(|source| JitError::ConfigParse {
            path: PathBuf::from("<string>"),
            source,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> JitResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| JitError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| JitError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}
