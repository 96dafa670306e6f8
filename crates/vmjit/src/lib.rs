//! Lazy bytecode-to-C JIT backend for a stack-based script VM.
//!
//! The crate translates one script function's bytecode into a C
//! translation unit per call-site decision ([`translator`]), compiles it
//! with a system C compiler and loads the result back in
//! ([`backend`]), and decides *when* to do that lazily based on call
//! counts ([`controller`]). [`JitSystem`] is the facade a host script
//! engine talks to; [`engine::ScriptEngine`] and [`engine::ScriptFunction`]
//! are the traits that engine must implement to hand the JIT what it needs.

pub mod abi;
pub mod backend;
pub mod bytecode;
pub mod config;
pub mod controller;
pub mod disasm;
pub mod engine;
pub mod error;
pub mod fnconfig;
pub mod logging;
pub mod preamble;
pub mod translator;

pub use config::{JitConfig, LogSeverity, MessageType};
pub use controller::{Controller, DispatchDecision, LazyFunctionRecord};
pub use engine::{ExecContext, JitEntryFn, ScriptEngine, ScriptFunction, VmRegisters};
pub use error::{JitError, JitResult};
pub use fnconfig::FnConfig;

use std::ffi::c_void;
use translator::GlobalResolver;

/// Component J: the integration facade, the crate's single entry point for
/// a host engine. Wraps the lazy [`Controller`] and plugs whatever
/// [`ScriptEngine`] the caller hands it into the one engine-dependent detail
/// the translator needs mid-compile: global-property address lookups.
pub struct JitSystem {
    controller: Controller,
}

impl JitSystem {
    pub fn new(config: JitConfig) -> JitResult<Self> {
        Ok(JitSystem {
            controller: Controller::new(config, "asea_")?,
        })
    }

    pub fn compiled_count(&self) -> u32 {
        self.controller.compiled_count()
    }

    /// Call when the engine loads a script function (spec.md §6's
    /// `NewFunction` notification).
    pub fn new_function(&mut self, function: &dyn ScriptFunction) {
        self.controller.register_function(function);
    }

    /// Call when the engine discards a script function (`CleanFunction`).
    pub fn clean_function(&mut self, function_id: u32) {
        self.controller.unregister_function(function_id);
    }

    /// Call-site hook: decides whether `function` should run under an
    /// already-compiled JIT entry point, a freshly compiled one, or still
    /// fall back to the engine's own interpreter for this call.
    pub fn dispatch(&mut self, function: &mut dyn ScriptFunction, engine: &mut dyn ScriptEngine) -> JitResult<DispatchDecision> {
        let resolver = EngineResolver(engine);
        self.controller.on_call(function, &resolver)
    }

    /// The batch alternative to per-call lazy dispatch (spec.md §4.F):
    /// compiles every given function immediately.
    pub fn compile_all(&mut self, functions: &mut [&mut dyn ScriptFunction], engine: &mut dyn ScriptEngine) -> JitResult<()> {
        let resolver = EngineResolver(engine);
        self.controller.compile_all(functions, &resolver)
    }
}

struct EngineResolver<'a>(&'a mut dyn ScriptEngine);

impl<'a> GlobalResolver for EngineResolver<'a> {
    fn global_property_id(&self, ptr: *const c_void) -> Option<u32> {
        self.0.global_property_id(ptr)
    }
}

/// Wires a live engine into `regs.ctx` and invokes a compiled entry point,
/// the one moment generated C code and the Rust-side engine trait object
/// meet (spec.md §5: at most one live context at a time).
///
/// # Safety
/// `regs` must already have `pc`/`sp`/`fp` prepared by the engine (e.g. via
/// [`abi::asea_prepare_script_stack`]); `engine` must be valid and
/// exclusively reachable for the duration of the call.
pub unsafe fn run_jit_entry(entry: JitEntryFn, regs: &mut VmRegisters, engine: *mut dyn ScriptEngine, entry_label: usize) {
    let mut ctx = unsafe { ExecContext::new(engine) };
    regs.ctx = &mut ctx;
    entry(regs as *mut VmRegisters, entry_label);
}
