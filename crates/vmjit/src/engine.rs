//! The engine-facing boundary (SPEC_FULL.md §2): the host script engine is
//! an external collaborator (spec.md §1), so its "provided interfaces
//! consumed" (spec.md §6) become two traits instead of a binding to one
//! concrete scripting engine. `tests/common` implements both with a minimal
//! reference engine used only to drive the integration tests in spec.md §8.

use crate::bytecode::CodeWord;
use crate::config::MessageType;
use std::ffi::c_void;

/// Layout-compatible Rust mirror of the C `asea_vm_registers` struct from
/// `preamble.rs`. Every JIT entry point and every runtime ABI function in
/// `abi.rs` takes a pointer to one of these; its field order must match the
/// C struct exactly since generated code writes through it directly.
#[repr(C)]
pub struct VmRegisters {
    pub pc: *mut CodeWord,
    pub fp: *mut u8,
    pub sp: *mut u8,
    pub value: u64,
    pub obj: *mut c_void,
    pub obj_type: *mut c_void,
    pub do_suspend: u8,
    /// Opaque handle back to the running [`ExecContext`]; never read by any
    /// stencil the translator implements (only by the always-fallback
    /// opcodes that need direct engine-internal offsets, per spec.md §4.C).
    pub ctx: *mut ExecContext,
}

impl VmRegisters {
    /// # Safety
    /// `ctx` must be non-null and point to a live `ExecContext` for the
    /// duration of any call that dereferences it.
    pub unsafe fn exec_context(&mut self) -> &mut ExecContext {
        &mut *self.ctx
    }
}

/// The signature every JIT entry point has: the counting trampoline
/// (component F) and every compiled function (component E) share it.
pub type JitEntryFn = extern "C" fn(*mut VmRegisters, usize);

/// One script function, as exposed by the host engine (spec.md §3's
/// "Script function" data type and the "Bytecode access" interfaces of
/// spec.md §6).
pub trait ScriptFunction {
    fn id(&self) -> u32;
    fn bytecode(&self) -> &[CodeWord];
    fn bytecode_mut(&mut self) -> &mut [CodeWord];
    fn declared_at(&self) -> Option<(&str, i32, i32)>;
    fn declaration(&self) -> String;
    fn module_name(&self) -> Option<&str>;
    /// Per-function metadata tags (component G's input).
    fn metadata(&self) -> &[String];
    /// Installs (or replaces) this function's JIT entry point.
    fn set_jit_function(&mut self, entry: Option<JitEntryFn>);
    fn jit_function(&self) -> Option<JitEntryFn>;
}

/// The subset of the host engine's interface the JIT consumes
/// (spec.md §6's "Engine-provided interfaces consumed").
pub trait ScriptEngine {
    fn write_message(&mut self, section: &str, row: i32, col: i32, severity: MessageType, text: &str);

    /// Resolves a pointer to a registered global property, returning its
    /// stable id if found (used by `emit_global_lookup`'s `asea_global<id>`
    /// naming scheme).
    fn global_property_id(&self, ptr: *const c_void) -> Option<u32>;

    fn call_script_function(&mut self, regs: &mut VmRegisters, function_id: u32);
    fn call_system_function(&mut self, regs: &mut VmRegisters, fn_id: i32) -> i32;
    fn call_object_method(&mut self, regs: &mut VmRegisters, obj: *mut c_void, fn_id: i32);
    fn prepare_script_stack(
        &mut self,
        regs: &mut VmRegisters,
        function_id: u32,
        pc: *mut CodeWord,
        sp: *mut u8,
        fp: *mut u8,
    ) -> i32;
    fn prepare_script_stack_and_vars(
        &mut self,
        regs: &mut VmRegisters,
        function_id: u32,
        pc: *mut CodeWord,
        sp: *mut u8,
        fp: *mut u8,
    ) -> i32;
    fn clean_args(&mut self, regs: &mut VmRegisters, function_id: u32, args: *mut CodeWord);
    fn cast(&mut self, regs: &mut VmRegisters, obj: *mut c_void, type_id: u32);
    fn new_script_object(&mut self, type_id: u32) -> *mut c_void;
    fn set_internal_exception(&mut self, regs: &mut VmRegisters, text: &str);
}

/// What `VmRegisters::ctx` points to while a JIT entry point or runtime ABI
/// call is active: a type-erased handle back to the live engine, so the
/// free `extern "C"` functions in `abi.rs` can call back into it without
/// generated C code ever seeing a Rust trait object. Set up by the
/// integration facade (`lib.rs`) immediately before transferring control to
/// a JIT entry point, matching the single-threaded cooperative model of
/// spec.md §5: there is exactly one live `ExecContext` at a time.
pub struct ExecContext {
    pub engine: *mut dyn ScriptEngine,
}

impl ExecContext {
    /// # Safety
    /// The pointer handed to [`ExecContext::new`] must stay valid and
    /// exclusively borrowed for as long as the returned context is reachable
    /// from a `VmRegisters::ctx` that generated code or the ABI might use.
    pub unsafe fn new(engine: *mut dyn ScriptEngine) -> Self {
        ExecContext { engine }
    }

    /// # Safety
    /// Same obligations as [`ExecContext::new`].
    pub unsafe fn engine(&mut self) -> &mut dyn ScriptEngine {
        &mut *self.engine
    }
}
