//! A minimal reference `ScriptEngine`/`ScriptFunction` pair used only to
//! drive the integration tests below (spec.md §2: the host engine is an
//! external collaborator, not something this crate ships). Not a real
//! script VM: no parser, no interpreter loop, no object model — just enough
//! plumbing to hand the JIT real bytecode and a real stack frame to run it
//! against, and to observe what comes back out.

use std::ffi::c_void;
use vmjit::engine::{JitEntryFn, ScriptEngine, ScriptFunction, VmRegisters};
use vmjit::translator::GlobalResolver;
use vmjit::MessageType;

pub struct TestFunction {
    pub id: u32,
    pub code: Vec<u32>,
    pub metadata: Vec<String>,
    pub module: Option<String>,
    jit_fn: Option<JitEntryFn>,
}

impl TestFunction {
    pub fn new(id: u32, code: Vec<u32>) -> Self {
        TestFunction {
            id,
            code,
            metadata: Vec::new(),
            module: Some("main".to_string()),
            jit_fn: None,
        }
    }
}

impl ScriptFunction for TestFunction {
    fn id(&self) -> u32 {
        self.id
    }
    fn bytecode(&self) -> &[u32] {
        &self.code
    }
    fn bytecode_mut(&mut self) -> &mut [u32] {
        &mut self.code
    }
    fn declared_at(&self) -> Option<(&str, i32, i32)> {
        None
    }
    fn declaration(&self) -> String {
        format!("void test_fn_{}()", self.id)
    }
    fn module_name(&self) -> Option<&str> {
        self.module.as_deref()
    }
    fn metadata(&self) -> &[String] {
        &self.metadata
    }
    fn set_jit_function(&mut self, entry: Option<JitEntryFn>) {
        self.jit_fn = entry;
    }
    fn jit_function(&self) -> Option<JitEntryFn> {
        self.jit_fn
    }
}

/// Records every message and fallback-triggering callback it's handed;
/// none of the integration tests below exercise a real system-function
/// call, so the call_* methods just panic if reached unexpectedly.
#[derive(Default)]
pub struct TestEngine {
    pub messages: Vec<String>,
}

impl ScriptEngine for TestEngine {
    fn write_message(&mut self, section: &str, row: i32, col: i32, _severity: MessageType, text: &str) {
        self.messages.push(format!("{section}:{row}:{col}: {text}"));
    }

    fn global_property_id(&self, _ptr: *const c_void) -> Option<u32> {
        None
    }

    fn call_script_function(&mut self, _regs: &mut VmRegisters, function_id: u32) {
        panic!("unexpected script call to function {function_id} in a stencil-only test");
    }
    fn call_system_function(&mut self, _regs: &mut VmRegisters, fn_id: i32) -> i32 {
        panic!("unexpected system call {fn_id} in a stencil-only test");
    }
    fn call_object_method(&mut self, _regs: &mut VmRegisters, _obj: *mut c_void, fn_id: i32) {
        panic!("unexpected object method call {fn_id} in a stencil-only test");
    }
    fn prepare_script_stack(
        &mut self,
        _regs: &mut VmRegisters,
        _function_id: u32,
        _pc: *mut u32,
        _sp: *mut u8,
        _fp: *mut u8,
    ) -> i32 {
        0
    }
    fn prepare_script_stack_and_vars(
        &mut self,
        _regs: &mut VmRegisters,
        _function_id: u32,
        _pc: *mut u32,
        _sp: *mut u8,
        _fp: *mut u8,
    ) -> i32 {
        0
    }
    fn clean_args(&mut self, _regs: &mut VmRegisters, _function_id: u32, _args: *mut u32) {}
    fn cast(&mut self, _regs: &mut VmRegisters, _obj: *mut c_void, _type_id: u32) {}
    fn new_script_object(&mut self, _type_id: u32) -> *mut c_void {
        std::ptr::null_mut()
    }
    fn set_internal_exception(&mut self, _regs: &mut VmRegisters, text: &str) {
        self.messages.push(format!("exception: {text}"));
    }
}

pub struct NoGlobals;
impl GlobalResolver for NoGlobals {
    fn global_property_id(&self, _ptr: *const c_void) -> Option<u32> {
        None
    }
}

/// A scratch stack/frame buffer big enough for the handful of dword slots
/// these tests touch, with `fp`/`sp` pointing at its midpoint so both
/// positive and negative `ASEA_STACK_DWORD_OFFSET` indices stay in bounds.
pub struct ScratchFrame {
    buf: Vec<u8>,
}

impl ScratchFrame {
    pub fn new() -> Self {
        ScratchFrame { buf: vec![0u8; 512] }
    }

    pub fn fp(&mut self) -> *mut u8 {
        unsafe { self.buf.as_mut_ptr().add(256) }
    }

    pub fn sp(&mut self) -> *mut u8 {
        unsafe { self.buf.as_mut_ptr().add(256) }
    }
}

/// Builds a `VmRegisters` with `pc` pointed at `code`'s start and `fp`/`sp`
/// into `frame`, ready to hand to a compiled entry point or to
/// [`vmjit::run_jit_entry`].
pub fn fresh_registers(code: &mut [u32], frame: &mut ScratchFrame) -> VmRegisters {
    VmRegisters {
        pc: code.as_mut_ptr(),
        fp: frame.fp(),
        sp: frame.sp(),
        value: 0,
        obj: std::ptr::null_mut(),
        obj_type: std::ptr::null_mut(),
        do_suspend: 0,
        ctx: std::ptr::null_mut(),
    }
}
