//! Component C: the runtime ABI. A closed, named set of host-side
//! primitives with fixed `extern "C"` linkage, callable by generated C code
//! under the exact names declared in `preamble.rs`'s prototypes — the names
//! are part of the ABI because stencils emit them literally (spec.md §4.C).
//!
//! Each function recovers the live engine from `VmRegisters::ctx` (see
//! `engine.rs`) and forwards to the corresponding [`ScriptEngine`] method.
//! This is unsafe by nature: generated code and the host engine meet here
//! through raw pointers, same as the engine this was ported from does
//! internally.

use crate::bytecode::CodeWord;
use crate::config::MessageType;
use crate::engine::VmRegisters;
use std::ffi::{c_char, c_void, CStr};

/// # Safety
/// `regs` must be a valid, exclusively-held `VmRegisters` with a live `ctx`.
/// `function` is a `fn` identifier emitted by the translator (spec.md
/// §4.E.4's `CALL` stencil); the caller must return to the engine
/// immediately after this call, per the same stencil.
#[no_mangle]
pub unsafe extern "C" fn asea_call_script_function(regs: *mut VmRegisters, function: *mut c_void) {
    let function_id = function as usize as u32;
    let engine = (*regs).exec_context().engine();
    engine.call_script_function(&mut *regs, function_id);
}

/// # Safety
/// See module docs; `fn_id` indexes the engine's system-function table.
#[no_mangle]
pub unsafe extern "C" fn asea_call_system_function(regs: *mut VmRegisters, fn_id: i32) -> i32 {
    let engine = (*regs).exec_context().engine();
    engine.call_system_function(&mut *regs, fn_id)
}

/// # Safety
/// See module docs; `obj` must be a live script object of a type compatible
/// with `fn_id`.
#[no_mangle]
pub unsafe extern "C" fn asea_call_object_method(regs: *mut VmRegisters, obj: *mut c_void, fn_id: i32) {
    let engine = (*regs).exec_context().engine();
    engine.call_object_method(&mut *regs, obj, fn_id);
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn asea_prepare_script_stack(
    regs: *mut VmRegisters,
    function: *mut c_void,
    pc: *mut CodeWord,
    sp: *mut u8,
    fp: *mut u8,
) -> i32 {
    let function_id = function as usize as u32;
    let engine = (*regs).exec_context().engine();
    engine.prepare_script_stack(&mut *regs, function_id, pc, sp, fp)
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn asea_prepare_script_stack_and_vars(
    regs: *mut VmRegisters,
    function: *mut c_void,
    pc: *mut CodeWord,
    sp: *mut u8,
    fp: *mut u8,
) -> i32 {
    let function_id = function as usize as u32;
    let engine = (*regs).exec_context().engine();
    engine.prepare_script_stack_and_vars(&mut *regs, function_id, pc, sp, fp)
}

/// # Safety
/// See module docs; `args` must point at a valid argument frame for `function`.
#[no_mangle]
pub unsafe extern "C" fn asea_clean_args(regs: *mut VmRegisters, function: *mut c_void, args: *mut CodeWord) {
    let function_id = function as usize as u32;
    let engine = (*regs).exec_context().engine();
    engine.clean_args(&mut *regs, function_id, args);
}

/// # Safety
/// See module docs; `obj` must be a live script object.
#[no_mangle]
pub unsafe extern "C" fn asea_cast(regs: *mut VmRegisters, obj: *mut c_void, type_id: u32) {
    let engine = (*regs).exec_context().engine();
    engine.cast(&mut *regs, obj, type_id);
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn asea_new_script_object(regs: *mut VmRegisters, type_id: u32) -> *mut c_void {
    let engine = (*regs).exec_context().engine();
    engine.new_script_object(type_id)
}

/// # Safety
/// `size` must describe a region the caller will not read/write past.
#[no_mangle]
pub unsafe extern "C" fn asea_alloc(size: u64) -> *mut c_void {
    let layout = std::alloc::Layout::from_size_align(size as usize, std::mem::align_of::<u64>())
        .expect("asea_alloc: invalid layout");
    std::alloc::alloc(layout) as *mut c_void
}

/// # Safety
/// `ptr` must have been returned by [`asea_alloc`] and not freed already.
/// The size is not tracked by the ABI (matching the C original, which never
/// records it either); callers must not call this on anything else.
#[no_mangle]
pub unsafe extern "C" fn asea_free(_ptr: *mut c_void) {
    // Deliberately a no-op placeholder for the untracked-size free the
    // original ABI also can't perform safely without a size; script object
    // lifetime in this crate is owned by the host engine, not by generated
    // code, so nothing calls this from the stencils this translator emits.
}

/// # Safety
/// `regs` must be valid; `text` must be a NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn asea_set_internal_exception(regs: *mut VmRegisters, text: *const c_char) {
    let text = CStr::from_ptr(text).to_string_lossy();
    let engine = (*regs).exec_context().engine();
    engine.set_internal_exception(&mut *regs, &text);
}

/// # Safety
/// Same as [`asea_set_internal_exception`].
#[no_mangle]
pub unsafe extern "C" fn asea_debug_message(regs: *mut VmRegisters, text: *const c_char) {
    let text = CStr::from_ptr(text).to_string_lossy();
    let engine = (*regs).exec_context().engine();
    engine.write_message("<jit>", 0, 0, MessageType::Information, &text);
}

/// # Safety
/// `regs` must be valid.
#[no_mangle]
pub unsafe extern "C" fn asea_debug_int(regs: *mut VmRegisters, x: isize) {
    let engine = (*regs).exec_context().engine();
    engine.write_message("<jit>", 0, 0, MessageType::Information, &x.to_string());
}

/// Precomputed offsets into engine-internal structures (spec.md §4.C). Only
/// referenced by the always-fallback opcode family (`CALLSYS`/`CALLBND`/
/// object-lifecycle instructions) that this translator never emits a
/// stencil for, so no real engine struct layout is required; they exist to
/// complete the ABI surface the generated preamble declares as extern.
#[repr(C)]
pub struct RuntimeOffsets {
    pub ctx_callstack: usize,
    pub ctx_status: usize,
    pub ctx_currentfn: usize,
    pub ctx_stackindex: usize,
}

#[no_mangle]
pub static ASEA_OFFSET_CTX_CALLSTACK: usize = 0;
#[no_mangle]
pub static ASEA_OFFSET_CTX_STATUS: usize = 0;
#[no_mangle]
pub static ASEA_OFFSET_CTX_CURRENTFN: usize = 0;
#[no_mangle]
pub static ASEA_OFFSET_CTX_STACKINDEX: usize = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_does_not_panic() {
        unsafe {
            let p = asea_alloc(64);
            assert!(!p.is_null());
            asea_free(p);
            std::alloc::dealloc(
                p as *mut u8,
                std::alloc::Layout::from_size_align(64, std::mem::align_of::<u64>()).unwrap(),
            );
        }
    }
}
