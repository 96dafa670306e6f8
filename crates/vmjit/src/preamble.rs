//! Component D: the static C source fragments every generated translation
//! unit starts with — the `ASEA_SUPPORT` gate, the punning union, the
//! VM-register/generic-call-frame clones, and the runtime ABI prototypes.
//! Ported line for line from the angelsea runtime header, with the
//! attribution banner adapted to this project's own license.

/// Attribution banner for the generated C. The VM-register layout and
/// macro names below are extracted from the host engine's internal
/// structures; this comment block documents that provenance in the
/// generated artifact itself, the same way the engine this was ported from
/// banners its own generated output.
pub const HEADER_COPYRIGHT: &str = r#"/*
    This generated source file contains macro definitions and references to
    internal structures of the host script engine. It is emitted by the JIT
    translator for a single script function and is not meant to be edited.

    This file must NOT be compiled by a C++ compiler: it relies on type
    punning through a union in a way that is legal under C aliasing rules
    but not under C++'s.
*/

"#;

/// JIT-only type aliases, the execution-state enum, and opaque forward
/// declarations — gated so the same preamble text can be reused unchanged
/// if embedded into a larger translation unit that already defines these.
pub const HEADER_TYPES: &str = r#"#ifdef ASEA_SUPPORT

typedef __INT8_TYPE__    asINT8;
typedef __INT16_TYPE__   asINT16;
typedef __INT32_TYPE__   asINT32;
typedef __INT64_TYPE__   asINT64;
typedef __UINT8_TYPE__   asBYTE;
typedef __UINT16_TYPE__  asWORD;
typedef __UINT32_TYPE__  asUINT;
typedef __UINT32_TYPE__  asDWORD;
typedef __UINT64_TYPE__  asQWORD;
typedef __UINTPTR_TYPE__ asPWORD;

typedef enum
{
	asEXECUTION_FINISHED        = 0,
	asEXECUTION_SUSPENDED       = 1,
	asEXECUTION_ABORTED         = 2,
	asEXECUTION_EXCEPTION       = 3,
	asEXECUTION_PREPARED        = 4,
	asEXECUTION_UNINITIALIZED   = 5,
	asEXECUTION_ACTIVE          = 6,
	asEXECUTION_ERROR           = 7,
	asEXECUTION_DESERIALIZATION = 8
} asEContextState;
"#;

/// The punning union: the lingua franca of every stack frame slot and every
/// stencil. Every "slot" read or write is `<lvalue>.as_<typename>`. This
/// deliberately commits to reading and writing the same slot as different
/// widths — portable under C aliasing rules via the union, not under
/// stricter rules (see DESIGN.md's Open Question notes).
pub const HEADER_VAR_UNION: &str = r#"
union asea_var_u {
	asINT8 as_asINT8;
	asINT16 as_asINT16;
	asINT32 as_asINT32;
	asINT64 as_asINT64;
	asBYTE as_asBYTE;
	asWORD as_asWORD;
	asDWORD as_asDWORD;
	asQWORD as_asQWORD;
	asPWORD as_asPWORD;
	float as_float;
	double as_double;
	void* as_ptr;
	union asea_var_u* as_var_ptr;
};
typedef union asea_var_u asea_var;

typedef struct asSVMRegisters_t asSVMRegisters;
typedef struct asIScriptContext_t asIScriptContext;
typedef struct asITypeInfo_t asITypeInfo;
typedef struct asCScriptFunction_t asCScriptFunction;
typedef struct asCObjectType_t asCObjectType;
typedef struct asCScriptEngine_t asCScriptEngine;
typedef struct asCScriptObject_t asCScriptObject;
typedef struct asSTypeBehaviour_t asSTypeBehaviour;

#endif
"#;

/// The layout-compatible clone of the engine's VM-register record. Every
/// field here must match the host engine's real struct byte for byte;
/// pointer fields that were `asDWORD*` in the original are widened to
/// `void*` since the JIT crosses the compile boundary.
pub const HEADER_VM_REGISTERS: &str = r#"
typedef struct {
	asDWORD *pc;           /* current bytecode instruction */
	void *fp;              /* function stack frame */
	void *sp;               /* top of stack, grows downward */
	asea_var valueRegister; /* temp register for primitives, punned by width */
	void *obj;             /* temp register for objects and handles */
	asITypeInfo *obj_type; /* type of object held in object register */
	char do_suspend;       /* whether the JIT should break out on SUSPEND */
	asIScriptContext *ctx; /* active script context */
} asea_vm_registers;
"#;

/// The native-call-frame record (used only when experimental direct
/// generic calls are implemented), float-bit unions, and the dynamic-array
/// descriptor used by list-construction fallbacks.
pub const HEADER_MISC_STRUCTS: &str = r#"
typedef struct {
	void *_vtable;
	asCScriptEngine *engine;
	asCScriptFunction *sysFunction;
	void *currentObject;
	asDWORD *stackPointer;
	void *objectRegister;
	asQWORD returnVal;
} asea_generic;

typedef union {
	float   f;
	asDWORD i;
} asea_i2f;

typedef union {
	double f;
	asQWORD i;
} asea_i2f64;

typedef struct {
	void* ptr;
	asUINT len;
	asUINT max_len;
} asea_array;
"#;

/// Prototypes for the runtime ABI (component C). Declared `extern` here so
/// every stencil can call them literally; the controller binds each one to
/// a real function pointer (or, for the `cc`+`libloading` backend, bakes
/// its address as a macro — see `backend.rs`) before linking.
pub const HEADER_RUNTIME_PROTOTYPES: &str = r#"
void asea_call_script_function(asSVMRegisters* vm_registers, void* function);
int asea_prepare_script_stack(asSVMRegisters* vm_registers, void* function, void* pc, void* sp, void *fp);
int asea_prepare_script_stack_and_vars(asSVMRegisters* vm_registers, void* function, void* pc, void* sp, void *fp);
void asea_debug_message(asSVMRegisters* vm_registers, const char* text);
void asea_debug_int(asSVMRegisters* vm_registers, asPWORD x);
void asea_set_internal_exception(asSVMRegisters* vm_registers, const char* text);
void asea_clean_args(asSVMRegisters* vm_registers, void* function, asDWORD* args);
int asea_call_system_function(asSVMRegisters* vm_registers, int fn);
int asea_call_object_method(asSVMRegisters* vm_registers, void* obj, int fn);
void* asea_new_script_object(asSVMRegisters* vm_registers, asDWORD type_id);
void asea_cast(asSVMRegisters* vm_registers, asCScriptObject* obj, asDWORD type_id);
void* asea_alloc(asQWORD size);
void  asea_free(void* ptr);

typedef void (*asea_jit_fn)(asSVMRegisters*, asPWORD);
"#;

/// Arithmetic helper macros the stencils expand through rather than
/// inlining directly, so the division-by-zero behavior has one definition.
pub const HEADER_MACROS: &str = r#"
#define ASEA_FDIV(lhs, rhs) ((lhs) / (rhs))
#define VALUE_OF_BOOLEAN_TRUE 1
/* Stack and frame slots are addressed at dword (4-byte) granularity. */
#define ASEA_STACK_DWORD_OFFSET(ptr, n) ((void*)((char*)(ptr) + (long)(n) * 4))
/* A pointer occupies two dword slots on every target this JIT runs on. */
#define AS_PTR_SIZE 2
#define ASEA_STACK_TOP (*(asea_var*)l_sp)
#define ASEA_STACK_VAR(n) (*(asea_var*)ASEA_STACK_DWORD_OFFSET(l_sp, (n)))
#define ASEA_FRAME_VAR(n) (*(asea_var*)ASEA_STACK_DWORD_OFFSET(l_fp, -(long)(n)))
/* RDR/INC/DEC act on the memory the value register points at, not on the
   register's own bytes (spec.md §4.E.4). */
#define ASEA_VALUEREG_DEREF() (*(asea_var*)(regs->valueRegister.as_asPWORD))
"#;

/// Externs for the precomputed engine-struct offsets (component C).
pub const HEADER_OFFSETS: &str = r#"
extern const asPWORD asea_offset_ctx_callstack;
extern const asPWORD asea_offset_ctx_status;
extern const asPWORD asea_offset_ctx_currentfn;
extern const asPWORD asea_offset_ctx_stackindex;
"#;

/// Concatenates every preamble fragment in emission order. `prepare_new_context`
/// (see `translator.rs`) appends exactly this to a fresh buffer.
pub fn full_preamble() -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(HEADER_COPYRIGHT);
    // Every generated translation unit is its own standalone file, never
    // spliced into a larger host TU that might already carry these
    // typedefs, so the reuse-gate below is always satisfied here.
    out.push_str("#define ASEA_SUPPORT\n\n");
    out.push_str(HEADER_TYPES);
    out.push_str(HEADER_VAR_UNION);
    out.push_str(HEADER_VM_REGISTERS);
    out.push_str(HEADER_MISC_STRUCTS);
    out.push_str(HEADER_RUNTIME_PROTOTYPES);
    out.push_str(HEADER_MACROS);
    out.push_str(HEADER_OFFSETS);
    out
}
