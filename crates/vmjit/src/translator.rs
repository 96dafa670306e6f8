//! Component E: the translator, the heart of the system. Lowers one script
//! function's bytecode into a C translation unit, one fixed stencil per
//! supported opcode, threaded by C labels and a switch-based dispatcher.
//! Every stencil body below is grounded line for line on
//! `BytecodeToC::translate_instruction` (see DESIGN.md).

use crate::bytecode::{set_pword0, BytecodeInstruction, BytecodeIter, Opcode};
use crate::config::JitConfig;
use crate::disasm::disassemble;
use crate::engine::ScriptFunction;
use crate::fnconfig::FnConfig;
use crate::preamble;
use std::ffi::c_void;
use std::fmt::Write as _;

/// A symbol the generated C text references, for the controller to resolve
/// by address before handing the source to the C compiler (spec.md §3's
/// "Extern mapping").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternKind {
    ScriptFunction,
    GlobalVariable,
    StringConstant,
    RuntimeHelper,
}

#[derive(Debug, Clone)]
pub struct Extern {
    pub name: String,
    pub kind: ExternKind,
    pub address: usize,
}

/// Resolves the two kinds of host pointer `emit_global_lookup` distinguishes:
/// a registered global property (looked up in the engine's address-keyed
/// map) versus anything else, treated as a string-constant object. This is
/// the translator's one point of contact with the engine.
pub trait GlobalResolver {
    fn global_property_id(&self, ptr: *const c_void) -> Option<u32>;
}

pub struct TranslationOutput {
    pub mangled_name: String,
    pub source: String,
    pub externs: Vec<Extern>,
    pub fallback_count: u32,
}

/// Escapes a module name the way `entry_point_name` does: alphanumerics
/// pass through, everything else becomes `_XX_` where `XX` is the
/// uppercase-hex byte value.
fn mangle_module_name(name: Option<&str>) -> String {
    match name {
        None => "anon".to_string(),
        Some(name) => {
            let mut out = String::from("module_");
            for c in name.bytes() {
                if c.is_ascii_alphanumeric() {
                    out.push(c as char);
                } else {
                    write!(out, "_{c:02X}_").unwrap();
                }
            }
            out
        }
    }
}

/// `asea_<fn_id>_<escaped-module-name>` (spec.md §4.E.3). Stable across
/// runs and injective over (fn-id, module-name).
pub fn entry_point_name(prefix: &str, fn_id: u32, module_name: Option<&str>) -> String {
    format!("{prefix}{fn_id}_{}", mangle_module_name(module_name))
}

pub struct Translator {
    config: JitConfig,
    jit_fn_prefix: String,
    buffer: String,
    fallback_count: u32,
    string_constant_idx: u32,
    externs: Vec<Extern>,
}

impl Translator {
    pub fn new(config: JitConfig, jit_fn_prefix: impl Into<String>) -> Self {
        Translator {
            config,
            jit_fn_prefix: jit_fn_prefix.into(),
            buffer: String::with_capacity(64 * 1024),
            fallback_count: 0,
            string_constant_idx: 0,
            externs: Vec::new(),
        }
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Clears the output buffer (retaining capacity), resets the
    /// fallback/string-constant counters, and appends the preamble
    /// (spec.md §4.E.7 step 0).
    pub fn prepare_new_context(&mut self) {
        self.fallback_count = 0;
        self.string_constant_idx = 0;
        self.externs.clear();
        self.buffer.clear();
        self.buffer.push_str(&preamble::full_preamble());
    }

    fn emit(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    fn emitf(&mut self, args: std::fmt::Arguments<'_>) {
        self.buffer.write_fmt(args).expect("writing to an in-memory String cannot fail");
    }

    /// Lowers one function, following the lifecycle in spec.md §4.E.7:
    /// map-function notification, optional trace/location comments, the
    /// preamble's register copy-in, the entry dispatcher, one labeled block
    /// per instruction, then closes the function body.
    pub fn translate_function(
        &mut self,
        function: &dyn ScriptFunction,
        fn_config: &FnConfig,
        resolver: &dyn GlobalResolver,
    ) -> TranslationOutput {
        let mangled_name = entry_point_name(&self.jit_fn_prefix, function.id(), function.module_name());

        if self.config.c.human_readable {
            if let Some((section, row, col)) = function.declared_at() {
                self.emitf(format_args!("/* {section}:{row}:{col}: {} */\n", function.declaration()));
            } else {
                self.emitf(format_args!("/* <anon>: {} */\n", function.declaration()));
            }
        }

        self.emitf(format_args!("void {mangled_name}(asSVMRegisters *_regs, asPWORD entryLabel) {{\n"));
        self.emit("\tasea_vm_registers *regs = (asea_vm_registers *)_regs;\n");
        self.emit("\tasDWORD *l_bc;\n\tvoid *l_sp;\n\tvoid *l_fp;\n");
        self.emit("\tl_bc = (asDWORD*)regs->pc;\n\tl_sp = regs->sp;\n\tl_fp = regs->fp;\n");

        if self.config.debug.trace_functions {
            let (section, row, col) = function.declared_at().unwrap_or(("<anon>", 0, 0));
            self.emitf(format_args!(
                "\tasea_debug_message((asSVMRegisters*)regs, \"TRACE FUNCTION: {section}:{row}:{col}: {}\");\n",
                function.declaration()
            ));
        }

        self.emit_entry_dispatch(function);

        let code = function.bytecode();
        for ins in BytecodeIter::new(code) {
            self.translate_instruction(function, ins, fn_config, resolver);
        }

        self.emit("}\n");

        TranslationOutput {
            mangled_name,
            source: self.buffer.clone(),
            externs: self.externs.clone(),
            fallback_count: self.fallback_count,
        }
    }

    /// First pass: assigns each `JitEntry` a distinct positive label
    /// (starting at 1), collapsing adjacent `JitEntry`s into one label, and
    /// emits the dispatch switch (spec.md §4.E.2).
    fn emit_entry_dispatch(&mut self, function: &dyn ScriptFunction) {
        self.emit("\tswitch(entryLabel) {\n\tdefault:\n");

        let mut last_was_jit_entry = false;
        let mut jit_entry_id: usize = 1;
        let code = function.bytecode();

        for ins in BytecodeIter::new(code) {
            if ins.opcode != Opcode::JitEntry {
                last_was_jit_entry = false;
                continue;
            }
            if last_was_jit_entry {
                continue;
            }
            self.emitf(format_args!("\tcase {jit_entry_id}: goto bc{};\n", ins.offset));
            last_was_jit_entry = true;
            jit_entry_id += 1;
        }

        self.emit("\t}\n\n");
    }

    /// Mutates every (non-collapsed) `JitEntry`'s pointer immediate to its
    /// assigned label. Split out from [`Self::emit_entry_dispatch`] because
    /// that pass only needs read access to the shared bytecode; this one
    /// needs `&mut` and is invoked by the caller once translation succeeds,
    /// the same point the original overwrites `ins.pword0()` in place.
    pub fn assign_entry_labels(code: &mut [u32]) {
        let mut last_was_jit_entry = false;
        let offsets: Vec<usize> = BytecodeIter::new(code)
            .filter_map(|ins| {
                if ins.opcode != Opcode::JitEntry {
                    last_was_jit_entry = false;
                    return None;
                }
                if last_was_jit_entry {
                    return None;
                }
                last_was_jit_entry = true;
                Some(ins.offset)
            })
            .collect();
        for (jit_entry_id, offset) in (1..).zip(offsets) {
            set_pword0(code, offset, jit_entry_id);
        }
    }

    fn translate_instruction(
        &mut self,
        function: &dyn ScriptFunction,
        ins: BytecodeInstruction<'_>,
        fn_config: &FnConfig,
        resolver: &dyn GlobalResolver,
    ) {
        if self.config.c.human_readable {
            self.emitf(format_args!("\t/* bytecode: {} */\n", disassemble(&ins, |_| None)));
        }
        self.emitf(format_args!("\tbc{}: {{\n", ins.offset));

        if self.config.debug.blacklist_instructions.contains(&ins.opcode) {
            self.emit_vm_fallback("instruction blacklisted by config.debug, force fallback");
            self.emit("\t}\n");
            return;
        }

        self.emit_stencil(function, ins, resolver);

        if self.config.debug.fallback_after_instruction == Some(ins.opcode) {
            self.emit_vm_fallback("debug.fallback_after_instruction");
        }

        let _ = fn_config; // per-function config gates installation (controller.rs), not individual stencils.
        self.emit("\t}\n");
    }

    fn emit_stencil(&mut self, function: &dyn ScriptFunction, ins: BytecodeInstruction<'_>, resolver: &dyn GlobalResolver) {
        use Opcode::*;
        match ins.opcode {
            JitEntry => self.emit_auto_bc_inc(&ins),

            Suspend => {
                // The perf-warning-before-fallback here is user-facing (routed
                // through the engine's message callback, component H), so the
                // controller logs it when it observes this fallback count rise
                // for a function containing SUSPEND; the translator itself has
                // no engine handle at stencil-emission time.
                self.emit_vm_fallback("SUSPEND is not implemented natively");
            }
            Str => self.emit_vm_fallback("deprecated instruction"),

            PshC4 => {
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -1);\n\t\tASEA_STACK_TOP.as_asDWORD = {}u;\n",
                    ins.dword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            PshC8 => {
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -2);\n\t\tASEA_STACK_TOP.as_asQWORD = {}ull;\n",
                    ins.qword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            PshV4 => {
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -1);\n\t\tASEA_STACK_TOP.as_asDWORD = ASEA_FRAME_VAR({}).as_asDWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            PshV8 => {
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -2);\n\t\tASEA_STACK_TOP.as_asQWORD = ASEA_FRAME_VAR({}).as_asQWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            PshVPtr => {
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -AS_PTR_SIZE);\n\t\tASEA_STACK_TOP.as_asPWORD = ASEA_FRAME_VAR({}).as_asPWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }

            SetV1 | SetV2 | SetV4 => {
                self.emitf(format_args!(
                    "\t\tASEA_FRAME_VAR({}).as_asDWORD = (asDWORD){}u;\n",
                    ins.sword0(),
                    ins.dword_at(1)
                ));
                self.emit_auto_bc_inc(&ins);
            }
            SetV8 => {
                self.emitf(format_args!(
                    "\t\tASEA_FRAME_VAR({}).as_asQWORD = (asQWORD){}ull;\n",
                    ins.sword0(),
                    ins.qword_at(1)
                ));
                self.emit_auto_bc_inc(&ins);
            }

            CpyVtoR4 => {
                self.emitf(format_args!(
                    "\t\tregs->valueRegister.as_asDWORD = ASEA_FRAME_VAR({}).as_asDWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            CpyRtoV4 => {
                self.emitf(format_args!(
                    "\t\tASEA_FRAME_VAR({}).as_asDWORD = regs->valueRegister.as_asDWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            CpyVtoV4 => {
                self.emitf(format_args!(
                    "\t\tASEA_FRAME_VAR({}).as_asDWORD = ASEA_FRAME_VAR({}).as_asDWORD;\n",
                    ins.sword0(),
                    ins.sword1()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            CpyVtoV8 => {
                self.emitf(format_args!(
                    "\t\tASEA_FRAME_VAR({}).as_asQWORD = ASEA_FRAME_VAR({}).as_asQWORD;\n",
                    ins.sword0(),
                    ins.sword1()
                ));
                self.emit_auto_bc_inc(&ins);
            }

            Ldv => {
                self.emitf(format_args!(
                    "\t\tregs->valueRegister.as_asPWORD = (asPWORD)&ASEA_FRAME_VAR({}).as_asDWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            Psf => {
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -AS_PTR_SIZE);\n\t\tASEA_STACK_TOP.as_asPWORD = (asPWORD)&ASEA_FRAME_VAR({});\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }

            Pga => {
                let symbol = self.emit_global_lookup(function, ins.pword0() as *const c_void, resolver);
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -AS_PTR_SIZE);\n\t\tASEA_STACK_TOP.as_asPWORD = (asPWORD)&{symbol};\n"
                ));
                self.emit_auto_bc_inc(&ins);
            }
            PshGPtr => {
                let symbol = self.emit_global_lookup(function, ins.pword0() as *const c_void, resolver);
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -AS_PTR_SIZE);\n\t\tASEA_STACK_TOP.as_asPWORD = (asPWORD){symbol};\n"
                ));
                self.emit_auto_bc_inc(&ins);
            }

            PopPtr => {
                self.emit("\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, AS_PTR_SIZE);\n");
                self.emit_auto_bc_inc(&ins);
            }
            Var => {
                self.emitf(format_args!(
                    "\t\tl_sp = ASEA_STACK_DWORD_OFFSET(l_sp, -AS_PTR_SIZE);\n\t\tASEA_STACK_TOP.as_asPWORD = (asPWORD){};\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }

            GetObjRef => {
                self.emitf(format_args!(
                    "\t\t{{\n\t\tasPWORD *dst = &ASEA_STACK_VAR({w}).as_asPWORD;\n\t\tasPWORD var_idx = *dst;\n\t\tasPWORD var_addr = ASEA_FRAME_VAR(var_idx).as_asPWORD;\n\t\tASEA_STACK_VAR({w}).as_asPWORD = var_addr;\n\t\t}}\n",
                    w = ins.word0()
                ));
                self.emit_auto_bc_inc(&ins);
            }

            RefCpyV | Refcpy => {
                // Only NOCOUNT/VALUE types are handled without engine
                // cooperation (DESIGN.md's REFCPY Open Question decision);
                // we have no type-flags view from the bytecode alone in
                // this crate's data model, so this always falls back,
                // which is always a correct (if conservative) answer.
                self.emit_vm_fallback("can't handle release/addref for reference copy yet");
            }

            Rdr1 => self.emit_dereferenced_read(&ins, "as_asBYTE"),
            Rdr2 => self.emit_dereferenced_read(&ins, "as_asWORD"),
            Rdr4 => {
                self.emitf(format_args!(
                    "\t\tASEA_FRAME_VAR({}).as_asDWORD = ASEA_VALUEREG_DEREF().as_asDWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }
            Rdr8 => {
                self.emitf(format_args!(
                    "\t\tASEA_FRAME_VAR({}).as_asQWORD = ASEA_VALUEREG_DEREF().as_asQWORD;\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }

            Call => {
                let fn_idx = ins.int0() as u32;
                let symbol = format!("asea_script_fn{fn_idx}");
                self.externs.push(Extern {
                    name: symbol.clone(),
                    kind: ExternKind::ScriptFunction,
                    address: fn_idx as usize,
                });
                self.emitf(format_args!("\t\textern char {symbol};\n\t\tl_bc += 2;\n"));
                self.emit_save_vm_registers();
                self.emitf(format_args!(
                    "\t\tasea_call_script_function(regs, (void*)&{symbol});\n\t\treturn;\n"
                ));
            }

            CmpIi => {
                self.emitf(format_args!(
                    "\t\t{{\n\t\tasINT32 i1 = ASEA_FRAME_VAR({}).as_asINT32;\n\t\tasINT32 i2 = {};\n\t\tif (i1 == i2) regs->valueRegister.as_asINT64 = 0;\n\t\telse if (i1 < i2) regs->valueRegister.as_asINT64 = -1;\n\t\telse regs->valueRegister.as_asINT64 = 1;\n\t\t}}\n",
                    ins.sword0(),
                    ins.int_at(1)
                ));
                self.emit_auto_bc_inc(&ins);
            }

            Jmp => {
                let delta = ins.int0() + ins.size() as i32;
                let target = (ins.offset as i64 + delta as i64) as usize;
                self.emitf(format_args!("\t\tl_bc += {delta};\n\t\tgoto bc{target};\n"));
            }

            Not => {
                self.emitf(format_args!(
                    "\t\t{{\n\t\tasea_var *var = &ASEA_FRAME_VAR({});\n\t\tasDWORD value = var->as_asDWORD;\n\t\tvar->as_asDWORD = 0;\n\t\tvar->as_asBYTE = !value;\n\t\t}}\n",
                    ins.sword0()
                ));
                self.emit_auto_bc_inc(&ins);
            }

            Jz => self.emit_cond_branch(&ins, "regs->valueRegister.as_asINT64 == 0"),
            JLowZ => self.emit_cond_branch(&ins, "regs->valueRegister.as_asBYTE == 0"),
            Jnz => self.emit_cond_branch(&ins, "regs->valueRegister.as_asINT64 != 0"),
            JLowNz => self.emit_cond_branch(&ins, "regs->valueRegister.as_asBYTE != 0"),
            Js => self.emit_cond_branch(&ins, "regs->valueRegister.as_asINT64 < 0"),
            Jns => self.emit_cond_branch(&ins, "regs->valueRegister.as_asINT64 >= 0"),
            Jp => self.emit_cond_branch(&ins, "regs->valueRegister.as_asINT64 > 0"),
            Jnp => self.emit_cond_branch(&ins, "regs->valueRegister.as_asINT64 <= 0"),

            Tz => self.emit_test(&ins, "=="),
            Tnz => self.emit_test(&ins, "!="),
            Ts => self.emit_test(&ins, "<"),
            Tns => self.emit_test(&ins, ">="),
            Tp => self.emit_test(&ins, ">"),
            Tnp => self.emit_test(&ins, "<"),

            Inci8 => self.emit_prefixop_valuereg("++", "as_asBYTE"),
            Deci8 => self.emit_prefixop_valuereg("--", "as_asBYTE"),
            Inci16 => self.emit_prefixop_valuereg("++", "as_asWORD"),
            Deci16 => self.emit_prefixop_valuereg("--", "as_asWORD"),
            Inci => self.emit_prefixop_valuereg("++", "as_asDWORD"),
            Deci => self.emit_prefixop_valuereg("--", "as_asDWORD"),
            Inci64 => self.emit_prefixop_valuereg("++", "as_asQWORD"),
            Deci64 => self.emit_prefixop_valuereg("--", "as_asQWORD"),
            Incf => self.emit_prefixop_valuereg("++", "as_float"),
            Decf => self.emit_prefixop_valuereg("--", "as_float"),
            Incd => self.emit_prefixop_valuereg("++", "as_double"),
            Decd => self.emit_prefixop_valuereg("--", "as_double"),

            Negi => self.emit_unop_inplace(&ins, "-", "as_asINT32"),
            Negi64 => self.emit_unop_inplace(&ins, "-", "as_asINT64"),
            Negf => self.emit_unop_inplace(&ins, "-", "as_float"),
            Negd => self.emit_unop_inplace(&ins, "-", "as_double"),

            Addi => self.emit_binop_var_var(&ins, "+", "as_asINT32", "as_asINT32", "as_asINT32"),
            Subi => self.emit_binop_var_var(&ins, "-", "as_asINT32", "as_asINT32", "as_asINT32"),
            Muli => self.emit_binop_var_var(&ins, "*", "as_asINT32", "as_asINT32", "as_asINT32"),
            Addi64 => self.emit_binop_var_var(&ins, "+", "as_asINT64", "as_asINT64", "as_asINT64"),
            Subi64 => self.emit_binop_var_var(&ins, "-", "as_asINT64", "as_asINT64", "as_asINT64"),
            Muli64 => self.emit_binop_var_var(&ins, "*", "as_asINT64", "as_asINT64", "as_asINT64"),
            Addf => self.emit_binop_var_var(&ins, "+", "as_float", "as_float", "as_float"),
            Subf => self.emit_binop_var_var(&ins, "-", "as_float", "as_float", "as_float"),
            Mulf => self.emit_binop_var_var(&ins, "*", "as_float", "as_float", "as_float"),
            Addd => self.emit_binop_var_var(&ins, "+", "as_double", "as_double", "as_double"),
            Subd => self.emit_binop_var_var(&ins, "-", "as_double", "as_double", "as_double"),
            Muld => self.emit_binop_var_var(&ins, "*", "as_double", "as_double", "as_double"),

            Bnot64 => self.emit_unop_inplace(&ins, "~", "as_asQWORD"),
            Band64 => self.emit_binop_var_var(&ins, "&", "as_asQWORD", "as_asQWORD", "as_asQWORD"),
            Bxor64 => self.emit_binop_var_var(&ins, "^", "as_asQWORD", "as_asQWORD", "as_asQWORD"),
            Bor64 => self.emit_binop_var_var(&ins, "|", "as_asQWORD", "as_asQWORD", "as_asQWORD"),
            Bsll64 => self.emit_binop_var_var(&ins, "<<", "as_asQWORD", "as_asDWORD", "as_asQWORD"),
            Bsrl64 => self.emit_binop_var_var(&ins, ">>", "as_asQWORD", "as_asDWORD", "as_asQWORD"),
            Bsra64 => self.emit_binop_var_var(&ins, ">>", "as_asINT64", "as_asDWORD", "as_asINT64"),

            Bnot => self.emit_unop_inplace(&ins, "~", "as_asDWORD"),
            Band => self.emit_binop_var_var(&ins, "&", "as_asDWORD", "as_asDWORD", "as_asDWORD"),
            Bxor => self.emit_binop_var_var(&ins, "^", "as_asDWORD", "as_asDWORD", "as_asDWORD"),
            Bor => self.emit_binop_var_var(&ins, "|", "as_asDWORD", "as_asDWORD", "as_asDWORD"),
            Bsll => self.emit_binop_var_var(&ins, "<<", "as_asDWORD", "as_asDWORD", "as_asDWORD"),
            Bsrl => self.emit_binop_var_var(&ins, ">>", "as_asDWORD", "as_asDWORD", "as_asDWORD"),
            Bsra => self.emit_binop_var_var(&ins, ">>", "as_asINT32", "as_asDWORD", "as_asINT32"),

            Addii => self.emit_binop_var_imm(&ins, "+", "as_asINT32", "as_asINT32"),
            Subii => self.emit_binop_var_imm(&ins, "-", "as_asINT32", "as_asINT32"),
            Mulii => self.emit_binop_var_imm(&ins, "*", "as_asINT32", "as_asINT32"),

            ITof => self.emit_cast(&ins, "as_asINT32", "as_float", true),
            FToi => self.emit_cast(&ins, "as_float", "as_asINT32", true),
            UTof => self.emit_cast(&ins, "as_asDWORD", "as_float", true),
            FTou => self.emit_cast(&ins, "as_float", "as_asDWORD", true),
            SbToi => self.emit_cast(&ins, "as_asINT8", "as_asINT32", true),
            SwToi => self.emit_cast(&ins, "as_asINT16", "as_asINT32", true),
            UbToi => self.emit_cast(&ins, "as_asBYTE", "as_asINT32", true),
            UwToi => self.emit_cast(&ins, "as_asWORD", "as_asINT32", true),
            IToB => self.emit_cast(&ins, "as_asDWORD", "as_asINT8", true),
            IToW => self.emit_cast(&ins, "as_asDWORD", "as_asINT16", true),
            I64Toi => self.emit_cast(&ins, "as_asINT64", "as_asINT32", false),
            UToi64 => self.emit_cast(&ins, "as_asDWORD", "as_asINT64", false),
            IToi64 => self.emit_cast(&ins, "as_asINT32", "as_asINT64", false),
            FTod => self.emit_cast(&ins, "as_float", "as_double", false),
            DTof => self.emit_cast(&ins, "as_double", "as_float", false),
            FToi64 => self.emit_cast(&ins, "as_float", "as_asINT64", false),
            DToi64 => self.emit_cast(&ins, "as_double", "as_asINT64", true),
            FTou64 => self.emit_cast(&ins, "as_float", "as_asQWORD", false),
            DTou64 => self.emit_cast(&ins, "as_double", "as_asQWORD", true),
            I64Tof => self.emit_cast(&ins, "as_asINT64", "as_float", false),
            U64Tof => self.emit_cast(&ins, "as_asQWORD", "as_float", false),
            I64Tod => self.emit_cast(&ins, "as_asINT64", "as_double", true),
            U64Tod => self.emit_cast(&ins, "as_asQWORD", "as_double", true),
            DToi => self.emit_cast(&ins, "as_double", "as_asINT32", false),
            DTou => self.emit_cast(&ins, "as_double", "as_asDWORD", false),
            IToD => self.emit_cast(&ins, "as_asINT32", "as_double", false),
            UTod => self.emit_cast(&ins, "as_asDWORD", "as_double", false),

            other => {
                debug_assert!(crate::bytecode::is_always_fallback(other));
                self.emit_vm_fallback("unsupported instruction");
            }
        }
    }

    fn emit_dereferenced_read(&mut self, ins: &BytecodeInstruction<'_>, member: &str) {
        self.emitf(format_args!(
            "\t\t{{\n\t\tasea_var* var = &ASEA_FRAME_VAR({});\n\t\tvar->as_asDWORD = 0;\n\t\tvar->{member} = ASEA_VALUEREG_DEREF().{member};\n\t\t}}\n",
            ins.sword0()
        ));
        self.emit_auto_bc_inc(ins);
    }

    fn emit_global_lookup(&mut self, function: &dyn ScriptFunction, ptr: *const c_void, resolver: &dyn GlobalResolver) -> String {
        let symbol = match resolver.global_property_id(ptr) {
            Some(id) => {
                let symbol = format!("asea_global{id}");
                self.externs.push(Extern {
                    name: symbol.clone(),
                    kind: ExternKind::GlobalVariable,
                    address: ptr as usize,
                });
                symbol
            }
            None => {
                let name = entry_point_name(&self.jit_fn_prefix, function.id(), function.module_name());
                let symbol = format!("asea_strobj{}_{name}", self.string_constant_idx);
                self.externs.push(Extern {
                    name: symbol.clone(),
                    kind: ExternKind::StringConstant,
                    address: ptr as usize,
                });
                self.string_constant_idx += 1;
                symbol
            }
        };
        self.emitf(format_args!("\t\textern void* {symbol};\n"));
        symbol
    }

    fn emit_cond_branch(&mut self, ins: &BytecodeInstruction<'_>, test: &str) {
        let delta = ins.int0() + ins.size() as i32;
        let target = (ins.offset as i64 + delta as i64) as usize;
        self.emitf(format_args!(
            "\t\tif ({test}) {{\n\t\t\tl_bc += {delta};\n\t\t\tgoto bc{target};\n\t\t}} else {{\n\t\t\tl_bc += {};\n\t\t}}\n",
            ins.size()
        ));
    }

    fn emit_test(&mut self, ins: &BytecodeInstruction<'_>, op_with_rhs_zero: &str) {
        self.emitf(format_args!(
            "\t\t{{\n\t\tasINT32 value = regs->valueRegister.as_asINT32;\n\t\tregs->valueRegister.as_asQWORD = 0;\n\t\tregs->valueRegister.as_asBYTE = (value {op_with_rhs_zero} 0) ? VALUE_OF_BOOLEAN_TRUE : 0;\n\t\t}}\n"
        ));
        self.emit_auto_bc_inc(ins);
    }

    fn emit_prefixop_valuereg(&mut self, op: &str, member: &str) {
        self.emitf(format_args!("\t\t{op}ASEA_VALUEREG_DEREF().{member};\n"));
    }

    fn emit_unop_inplace(&mut self, ins: &BytecodeInstruction<'_>, op: &str, member: &str) {
        self.emitf(format_args!(
            "\t\tASEA_FRAME_VAR({w}).{member} = {op} ASEA_FRAME_VAR({w}).{member};\n",
            w = ins.sword0()
        ));
        self.emit_auto_bc_inc(ins);
    }

    fn emit_binop_var_var(&mut self, ins: &BytecodeInstruction<'_>, op: &str, lhs: &str, rhs: &str, dst: &str) {
        self.emitf(format_args!(
            "\t\t{{\n\t\tasea_var lhs_v = ASEA_FRAME_VAR({});\n\t\tasea_var rhs_v = ASEA_FRAME_VAR({});\n\t\tASEA_FRAME_VAR({}).{dst} = lhs_v.{lhs} {op} rhs_v.{rhs};\n\t\t}}\n",
            ins.sword1(),
            ins.sword2(),
            ins.sword0()
        ));
        self.emit_auto_bc_inc(ins);
    }

    fn emit_binop_var_imm(&mut self, ins: &BytecodeInstruction<'_>, op: &str, lhs: &str, dst: &str) {
        self.emitf(format_args!(
            "\t\t{{\n\t\tasea_var lhs_v = ASEA_FRAME_VAR({});\n\t\tASEA_FRAME_VAR({}).{dst} = lhs_v.{lhs} {op} ({});\n\t\t}}\n",
            ins.sword1(),
            ins.sword0(),
            ins.int_at(2)
        ));
        self.emit_auto_bc_inc(ins);
    }

    fn emit_cast(&mut self, ins: &BytecodeInstruction<'_>, src_member: &str, dst_member: &str, in_place: bool) {
        let dst_is_narrow = matches!(dst_member, "as_asINT8" | "as_asINT16" | "as_asBYTE" | "as_asWORD");
        let src = if in_place { ins.sword0() } else { ins.sword1() };
        let dst = ins.sword0();
        if dst_is_narrow {
            self.emitf(format_args!(
                "\t\t{{\n\t\tasea_var value; value.{dst_member} = ASEA_FRAME_VAR({src}).{src_member};\n\t\tasea_var *dst = &ASEA_FRAME_VAR({dst});\n\t\tdst->as_asDWORD = 0;\n\t\tdst->{dst_member} = value.{dst_member};\n\t\t}}\n"
            ));
        } else {
            self.emitf(format_args!(
                "\t\tASEA_FRAME_VAR({dst}).{dst_member} = ASEA_FRAME_VAR({src}).{src_member};\n"
            ));
        }
        self.emit_auto_bc_inc(ins);
    }

    fn emit_auto_bc_inc(&mut self, ins: &BytecodeInstruction<'_>) {
        self.emitf(format_args!("\t\tl_bc += {};\n", ins.size()));
    }

    /// spec.md §4.E.6: writes VM registers back and returns, leaving
    /// `programPointer` at the *current* instruction (the `CALL` stencil is
    /// the one path that advances it first).
    fn emit_vm_fallback(&mut self, reason: &str) {
        self.fallback_count += 1;
        self.emit_save_vm_registers();
        if self.config.c.human_readable {
            self.emitf(format_args!("\t\treturn; /* {reason} */\n"));
        } else {
            self.emit("\t\treturn;\n");
        }
    }

    fn emit_save_vm_registers(&mut self) {
        self.emit("\t\tregs->pc = (void*)l_bc;\n\t\tregs->sp = l_sp;\n\t\tregs->fp = l_fp;\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::encode;

    struct FakeFunction {
        id: u32,
        module: Option<String>,
        code: Vec<u32>,
        declaration: String,
    }

    impl ScriptFunction for FakeFunction {
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
            self.declaration.clone()
        }
        fn module_name(&self) -> Option<&str> {
            self.module.as_deref()
        }
        fn metadata(&self) -> &[String] {
            &[]
        }
        fn set_jit_function(&mut self, _entry: Option<crate::engine::JitEntryFn>) {}
        fn jit_function(&self) -> Option<crate::engine::JitEntryFn> {
            None
        }
    }

    struct NoGlobals;
    impl GlobalResolver for NoGlobals {
        fn global_property_id(&self, _ptr: *const c_void) -> Option<u32> {
            None
        }
    }

    fn translate(code: Vec<u32>) -> TranslationOutput {
        let mut t = Translator::new(JitConfig::for_testing(), "asea_");
        t.prepare_new_context();
        let function = FakeFunction {
            id: 3,
            module: Some("main".to_string()),
            code,
            declaration: "void test()".to_string(),
        };
        t.translate_function(&function, &FnConfig::default(), &NoGlobals)
    }

    #[test]
    fn mangled_name_escapes_non_alphanumeric_module_names() {
        assert_eq!(entry_point_name("asea_", 3, Some("my mod!")), "asea_3_module_my_20_mod_21_");
        assert_eq!(entry_point_name("asea_", 3, None), "asea_3_anon");
    }

    #[test]
    fn translating_addi_emits_the_arithmetic_and_auto_increment() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::Addi, &[0, 1, 2]);
        let out = translate(code);
        assert!(out.source.contains("lhs_v.as_asINT32 + rhs_v.as_asINT32"));
        assert!(out.source.contains(&out.mangled_name));
    }

    #[test]
    fn translating_call_registers_a_script_function_extern_and_returns() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::Call, &[5]);
        let out = translate(code);
        assert!(out.externs.iter().any(|e| e.name == "asea_script_fn5"));
        assert!(out.source.contains("asea_call_script_function"));
        assert!(out.source.contains("return;"));
    }

    #[test]
    fn unsupported_opcode_falls_back_and_increments_fallback_count() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::CallSys, &[1]);
        let out = translate(code);
        assert_eq!(out.fallback_count, 1);
        assert!(out.source.contains("unsupported instruction"));
    }

    #[test]
    fn entry_dispatch_collapses_adjacent_jit_entries_into_one_label() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::PopPtr, &[]);
        let out = translate(code);
        assert_eq!(out.source.matches("case ").count(), 1);
        assert_eq!(out.source.matches("goto bc0;").count(), 1);
    }

    #[test]
    fn assign_entry_labels_rewrites_pword0_in_place() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::PopPtr, &[]);
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        Translator::assign_entry_labels(&mut code);
        let labels: Vec<_> = BytecodeIter::new(&code)
            .filter(|i| i.opcode == Opcode::JitEntry)
            .map(|i| i.pword0())
            .collect();
        assert_eq!(labels, vec![1, 2]);
    }

    #[test]
    fn jmp_targets_the_computed_bytecode_offset() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]); // offsets 0..3
        encode(&mut code, Opcode::Jmp, &[2u32]); // at offset 3, size 2, delta 2+2=4 -> target 7
        encode(&mut code, Opcode::PopPtr, &[]);
        let out = translate(code);
        assert!(out.source.contains("goto bc7;"));
    }
}
