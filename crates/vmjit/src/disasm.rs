//! Component B: a pure (instruction) -> text function for diagnostic dumps.
//! Dispatches by the opcode's [`ArgLayout`], printing whichever operands
//! that layout defines. Only exercised when `config.c.human_readable` is
//! set (spec.md §4.B).

use crate::bytecode::{ArgLayout, BytecodeInstruction};

/// Looks up a callee's name by id, for the call-family opcodes. The
/// disassembler is otherwise engine-agnostic; this is the one place it
/// needs the engine, so it takes an optional resolver instead of a full
/// `ScriptEngine` to keep `disasm.rs` free of the engine trait's concerns.
pub fn disassemble(ins: &BytecodeInstruction<'_>, resolve_function_name: impl Fn(i32) -> Option<String>) -> String {
    let name = ins.opcode.name();
    match ins.opcode.layout() {
        ArgLayout::NoArg => name.to_string(),
        ArgLayout::Word => format!("{name} {}", ins.sword0()),
        ArgLayout::Dword => {
            if matches!(ins.opcode, crate::bytecode::Opcode::Call | crate::bytecode::Opcode::CallSys) {
                let fn_id = ins.int0();
                let callee = resolve_function_name(fn_id).unwrap_or_else(|| format!("fn#{fn_id}"));
                format!("{name} {callee}")
            } else {
                format!("{name} {}", ins.dword0())
            }
        }
        ArgLayout::WordDword => format!("{name} {}, {}", ins.sword0(), ins.dword_at(1)),
        ArgLayout::Qword => format!("{name} {}", ins.qword0()),
        ArgLayout::DwordDword => format!("{name} {}, {}", ins.dword0(), ins.dword_at(1)),
        ArgLayout::ThreeWords => format!("{name} {}, {}, {}", ins.sword0(), ins.sword1(), ins.sword2()),
        ArgLayout::TwoWords => format!("{name} {}, {}", ins.sword0(), ins.sword1()),
        ArgLayout::WordQword => format!("{name} {}, {}", ins.sword0(), ins.qword0()),
        ArgLayout::WordWordDword => format!("{name} {}, {}, {}", ins.sword0(), ins.sword1(), ins.int_at(2)),
    }
}
