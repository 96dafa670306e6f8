//! Component H: severity-mapped routing through the engine's own message
//! callback. This is the user/script-facing logging channel spec.md
//! actually specifies (distinct from the `log`-crate maintainer tracing
//! described in SPEC_FULL.md §3, which this module does not replace).

use crate::config::{JitConfig, LogSeverity};
use crate::engine::ScriptEngine;

/// Routes one message at `severity` through `config.log_targets`. If the
/// target is `None` (the "drop" sentinel), nothing is written and the
/// engine's message callback is not invoked — matching spec.md §4.H.
pub fn log(config: &JitConfig, engine: &mut dyn ScriptEngine, location: Option<(&str, i32, i32)>, severity: LogSeverity, text: &str) {
    let Some(target) = config.log_targets.target_for(severity) else {
        return;
    };
    let (section, row, col) = location.unwrap_or(("", 0, 0));
    engine.write_message(section, row, col, target, text);
}

/// Convenience overload deriving location from a function's declaration
/// site, the way `log(config, engine, fn, severity, fmt, ...)` does in the
/// original — all formatting happens at the call site, this just routes.
pub fn log_at_function(
    config: &JitConfig,
    engine: &mut dyn ScriptEngine,
    declared_at: Option<(&str, i32, i32)>,
    severity: LogSeverity,
    text: &str,
) {
    log(config, engine, declared_at, severity, text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageType;
    use std::ffi::c_void;

    struct RecordingEngine {
        messages: Vec<(MessageType, String)>,
    }

    impl ScriptEngine for RecordingEngine {
        fn write_message(&mut self, _section: &str, _row: i32, _col: i32, severity: MessageType, text: &str) {
            self.messages.push((severity, text.to_string()));
        }
        fn global_property_id(&self, _ptr: *const c_void) -> Option<u32> {
            None
        }
        fn call_script_function(&mut self, _regs: &mut crate::engine::VmRegisters, _function_id: u32) {}
        fn call_system_function(&mut self, _regs: &mut crate::engine::VmRegisters, _fn_id: i32) -> i32 {
            0
        }
        fn call_object_method(&mut self, _regs: &mut crate::engine::VmRegisters, _obj: *mut c_void, _fn_id: i32) {}
        fn prepare_script_stack(
            &mut self,
            _regs: &mut crate::engine::VmRegisters,
            _function_id: u32,
            _pc: *mut crate::bytecode::CodeWord,
            _sp: *mut u8,
            _fp: *mut u8,
        ) -> i32 {
            0
        }
        fn prepare_script_stack_and_vars(
            &mut self,
            _regs: &mut crate::engine::VmRegisters,
            _function_id: u32,
            _pc: *mut crate::bytecode::CodeWord,
            _sp: *mut u8,
            _fp: *mut u8,
        ) -> i32 {
            0
        }
        fn clean_args(&mut self, _regs: &mut crate::engine::VmRegisters, _function_id: u32, _args: *mut crate::bytecode::CodeWord) {}
        fn cast(&mut self, _regs: &mut crate::engine::VmRegisters, _obj: *mut c_void, _type_id: u32) {}
        fn new_script_object(&mut self, _type_id: u32) -> *mut c_void {
            std::ptr::null_mut()
        }
        fn set_internal_exception(&mut self, _regs: &mut crate::engine::VmRegisters, _text: &str) {}
    }

    #[test]
    fn dropped_severity_never_reaches_the_engine() {
        let mut config = JitConfig::default();
        config.log_targets.verbose = None;
        let mut engine = RecordingEngine { messages: Vec::new() };
        log(&config, &mut engine, None, LogSeverity::Verbose, "should be dropped");
        assert!(engine.messages.is_empty());
    }

    #[test]
    fn routed_severity_reaches_the_engine_with_its_target_type() {
        let config = JitConfig::default();
        let mut engine = RecordingEngine { messages: Vec::new() };
        log(&config, &mut engine, None, LogSeverity::Error, "boom");
        assert_eq!(engine.messages, vec![(MessageType::Error, "boom".to_string())]);
    }
}
