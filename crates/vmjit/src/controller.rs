//! Component F: the lazy compilation controller. Tracks one
//! [`LazyFunctionRecord`] per registered script function, counts calls, and
//! drives the translator + C backend once a function is worth compiling —
//! grounded on `mirjit.cpp`'s `LazyMirFunction`/counting-trampoline design,
//! redesigned so the "trampoline" is a decision the host asks for
//! (see DESIGN.md's module-vs-per-function Open Question entry) rather than
//! a function pointer the VM calls generically, since this crate's
//! `ScriptEngine` boundary has no generic "currently executing function"
//! lookup from `VmRegisters` alone.

use std::collections::{HashMap, HashSet};

use crate::backend::CBackend;
use crate::config::JitConfig;
use crate::engine::{JitEntryFn, ScriptFunction};
use crate::error::JitResult;
use crate::fnconfig::FnConfig;
use crate::translator::{GlobalResolver, Translator};

pub struct LazyFunctionRecord {
    pub function_id: u32,
    pub hit_count: u32,
    pub fn_config: FnConfig,
}

#[derive(Debug, Clone, Copy)]
pub enum DispatchDecision {
    Interpret,
    UseJit(JitEntryFn),
}

pub struct Controller {
    config: JitConfig,
    translator: Translator,
    backend: CBackend,
    records: HashMap<u32, LazyFunctionRecord>,
    /// Guards against dropping a lazy record when installing its compiled
    /// entry point causes the engine to bounce register/unregister
    /// notifications at us (spec.md §4.F).
    ignore_unregister: HashSet<u32>,
    /// Keeps every loaded shared object alive for as long as its entry
    /// point might still be called.
    artifacts: Vec<crate::backend::CompiledArtifact>,
    compiled_count: u32,
}

impl Controller {
    pub fn new(config: JitConfig, jit_fn_prefix: impl Into<String>) -> JitResult<Self> {
        let backend = CBackend::new()?;
        let translator = Translator::new(config.clone(), jit_fn_prefix);
        Ok(Controller {
            config,
            translator,
            backend,
            records: HashMap::new(),
            ignore_unregister: HashSet::new(),
            artifacts: Vec::new(),
            compiled_count: 0,
        })
    }

    pub fn compiled_count(&self) -> u32 {
        self.compiled_count
    }

    pub fn is_registered(&self, function_id: u32) -> bool {
        self.records.contains_key(&function_id)
    }

    /// Parses `function`'s metadata tags into a [`FnConfig`] and starts
    /// tracking its call count (spec.md §4.F / §4.G).
    pub fn register_function(&mut self, function: &dyn ScriptFunction) {
        let fn_config = FnConfig::from_tags(function.metadata().iter().map(|s| s.as_str()));
        self.records.insert(
            function.id(),
            LazyFunctionRecord {
                function_id: function.id(),
                hit_count: 0,
                fn_config,
            },
        );
    }

    pub fn unregister_function(&mut self, function_id: u32) {
        if self.ignore_unregister.remove(&function_id) {
            return;
        }
        self.records.remove(&function_id);
    }

    /// Called by the integration facade on every invocation of a script
    /// function with no JIT entry yet installed. Returns what the facade
    /// should do: keep interpreting, or start running a freshly compiled
    /// entry point.
    pub fn on_call(&mut self, function: &mut dyn ScriptFunction, resolver: &dyn GlobalResolver) -> JitResult<DispatchDecision> {
        if let Some(entry) = function.jit_function() {
            return Ok(DispatchDecision::UseJit(entry));
        }

        let function_id = function.id();
        let Some(record) = self.records.get_mut(&function_id) else {
            return Ok(DispatchDecision::Interpret);
        };
        if record.fn_config.disable_jit {
            return Ok(DispatchDecision::Interpret);
        }

        record.hit_count += 1;
        let eager = self.config.triggers.eager;
        let threshold = self.config.triggers.hits_before_func_compile;
        if !eager && record.hit_count < threshold {
            return Ok(DispatchDecision::Interpret);
        }

        let entry = self.compile_lazy_function(function, resolver)?;
        Ok(DispatchDecision::UseJit(entry))
    }

    fn compile_lazy_function(&mut self, function: &mut dyn ScriptFunction, resolver: &dyn GlobalResolver) -> JitResult<JitEntryFn> {
        let function_id = function.id();
        let fn_config = self.records.get(&function_id).map(|r| r.fn_config).unwrap_or_default();

        self.translator.prepare_new_context();
        let output = self.translator.translate_function(function, &fn_config, resolver);
        Translator::assign_entry_labels(function.bytecode_mut());

        let artifact = self.backend.compile(
            function_id,
            &output.source,
            &output.externs,
            &output.mangled_name,
            self.config.mir_optimization_level,
        )?;
        let entry = artifact.entry;
        self.artifacts.push(artifact);
        self.compiled_count += 1;

        // Installing the entry point below is the self-swap spec.md §4.F
        // warns about: some engines re-notify register/unregister when a
        // function's jit binding changes.
        self.ignore_unregister.insert(function_id);
        function.set_jit_function(Some(entry));

        Ok(entry)
    }

    /// The batch alternative entry point (grounded on `jitcompiler.cpp`'s
    /// `compile_all`): compiles every given function up front instead of
    /// waiting on call counts. Shares the translator and backend with the
    /// lazy path above but not its per-call record lifecycle.
    pub fn compile_all(&mut self, functions: &mut [&mut dyn ScriptFunction], resolver: &dyn GlobalResolver) -> JitResult<()> {
        for function in functions.iter_mut() {
            if function.jit_function().is_some() {
                continue;
            }
            self.compile_lazy_function(*function, resolver)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{encode, Opcode};
    use std::ffi::c_void;

    struct FakeFunction {
        id: u32,
        code: Vec<u32>,
        metadata: Vec<String>,
        jit_fn: Option<JitEntryFn>,
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
            "void test()".to_string()
        }
        fn module_name(&self) -> Option<&str> {
            Some("main")
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

    struct NoGlobals;
    impl GlobalResolver for NoGlobals {
        fn global_property_id(&self, _ptr: *const c_void) -> Option<u32> {
            None
        }
    }

    fn trivial_function(id: u32) -> FakeFunction {
        let mut code = Vec::new();
        encode(&mut code, Opcode::JitEntry, &[0, 0]);
        encode(&mut code, Opcode::PopPtr, &[]);
        FakeFunction {
            id,
            code,
            metadata: Vec::new(),
            jit_fn: None,
        }
    }

    #[test]
    fn eager_config_compiles_on_first_call() {
        let mut controller = Controller::new(JitConfig::for_testing(), "asea_").unwrap();
        let mut function = trivial_function(1);
        controller.register_function(&function);

        let decision = controller.on_call(&mut function, &NoGlobals).unwrap();
        assert!(matches!(decision, DispatchDecision::UseJit(_)));
        assert_eq!(controller.compiled_count(), 1);
        assert!(function.jit_function().is_some());
    }

    #[test]
    fn lazy_config_waits_for_the_hit_threshold() {
        let mut config = JitConfig::for_testing();
        config.triggers.eager = false;
        config.triggers.hits_before_func_compile = 2;
        let mut controller = Controller::new(config, "asea_").unwrap();
        let mut function = trivial_function(2);
        controller.register_function(&function);

        assert!(matches!(controller.on_call(&mut function, &NoGlobals).unwrap(), DispatchDecision::Interpret));
        assert!(matches!(controller.on_call(&mut function, &NoGlobals).unwrap(), DispatchDecision::UseJit(_)));
        assert_eq!(controller.compiled_count(), 1);
    }

    #[test]
    fn disable_jit_tag_never_compiles() {
        let mut controller = Controller::new(JitConfig::for_testing(), "asea_").unwrap();
        let mut function = trivial_function(3);
        function.metadata.push("disable_jit".to_string());
        controller.register_function(&function);

        for _ in 0..5 {
            assert!(matches!(controller.on_call(&mut function, &NoGlobals).unwrap(), DispatchDecision::Interpret));
        }
        assert_eq!(controller.compiled_count(), 0);
    }

    #[test]
    fn unregister_drops_the_record_unless_a_self_swap_is_in_flight() {
        let mut controller = Controller::new(JitConfig::for_testing(), "asea_").unwrap();
        let function = trivial_function(4);
        controller.register_function(&function);
        assert!(controller.is_registered(4));

        controller.unregister_function(4);
        assert!(!controller.is_registered(4));
    }

    #[test]
    fn compile_all_compiles_every_uncompiled_function_once() {
        let mut controller = Controller::new(JitConfig::for_testing(), "asea_").unwrap();
        let mut a = trivial_function(10);
        let mut b = trivial_function(11);
        controller.register_function(&a);
        controller.register_function(&b);

        let mut refs: Vec<&mut dyn ScriptFunction> = vec![&mut a, &mut b];
        controller.compile_all(&mut refs, &NoGlobals).unwrap();

        assert_eq!(controller.compiled_count(), 2);
        assert!(a.jit_function().is_some());
        assert!(b.jit_function().is_some());

        // Calling compile_all again must not recompile already-jitted functions.
        let mut refs: Vec<&mut dyn ScriptFunction> = vec![&mut a, &mut b];
        controller.compile_all(&mut refs, &NoGlobals).unwrap();
        assert_eq!(controller.compiled_count(), 2);
    }
}
