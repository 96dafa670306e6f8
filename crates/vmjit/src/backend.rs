//! The C-compiler black box (spec.md §6's "C-compiler black box contract"),
//! redesigned for this crate's Rust ecosystem: the original engine links a
//! per-function MIR module in-process via c2mir/MIR, binding runtime and
//! extern addresses directly into the IR with no OS linker pass. No
//! in-process "C-as-a-library" crate exists in the Rust ecosystem, so this
//! backend shells out to a real system C compiler (grounded on `wasmtime`'s
//! and `nexa-sys-nexa-os`'s `cc = "1"` precedent) and gets the same
//! bind-without-linking effect by baking every extern's address as a literal
//! pointer constant directly into the generated C text before compiling it,
//! then loads the resulting shared object with `libloading` (see
//! DESIGN.md's "C-compiler black box redesign" entry).

use crate::error::{JitError, JitResult};
use crate::translator::Extern;
use std::path::Path;
use std::process::Command;

/// A compiled function, kept alive for as long as its entry point might be
/// called. Dropping this unloads the shared object; callers must not retain
/// the raw `entry` pointer past this value's lifetime.
pub struct CompiledArtifact {
    _library: libloading::Library,
    pub entry: crate::engine::JitEntryFn,
}

pub struct CBackend {
    scratch: tempfile::TempDir,
    compiler: String,
}

impl CBackend {
    pub fn new() -> JitResult<Self> {
        Ok(CBackend {
            scratch: tempfile::tempdir()?,
            compiler: std::env::var("CC").unwrap_or_else(|_| "cc".to_string()),
        })
    }

    /// Compiles one generated translation unit into a loaded shared object
    /// and returns its `entry_symbol` export. `function_id` is only used to
    /// label errors.
    pub fn compile(
        &self,
        function_id: u32,
        source: &str,
        externs: &[Extern],
        entry_symbol: &str,
        optimization_level: u8,
    ) -> JitResult<CompiledArtifact> {
        let baked = bake_externs(source, externs);

        let c_path = self.scratch.path().join(format!("{entry_symbol}.c"));
        let so_path = self.scratch.path().join(format!("{entry_symbol}.so"));
        std::fs::write(&c_path, baked)?;

        let opt_flag = format!("-O{}", optimization_level.min(3));
        let output = Command::new(&self.compiler)
            .arg("-shared")
            .arg("-fPIC")
            .arg(&opt_flag)
            .arg("-o")
            .arg(&so_path)
            .arg(&c_path)
            .output()?;

        if !output.status.success() {
            return Err(JitError::CCompilationFailed {
                function_id,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        self.load(function_id, &so_path, entry_symbol)
    }

    fn load(&self, function_id: u32, so_path: &Path, entry_symbol: &str) -> JitResult<CompiledArtifact> {
        // Safety: `so_path` was just produced by our own `cc` invocation above.
        let library = unsafe { libloading::Library::new(so_path) }?;
        let entry = unsafe {
            let symbol = library
                .get::<crate::engine::JitEntryFn>(entry_symbol.as_bytes())
                .map_err(|_| JitError::EntryPointNotFound {
                    function_id,
                    symbol: entry_symbol.to_string(),
                })?;
            *symbol
        };
        Ok(CompiledArtifact { _library: library, entry })
    }
}

/// Rewrites every `extern` declaration and reference to a name in `externs`
/// into a baked pointer-constant expression. Safe because every extern name
/// the translator invents (`asea_script_fn<n>`, `asea_global<n>`,
/// `asea_strobj<n>_<fn>`) is a fresh, compiler-generated identifier that
/// cannot collide with anything else in the translation unit.
fn bake_externs(source: &str, externs: &[Extern]) -> String {
    let mut text = source.to_string();
    // Longest names first, so e.g. `asea_global12` doesn't get clobbered by
    // a same-prefixed shorter name's replacement pass.
    let mut sorted: Vec<&Extern> = externs.iter().collect();
    sorted.sort_by_key(|e| std::cmp::Reverse(e.name.len()));

    for ext in sorted {
        let baked = format!("((void*)0x{:x})", ext.address);
        text = remove_extern_declaration_lines(&text, &ext.name);
        text = replace_word_boundary(&text, &format!("&{}", ext.name), &baked);
        text = replace_word_boundary(&text, &ext.name, &baked);
    }
    text
}

fn remove_extern_declaration_lines(text: &str, name: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !(trimmed.starts_with("extern ") && trimmed.ends_with(&format!("{name};")))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replaces every occurrence of `pattern` in `text` whose surrounding
/// characters are not identifier characters, so e.g. replacing `foo` never
/// touches `foobar` or `myfoo`.
fn replace_word_boundary(text: &str, pattern: &str, replacement: &str) -> String {
    let bytes = text.as_bytes();
    let pat_bytes = pattern.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        let matches_here = bytes[i..].starts_with(pat_bytes);
        let left_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
        let right_idx = i + pat_bytes.len();
        let right_ok = right_idx >= bytes.len() || !is_ident_byte(bytes[right_idx]);
        if matches_here && left_ok && right_ok {
            out.push_str(replacement);
            i += pat_bytes.len();
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::ExternKind;

    #[test]
    fn bake_externs_removes_declaration_and_substitutes_address_expressions() {
        let source = "extern char asea_script_fn5;\n\tfoo(regs, (void*)&asea_script_fn5);\n";
        let externs = vec![Extern {
            name: "asea_script_fn5".to_string(),
            kind: ExternKind::ScriptFunction,
            address: 5,
        }];
        let baked = bake_externs(source, &externs);
        assert!(!baked.contains("extern char asea_script_fn5;"));
        assert!(baked.contains("foo(regs, (void*)((void*)0x5));"));
    }

    #[test]
    fn bake_externs_does_not_clobber_a_longer_shared_prefix_name() {
        let source = "extern void* asea_global1;\nextern void* asea_global12;\nuse(asea_global1); use(asea_global12);\n";
        let externs = vec![
            Extern {
                name: "asea_global1".to_string(),
                kind: ExternKind::GlobalVariable,
                address: 0x10,
            },
            Extern {
                name: "asea_global12".to_string(),
                kind: ExternKind::GlobalVariable,
                address: 0x20,
            },
        ];
        let baked = bake_externs(source, &externs);
        assert!(baked.contains("use(((void*)0x10)); use(((void*)0x20));"));
    }

    #[test]
    fn word_boundary_replace_skips_longer_identifiers() {
        let out = replace_word_boundary("foo foobar myfoo", "foo", "X");
        assert_eq!(out, "X foobar myfoo");
    }
}
