//! The compiler aggregate.
//!
//! Everything that was process-global in the source system (the arena, the
//! string pool, the type registry, the tower root, the diagnostic sink)
//! lives in one [`Compiler`] owned by the driver and threaded explicitly.
//! Dropping it frees every compile-time structure en bloc.

use crate::analysis::liveness::{build_cfg, compute_liveness, find_free_points};
use crate::analysis::rcopt::RcOptTable;
use crate::analysis::typegraph::{ReportedDemotions, TypeRegistry, MAX_PATH_DEPTH};
use crate::diag::{DiagKind, DiagSink, Diagnostic};
use crate::emit::runtime::{runtime_header, DEFAULT_BATCH_SIZE};
use crate::error::Fallible;
use crate::reader::read_one;
use crate::value::{
    Arena, EnvId, Interner, Keywords, MEnvData, MEnvId, Prim, ValueData, ValueId,
};
use serde::Serialize;
use std::fmt::Write;

/// Pass toggles and limits.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the liveness CFG pass
    pub liveness: bool,
    /// Pair frees with later allocations for in-place reuse
    pub reuse: bool,
    /// Track alias/borrow/uniqueness facts for RC elision
    pub rc_opt: bool,
    /// Deferred-decrement batch drained per safe point
    pub batch_size: u32,
    /// Node limit per arena pool
    pub arena_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            liveness: true,
            reuse: true,
            rc_opt: true,
            batch_size: DEFAULT_BATCH_SIZE,
            arena_limit: Arena::DEFAULT_LIMIT,
        }
    }
}

/// A finished compile: the full C translation unit.
#[derive(Debug)]
pub struct CompileOutput {
    /// Runtime header plus the lowered `main`
    pub c_source: String,
}

/// Summary produced by `check` (no C output).
#[derive(Debug, Serialize)]
pub struct CheckReport {
    /// Total free points found by liveness
    pub free_points: usize,
    /// Of which conditional (some successor still needs the variable)
    pub conditional_free_points: usize,
    /// Fields demoted to weak by back-edge detection
    pub demoted_fields: Vec<String>,
}

/// Arena occupancy after a compile.
#[derive(Debug, Clone, Serialize)]
pub struct CompileStats {
    /// Values allocated (including the pre-seeded Nil and sentinel)
    pub values: usize,
    /// Environment binding nodes
    pub env_nodes: usize,
    /// Meta-environments (tower levels and call frames)
    pub menvs: usize,
    /// Interned symbol names
    pub interned: usize,
    /// Registered record types
    pub types: usize,
}

/// One compilation unit's worth of state.
pub struct Compiler {
    pub(crate) arena: Arena,
    pub(crate) interner: Interner,
    pub(crate) kw: Keywords,
    pub(crate) types: TypeRegistry,
    pub(crate) diags: DiagSink,
    pub(crate) opts: CompileOptions,
    pub(crate) rc: RcOptTable,
    pub(crate) reported: ReportedDemotions,
    gensym_counter: u32,
    root_menv: MEnvId,
}

impl Compiler {
    /// A compiler with default options.
    pub fn new() -> Fallible<Self> {
        Self::with_options(CompileOptions::default())
    }

    /// A compiler with explicit options. Seeds the global environment with
    /// the primitives, the type registry with the built-in shapes, and runs
    /// the first back-edge pass.
    pub fn with_options(opts: CompileOptions) -> Fallible<Self> {
        let mut arena = Arena::with_limit(opts.arena_limit);
        let mut interner = Interner::new();
        let kw = Keywords::intern_all(&mut interner);

        let mut env: Option<EnvId> = None;
        for &prim in Prim::all() {
            let name = interner.intern(prim.name());
            let value = arena.alloc(ValueData::Prim(prim))?;
            env = Some(arena.bind(name, value, env)?);
        }
        let root_menv = arena.alloc_menv(MEnvData::new(env))?;

        let mut compiler = Self {
            arena,
            interner,
            kw,
            types: TypeRegistry::with_builtins(),
            diags: DiagSink::new(),
            opts,
            rc: RcOptTable::new(),
            reported: ReportedDemotions::new(),
            gensym_counter: 0,
            root_menv,
        };
        compiler.run_back_edge_detection();
        Ok(compiler)
    }

    /// The root tower level.
    pub fn root_menv(&self) -> MEnvId {
        self.root_menv
    }

    /// Read access to the value arena.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Read access to the string pool.
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Re-run back-edge detection and report newly demoted fields.
    pub(crate) fn run_back_edge_detection(&mut self) {
        let report = self.types.detect_back_edges();
        if report.depth_capped {
            self.diags.warning(
                DiagKind::DepthCap,
                format!(
                    "type-graph path exceeded the depth cap of {}; that walk was abandoned",
                    MAX_PATH_DEPTH
                ),
                None,
            );
        }
        for (ty, field) in &report.demoted {
            let key = format!("{}.{}", ty, field);
            if self.reported.first_time(&key) {
                self.diags
                    .warning(DiagKind::AutoWeak, format!("AUTO-WEAK: {}", key), None);
            }
        }
    }

    /// A fresh emitter temporary.
    pub(crate) fn gensym(&mut self, prefix: &str) -> String {
        let n = self.gensym_counter;
        self.gensym_counter += 1;
        format!("{}{}", prefix, n)
    }

    /// Lower one source expression to a complete C translation unit.
    pub fn compile(&mut self, source: &str) -> Fallible<CompileOutput> {
        let expr = read_one(source, &mut self.arena, &mut self.interner, &mut self.diags)?;

        if self.opts.liveness {
            let mut cfg = build_cfg(&self.arena, &self.kw, expr);
            let outcome = compute_liveness(&mut cfg);
            if !outcome.stabilized {
                self.diags.warning(
                    DiagKind::IterationCap,
                    "liveness failed to stabilize within its bound; non-lexical free points disabled",
                    None,
                );
            }
        }

        let result = self.eval(expr, self.root_menv)?;
        let c_source = self.assemble_program(result);
        Ok(CompileOutput { c_source })
    }

    /// Run the reader and the analyses without emitting C.
    pub fn check(&mut self, source: &str) -> Fallible<CheckReport> {
        let expr = read_one(source, &mut self.arena, &mut self.interner, &mut self.diags)?;

        let mut cfg = build_cfg(&self.arena, &self.kw, expr);
        let outcome = compute_liveness(&mut cfg);
        if !outcome.stabilized {
            self.diags.warning(
                DiagKind::IterationCap,
                "liveness failed to stabilize within its bound",
                None,
            );
        }
        let points = find_free_points(&cfg);
        let conditional = points.iter().filter(|p| p.conditional).count();

        Ok(CheckReport {
            free_points: points.len(),
            conditional_free_points: conditional,
            demoted_fields: self.types.demoted_fields(),
        })
    }

    /// Only the runtime header (for `lilac header`).
    pub fn header(&self) -> String {
        runtime_header(&self.types, self.opts.batch_size)
    }

    /// Arena occupancy so far.
    pub fn stats(&self) -> CompileStats {
        CompileStats {
            values: self.arena.value_count(),
            env_nodes: self.arena.env_count(),
            menvs: self.arena.menv_count(),
            interned: self.interner.len(),
            types: self.types.types().len(),
        }
    }

    /// Diagnostics recorded so far, in report order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diags.diagnostics()
    }

    /// True if any error-severity diagnostic was recorded.
    pub fn has_errors(&self) -> bool {
        self.diags.has_errors()
    }

    /// Drain the diagnostic sink.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diags.take()
    }

    /// AUTO-WEAK lines, the runtime header, then `main` wrapping the
    /// lowered expression and the exit flushes.
    fn assemble_program(&mut self, result: ValueId) -> String {
        let mut out = String::new();
        for field in self.types.demoted_fields() {
            let _ = writeln!(out, "/* AUTO-WEAK: {} */", field);
        }
        out.push_str(&runtime_header(&self.types, self.opts.batch_size));
        out.push_str("\nint main(void) {\n");

        match self.arena.get(result) {
            ValueData::Code(code) => {
                let rendered = code.render_at(1);
                let _ = writeln!(out, "    Obj* _result = {};", rendered);
                out.push_str("    (void)_result;\n");
            }
            ValueData::Int(n) => {
                let _ = writeln!(out, "    Obj* _result = mk_int({});", n);
                out.push_str("    (void)_result;\n");
            }
            ValueData::Nil => {
                out.push_str("    Obj* _result = mk_nil();\n    (void)_result;\n");
            }
            _ => {
                // No code fragment was emitted at compile time (a closure,
                // a primitive, a meta-environment).
                let printed =
                    crate::value::value_to_string(&self.arena, &self.interner, result);
                let _ = writeln!(out, "    /* compile-time value: {} */", printed);
            }
        }

        out.push_str("    flush_freelist();\n");
        out.push_str("    flush_all_deferred();\n");
        out.push_str("    cleanup_all_weak_refs();\n");
        out.push_str("    return 0;\n}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_seeds_primitives_and_types() {
        let compiler = Compiler::new().unwrap();
        assert!(compiler.types.by_name("DLLNode").is_some());
        // The seed pass already demoted the backpointers.
        assert!(compiler
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("AUTO-WEAK: DLLNode.prev")));
    }

    #[test]
    fn test_gensym_is_fresh() {
        let mut compiler = Compiler::new().unwrap();
        let a = compiler.gensym("_r");
        let b = compiler.gensym("_r");
        assert_ne!(a, b);
    }

    #[test]
    fn test_compile_static_int() {
        let mut compiler = Compiler::new().unwrap();
        let output = compiler.compile("(+ 2 3)").unwrap();
        assert!(output.c_source.contains("Obj* _result = mk_int(5);"));
        assert!(output.c_source.contains("int main(void)"));
        assert!(output.c_source.contains("flush_freelist();"));
        assert!(output.c_source.contains("flush_all_deferred();"));
        assert!(output.c_source.contains("cleanup_all_weak_refs();"));
    }

    #[test]
    fn test_check_reports_free_points() {
        let mut compiler = Compiler::new().unwrap();
        let report = compiler.check("(let ((x (+ a 1))) (if x (+ x b) 2))").unwrap();
        assert!(report.free_points > 0);
        assert!(report.demoted_fields.contains(&"DLLNode.prev".to_string()));
    }

    #[test]
    fn test_arena_exhaustion_is_fatal() {
        let opts = CompileOptions {
            arena_limit: 32,
            ..Default::default()
        };
        let mut compiler = Compiler::with_options(opts).unwrap();
        let err = compiler
            .compile("(cons (cons (cons 1 2) (cons 3 4)) (cons (cons 5 6) (cons 7 8)))")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::FatalError::OutOfMemory { .. }
        ));
    }
}
