//! Deallocation templates.
//!
//! For every binding in a staged `let` the emitter picks one of a small set
//! of strategies from the analyses: free now, free at block exit, or skip
//! with a reason. Scheduled freers run in reverse declaration order so
//! innermost frees run first, matching stack discipline. The whole scope is
//! wrapped in a GCC statement-expression block.

use crate::analysis::escape::{EscapeClass, VarUsage};
use crate::analysis::reuse::pair_reuses;
use crate::analysis::shape::{Shape, ShipStrategy};
use crate::emit::code::{CodeBlock, CodeExpr, CodeStmt};

/// The concrete runtime freer for one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreerFn {
    /// Unshared, acyclic: structural free
    FreeTree,
    /// Shared or unknown: reference-counted release
    DecRef,
    /// Possibly cyclic: deferred batch release
    DeferredRelease,
    /// Unique owner: free without the RC check
    FreeUnique,
}

impl FreerFn {
    /// Pick the freer from the binding's shape, upgrading `dec_ref` to
    /// `free_unique` when the RC table proved sole ownership.
    pub fn select(shape: Shape, unique: bool) -> FreerFn {
        match ShipStrategy::for_shape(shape) {
            ShipStrategy::FreeTree => FreerFn::FreeTree,
            ShipStrategy::DecRef => {
                if unique {
                    FreerFn::FreeUnique
                } else {
                    FreerFn::DecRef
                }
            }
            ShipStrategy::DeferredRelease => FreerFn::DeferredRelease,
        }
    }

    /// Runtime function name.
    pub fn c_name(self) -> &'static str {
        match self {
            FreerFn::FreeTree => "free_tree",
            FreerFn::DecRef => "dec_ref",
            FreerFn::DeferredRelease => "deferred_release",
            FreerFn::FreeUnique => "free_unique",
        }
    }
}

/// When the freer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeTime {
    /// Immediately after the declaration (binding is never used)
    Immediate,
    /// At block exit, in reverse declaration order
    BlockExit,
}

/// Why a binding gets no freer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A closure owns it now
    Captured,
    /// It leaves the scope as the block's value
    EscapesGlobal,
}

impl SkipReason {
    fn comment(self, name: &str) -> String {
        match self {
            SkipReason::Captured => format!("{} captured by lambda - no free", name),
            SkipReason::EscapesGlobal => format!("{} escapes to return - no free", name),
        }
    }
}

/// The per-binding decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeDecision {
    /// Emit a freer
    Free(FreerFn, FreeTime),
    /// Emit only an explanatory comment
    Skip(SkipReason),
}

/// The selection table from the staged-`let` rules.
pub fn choose_free(usage: &VarUsage, shape: Shape, unique: bool) -> FreeDecision {
    if usage.captured {
        return FreeDecision::Skip(SkipReason::Captured);
    }
    if usage.use_count == 0 {
        return FreeDecision::Free(FreerFn::select(shape, unique), FreeTime::Immediate);
    }
    if usage.escape == EscapeClass::Global {
        return FreeDecision::Skip(SkipReason::EscapesGlobal);
    }
    FreeDecision::Free(FreerFn::select(shape, unique), FreeTime::BlockExit)
}

/// One planned binding of a staged `let`.
#[derive(Debug, Clone)]
pub struct BindingPlan {
    /// C identifier (already sanitized)
    pub c_name: String,
    /// Initializer fragment
    pub init: CodeExpr,
    /// What happens to the binding
    pub decision: FreeDecision,
}

/// Map a source symbol to a valid C identifier.
pub fn c_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Assemble the statement-expression block for a staged `let`.
///
/// `result_tmp` names the temporary that captures the body's value before
/// the exit freers run. When `apply_reuse` is set, freed slots are paired
/// with later allocations in the block.
pub fn assemble_let_block(
    bindings: &[BindingPlan],
    body: CodeExpr,
    result_tmp: &str,
    apply_reuse: bool,
) -> CodeExpr {
    // A let with zero bindings emits the body's code verbatim.
    if bindings.is_empty() {
        return body;
    }

    let mut stmts: Vec<CodeStmt> = Vec::new();
    let mut exit_frees: Vec<(String, FreerFn)> = Vec::new();
    let mut deferred = false;

    for binding in bindings {
        stmts.push(CodeStmt::Decl {
            name: binding.c_name.clone(),
            init: binding.init.clone(),
        });
        match binding.decision {
            FreeDecision::Free(freer, FreeTime::Immediate) => {
                deferred |= freer == FreerFn::DeferredRelease;
                stmts.push(CodeStmt::Expr(CodeExpr::call(
                    freer.c_name(),
                    vec![CodeExpr::ident(&binding.c_name)],
                )));
            }
            FreeDecision::Free(freer, FreeTime::BlockExit) => {
                deferred |= freer == FreerFn::DeferredRelease;
                exit_frees.push((binding.c_name.clone(), freer));
            }
            FreeDecision::Skip(reason) => {
                stmts.push(CodeStmt::Comment(reason.comment(&binding.c_name)));
            }
        }
    }

    stmts.push(CodeStmt::Decl {
        name: result_tmp.to_string(),
        init: body,
    });

    // Reverse declaration order: innermost frees run first.
    for (name, freer) in exit_frees.into_iter().rev() {
        stmts.push(CodeStmt::Expr(CodeExpr::call(
            freer.c_name(),
            vec![CodeExpr::ident(&name)],
        )));
    }

    // A scope that queued deferred decrements is a safe point: the runtime
    // may drain one batch here.
    if deferred {
        stmts.push(CodeStmt::Expr(CodeExpr::call("safe_point", vec![])));
    }

    if apply_reuse {
        pair_reuses(&mut stmts);
    }

    CodeExpr::StmtExpr(CodeBlock::new(stmts, CodeExpr::ident(result_tmp)))
}

/// Assemble the statement-expression for a staged `if`.
///
/// The condition is bound to `_c`, the taken value to `_r`, and `_c` is
/// released with `dec_ref` only when the condition was not a bare
/// identifier (a single variable reference is already managed by its
/// owning scope).
pub fn assemble_if_block(cond: CodeExpr, then_code: CodeExpr, else_code: CodeExpr) -> CodeExpr {
    let release_cond = !cond.is_ident();

    let mut stmts = vec![CodeStmt::Decl {
        name: "_c".to_string(),
        init: cond,
    }];
    let guard = CodeExpr::binary(
        "&&",
        CodeExpr::ident("_c"),
        CodeExpr::field(CodeExpr::ident("_c"), "i"),
    );
    stmts.push(CodeStmt::Decl {
        name: "_r".to_string(),
        init: CodeExpr::ternary(guard, then_code, else_code),
    });
    if release_cond {
        stmts.push(CodeStmt::Expr(CodeExpr::call(
            "dec_ref",
            vec![CodeExpr::ident("_c")],
        )));
    }

    CodeExpr::StmtExpr(CodeBlock::new(stmts, CodeExpr::ident("_r")))
}
