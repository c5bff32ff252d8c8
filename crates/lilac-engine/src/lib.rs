//! Lilac Compiler Engine
//!
//! A staged compiler for a small Lisp-like language that lowers programs to
//! C source text. The compiler runs static memory-management analyses and
//! injects per-binding deallocation code into the emitted C, so the
//! produced program needs no tracing collector, only a small runtime of
//! reference counters, shape-specialised freers, a deferred-decrement work
//! list, and an arena for cycles.
//!
//! - **Reader**: lexer and iterative S-expression parser (`reader` module)
//! - **Values**: arena, interner, environments, meta-environments (`value`)
//! - **Analyses**: escape, shape/alias, free variables, type-graph
//!   back-edges, liveness, reuse pairing, RC elision (`analysis`)
//! - **Evaluator**: stage-polymorphic `eval` with a reflective handler
//!   tower (`eval`)
//! - **Emitter**: typed C fragments, deallocation templates, and the fixed
//!   runtime header (`emit`)
//!
//! # Example
//!
//! ```rust,ignore
//! use lilac_engine::Compiler;
//!
//! let mut compiler = Compiler::new()?;
//! let output = compiler.compile("(let ((x (lift 10))) (+ x (lift 5)))")?;
//! print!("{}", output.c_source);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Memory-management analyses
pub mod analysis;

/// The compiler aggregate and drivers
pub mod compiler;

/// Diagnostic collection
pub mod diag;

/// Code emission and the runtime header
pub mod emit;

/// Fatal errors
pub mod error;

/// Reader: lexer and S-expression parser
pub mod reader;

/// The compile-time value universe
pub mod value;

// The staged evaluator: `impl Compiler` blocks only.
mod eval;

// ============================================================================
// Re-exports
// ============================================================================

pub use compiler::{CheckReport, CompileOptions, CompileOutput, CompileStats, Compiler};
pub use diag::{DiagKind, DiagSink, Diagnostic, Severity};
pub use error::{Fallible, FatalError};
pub use reader::{read_one, Lexer, ReadError, Span, Token};
pub use value::{Arena, Interner, Keywords, Symbol, ValueData, ValueId};

pub use analysis::{
    analyze_escapes, analyze_shape, build_cfg, compute_liveness, find_free_points, free_variables,
    pair_reuses, AnalysisContext, EscapeClass, RcOptTable, Shape, ShapeContext, ShipStrategy,
    TypeRegistry,
};

pub use emit::{runtime_header, CodeExpr, DEFAULT_BATCH_SIZE};
