//! Code emission: typed fragments, deallocation templates, and the fixed
//! runtime header.

pub mod code;
pub mod runtime;
pub mod scope;

pub use code::{CodeBlock, CodeExpr, CodeStmt};
pub use runtime::{runtime_header, DEFAULT_BATCH_SIZE};
pub use scope::{
    assemble_if_block, assemble_let_block, c_ident, choose_free, BindingPlan, FreeDecision,
    FreeTime, FreerFn, SkipReason,
};
