//! The memory-management analyses.
//!
//! Each pass is a standalone function over the arena-allocated AST:
//!
//! - [`escape`]: per-binding escape class on `None < Arg < Global`
//! - [`shape`]: pointer topology on `Tree < Dag < Cyclic` with alias groups
//! - [`freevars`]: closure upvalue sets
//! - [`typegraph`]: ownership graph and back-edge demotion to weak
//! - [`liveness`]: expression CFG, live sets, non-lexical free points
//! - [`reuse`]: Perceus-style free/alloc pairing over emitted statements
//! - [`rcopt`]: alias/borrow/uniqueness elision of RC operations
//!
//! Every pass is deterministic and idempotent: running it twice over the
//! same tree yields identical contexts.

pub mod escape;
pub mod freevars;
pub mod liveness;
pub mod rcopt;
pub mod reuse;
pub mod shape;
pub mod typegraph;

pub use escape::{analyze_escapes, AnalysisContext, EscapeClass, VarUsage};
pub use freevars::{free_variables, FreeVarCollector};
pub use liveness::{build_cfg, compute_liveness, find_free_points, Cfg, FreePoint, NodeId};
pub use rcopt::{RcOptInfo, RcOptTable};
pub use reuse::pair_reuses;
pub use shape::{analyze_shape, AliasGroups, Shape, ShapeContext, ShipStrategy};
pub use typegraph::{
    BackEdgeReport, FieldDef, ReportedDemotions, Strength, TypeDef, TypeId, TypeRegistry,
    MAX_PATH_DEPTH,
};
