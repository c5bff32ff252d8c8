//! Type registry, ownership graph, and back-edge detection.
//!
//! User-declared record types carry per-field pointer/strength information.
//! The ownership graph has one node per type and one edge per pointer field
//! whose target type is registered. An iterative white/gray/black DFS with a
//! bounded path stack marks every edge that closes a cycle as a back-edge
//! and demotes the corresponding field from `Strong` to `Weak`, breaking
//! ownership cycles without a tracing collector.
//!
//! Effective strengths are recomputed from declared strengths on every run,
//! so detection is idempotent.

use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};

/// Ownership strength of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    /// Owning reference, followed by freers and scanners
    Strong,
    /// Non-owning reference, invalidated on free
    Weak,
    /// Not a managed pointer at all
    Untraced,
}

/// Key of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

/// One field of a record type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// True for managed pointers
    pub is_pointer: bool,
    /// Target type name, when the pointer is typed
    pub target: Option<String>,
    /// Strength as declared (or seeded)
    pub declared: Strength,
    /// Strength after back-edge detection
    pub effective: Strength,
}

impl FieldDef {
    /// A strong typed pointer field.
    pub fn pointer(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            is_pointer: true,
            target: Some(target.to_string()),
            declared: Strength::Strong,
            effective: Strength::Strong,
        }
    }

    /// An untyped managed pointer (payload slot).
    pub fn untyped_pointer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_pointer: true,
            target: None,
            declared: Strength::Strong,
            effective: Strength::Strong,
        }
    }

    /// A scalar field.
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_pointer: false,
            target: None,
            declared: Strength::Untraced,
            effective: Strength::Untraced,
        }
    }
}

/// A registered record type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Type name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDef>,
}

/// Result of one back-edge pass.
#[derive(Debug, Clone, Default)]
pub struct BackEdgeReport {
    /// `(type name, field name)` of every demoted field
    pub demoted: Vec<(String, String)>,
    /// True if some root's path stack hit the depth cap and that walk was
    /// abandoned
    pub depth_capped: bool,
}

/// The process-wide type/field registry, threaded through the compiler.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<TypeDef>,
    by_name: FxHashMap<String, TypeId>,
}

/// Path-stack bound for the back-edge DFS.
pub const MAX_PATH_DEPTH: usize = 256;

/// The built-in seed shapes, constructed once and cloned into every
/// registry. `Pair`, `List`, and `Tree` carry untyped payload pointers;
/// the backpointer showcase types carry typed self-references that the
/// detection pass demotes.
static BUILTIN_TYPES: Lazy<Vec<TypeDef>> = Lazy::new(|| {
    vec![
        TypeDef {
            name: "Pair".to_string(),
            fields: vec![FieldDef::untyped_pointer("a"), FieldDef::untyped_pointer("b")],
        },
        TypeDef {
            name: "List".to_string(),
            fields: vec![
                FieldDef::untyped_pointer("head"),
                FieldDef::untyped_pointer("tail"),
            ],
        },
        TypeDef {
            name: "Tree".to_string(),
            fields: vec![
                FieldDef::scalar("value"),
                FieldDef::untyped_pointer("left"),
                FieldDef::untyped_pointer("right"),
            ],
        },
        TypeDef {
            name: "DLLNode".to_string(),
            fields: vec![
                FieldDef::untyped_pointer("data"),
                FieldDef::pointer("next", "DLLNode"),
                FieldDef::pointer("prev", "DLLNode"),
            ],
        },
        TypeDef {
            name: "TreeWithParent".to_string(),
            fields: vec![
                FieldDef::scalar("value"),
                FieldDef::pointer("left", "TreeWithParent"),
                FieldDef::pointer("right", "TreeWithParent"),
                FieldDef::pointer("parent", "TreeWithParent"),
            ],
        },
    ]
});

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with the built-in shapes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for ty in BUILTIN_TYPES.iter() {
            registry.declare(&ty.name, ty.fields.clone());
        }
        registry
    }

    /// Register or replace a type.
    pub fn declare(&mut self, name: &str, fields: Vec<FieldDef>) -> TypeId {
        if let Some(&id) = self.by_name.get(name) {
            self.types[id.0 as usize] = TypeDef {
                name: name.to_string(),
                fields,
            };
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDef {
            name: name.to_string(),
            fields,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Look up a type by name.
    pub fn by_name(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    /// Read a type definition.
    pub fn get(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    /// All registered types in declaration order.
    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    /// Run back-edge detection over the whole graph.
    ///
    /// Every edge whose target is on the current DFS path closes a cycle
    /// and is demoted to `Weak`. If the path stack exceeds
    /// [`MAX_PATH_DEPTH`], only that root's walk is abandoned: demotions
    /// already made are kept and the remaining roots are still scanned, so
    /// a disjoint cycle declared later still gets its edge marked.
    pub fn detect_back_edges(&mut self) -> BackEdgeReport {
        // Recompute from declared strengths: running twice yields the same
        // registry state.
        for ty in &mut self.types {
            for field in &mut ty.fields {
                field.effective = field.declared;
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut report = BackEdgeReport::default();
        let mut colors = vec![Color::White; self.types.len()];
        let mut demote: Vec<(TypeId, usize)> = Vec::new();

        // Resolve edges up front: (from, field index, to).
        let edges: Vec<Vec<(usize, TypeId)>> = self
            .types
            .iter()
            .map(|ty| {
                ty.fields
                    .iter()
                    .enumerate()
                    .filter_map(|(i, f)| {
                        if !f.is_pointer || f.declared != Strength::Strong {
                            return None;
                        }
                        let target = f.target.as_deref()?;
                        Some((i, self.by_name(target)?))
                    })
                    .collect()
            })
            .collect();

        'roots: for root in 0..self.types.len() {
            if colors[root] != Color::White {
                continue;
            }
            // Iterative DFS; the stack is the current path.
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            colors[root] = Color::Gray;

            loop {
                let Some(&(node, edge_idx)) = stack.last() else {
                    break;
                };
                if edge_idx < edges[node].len() {
                    stack.last_mut().expect("stack non-empty").1 += 1;
                    let (field_idx, target) = edges[node][edge_idx];
                    match colors[target.0 as usize] {
                        Color::Gray => {
                            // Closes a cycle through the current path.
                            demote.push((TypeId(node as u32), field_idx));
                        }
                        Color::White => {
                            if stack.len() >= MAX_PATH_DEPTH {
                                // Abandon only this root's walk. The path
                                // nodes are finished off so later roots do
                                // not mistake them for on-path ancestors.
                                report.depth_capped = true;
                                for (abandoned, _) in stack.drain(..) {
                                    colors[abandoned] = Color::Black;
                                }
                                continue 'roots;
                            }
                            colors[target.0 as usize] = Color::Gray;
                            stack.push((target.0 as usize, 0));
                        }
                        Color::Black => {}
                    }
                } else {
                    colors[node] = Color::Black;
                    stack.pop();
                }
            }
        }

        for (ty_id, field_idx) in demote {
            let ty = &mut self.types[ty_id.0 as usize];
            ty.fields[field_idx].effective = Strength::Weak;
            report
                .demoted
                .push((ty.name.clone(), ty.fields[field_idx].name.clone()));
        }
        report
    }

    /// Fields demoted by the last detection run, as `Type.field` strings.
    pub fn demoted_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        for ty in &self.types {
            for field in &ty.fields {
                if field.declared == Strength::Strong && field.effective == Strength::Weak {
                    out.push(format!("{}.{}", ty.name, field.name));
                }
            }
        }
        out
    }
}

/// Dedup helper the compiler uses to report each demotion once.
#[derive(Debug, Default)]
pub struct ReportedDemotions {
    seen: FxHashSet<String>,
}

impl ReportedDemotions {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `key` is offered.
    pub fn first_time(&mut self, key: &str) -> bool {
        self.seen.insert(key.to_string())
    }
}
