//! Shape and alias analysis.
//!
//! Approximates every sub-expression's pointer topology on the
//! Ghiya–Hendren lattice `Tree < Dag < Cyclic`, plus an `Unknown` class for
//! variables the pass has no information about. `Unknown` is treated as
//! `Dag` everywhere it matters (the conservative default), so the ship
//! strategy for it is `dec_ref`.
//!
//! Alias groups are an equivalence relation over variables whose pointees
//! may overlap. Only `set!` and re-binding merge groups; `cons` does not
//! (a fresh cell is a new group).

use crate::value::{Arena, Interner, Keywords, Prim, Symbol, ValueData, ValueId};
use rustc_hash::FxHashMap;

/// Pointer-topology approximation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// No sharing, no cycles
    Tree,
    /// Sharing, no cycles
    Dag,
    /// May contain cycles
    Cyclic,
    /// Nothing known; behaves as `Dag`
    Unknown,
}

impl Shape {
    fn rank(self) -> u8 {
        match self {
            Shape::Tree => 0,
            Shape::Dag | Shape::Unknown => 1,
            Shape::Cyclic => 2,
        }
    }

    /// Lattice join (`max`). `Unknown` joins as `Dag`.
    pub fn join(self, other: Shape) -> Shape {
        let rank = self.rank().max(other.rank());
        match rank {
            0 => Shape::Tree,
            1 => Shape::Dag,
            _ => Shape::Cyclic,
        }
    }
}

/// Union-find over variable alias groups.
#[derive(Debug, Default)]
pub struct AliasGroups {
    parent: Vec<u32>,
    by_name: FxHashMap<Symbol, u32>,
}

impl AliasGroups {
    /// Create an empty group table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh group (new allocation site).
    pub fn fresh(&mut self) -> u32 {
        let id = self.parent.len() as u32;
        self.parent.push(id);
        id
    }

    /// Group of a variable, created on first sight.
    pub fn group_of(&mut self, name: Symbol) -> u32 {
        if let Some(&id) = self.by_name.get(&name) {
            return self.find(id);
        }
        let id = self.fresh();
        self.by_name.insert(name, id);
        id
    }

    /// Bind a variable to an existing group (re-binding join).
    pub fn assign(&mut self, name: Symbol, group: u32) {
        match self.by_name.get(&name) {
            Some(&existing) => {
                let existing = self.find(existing);
                self.union(existing, group);
            }
            None => {
                self.by_name.insert(name, group);
            }
        }
    }

    fn find(&mut self, mut id: u32) -> u32 {
        while self.parent[id as usize] != id {
            let up = self.parent[self.parent[id as usize] as usize];
            self.parent[id as usize] = up;
            id = up;
        }
        id
    }

    /// Merge two groups.
    pub fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb as usize] = ra;
        }
    }

    /// True if the two groups may overlap.
    pub fn same(&mut self, a: u32, b: u32) -> bool {
        self.find(a) == self.find(b)
    }
}

/// Per-variable shapes plus the alias relation.
#[derive(Debug, Default)]
pub struct ShapeContext {
    shapes: FxHashMap<Symbol, Shape>,
    /// Alias groups; public so the emitter can ask overlap questions
    pub groups: AliasGroups,
}

impl ShapeContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape of a variable (`Unknown` when never recorded).
    pub fn shape_of(&self, name: Symbol) -> Shape {
        self.shapes.get(&name).copied().unwrap_or(Shape::Unknown)
    }

    /// Record a variable's shape, joining with anything already known.
    pub fn record(&mut self, name: Symbol, shape: Shape) {
        let joined = match self.shapes.get(&name) {
            Some(existing) => existing.join(shape),
            None => shape,
        };
        self.shapes.insert(name, joined);
    }

    /// Force a variable's shape upward (used by `set!` to `Cyclic`).
    pub fn lift_to(&mut self, name: Symbol, shape: Shape) {
        self.record(name, shape);
    }
}

/// Shape of one analyzed expression together with its alias group, when the
/// expression denotes something group-tracked (a variable or substructure).
#[derive(Debug, Clone, Copy)]
pub struct ShapeResult {
    pub shape: Shape,
    pub group: Option<u32>,
}

struct ShapePass<'a> {
    arena: &'a Arena,
    interner: &'a Interner,
    kw: &'a Keywords,
}

/// Analyze `expr`, recording shapes for let-bound variables into `ctx`.
pub fn analyze_shape(
    arena: &Arena,
    interner: &Interner,
    kw: &Keywords,
    expr: ValueId,
    ctx: &mut ShapeContext,
) -> Shape {
    analyze_shape_result(arena, interner, kw, expr, ctx).shape
}

/// As [`analyze_shape`], but also returns the expression's alias group so
/// the staged-`let` handler can join re-bindings.
pub fn analyze_shape_result(
    arena: &Arena,
    interner: &Interner,
    kw: &Keywords,
    expr: ValueId,
    ctx: &mut ShapeContext,
) -> ShapeResult {
    let pass = ShapePass {
        arena,
        interner,
        kw,
    };
    pass.walk(expr, ctx)
}

impl<'a> ShapePass<'a> {
    fn walk(&self, expr: ValueId, ctx: &mut ShapeContext) -> ShapeResult {
        match self.arena.get(expr) {
            ValueData::Int(_) | ValueData::Nil | ValueData::Code(_) => ShapeResult {
                shape: Shape::Tree,
                group: None,
            },
            ValueData::Sym(name) => {
                let name = *name;
                ShapeResult {
                    shape: ctx.shape_of(name),
                    group: Some(ctx.groups.group_of(name)),
                }
            }
            ValueData::Cell(head, tail) => self.walk_form(*head, *tail, ctx),
            _ => ShapeResult {
                shape: Shape::Tree,
                group: None,
            },
        }
    }

    fn walk_form(&self, head: ValueId, rest: ValueId, ctx: &mut ShapeContext) -> ShapeResult {
        let kw = *self.kw;
        let fresh = |ctx: &mut ShapeContext, shape: Shape| ShapeResult {
            shape,
            group: Some(ctx.groups.fresh()),
        };

        let op = match self.arena.get(head) {
            ValueData::Sym(s) => Some(*s),
            _ => None,
        };
        let args = self.arena.list_to_vec(rest).unwrap_or_default();

        if let Some(op) = op {
            if op == kw.quote {
                return ShapeResult {
                    shape: Shape::Tree,
                    group: None,
                };
            }
            if op == kw.lambda {
                // The closure cell itself is fresh
                return fresh(ctx, Shape::Tree);
            }
            if op == kw.lift {
                if let Some(&arg) = args.first() {
                    return self.walk(arg, ctx);
                }
                return fresh(ctx, Shape::Tree);
            }
            if op == kw.if_ {
                if args.len() == 3 {
                    self.walk(args[0], ctx);
                    let t = self.walk(args[1], ctx);
                    let e = self.walk(args[2], ctx);
                    return ShapeResult {
                        shape: t.shape.join(e.shape),
                        group: t.group.or(e.group),
                    };
                }
                return fresh(ctx, Shape::Unknown);
            }
            if op == kw.let_ || op == kw.letrec {
                return self.walk_let(op == kw.letrec, &args, ctx);
            }
            if op == kw.set {
                // set! anywhere lifts the target to Cyclic and merges the
                // alias groups of target and source.
                if args.len() == 2 {
                    if let ValueData::Sym(target) = self.arena.get(args[0]) {
                        let target = *target;
                        let rhs = self.walk(args[1], ctx);
                        ctx.lift_to(target, Shape::Cyclic);
                        let target_group = ctx.groups.group_of(target);
                        if let Some(src) = rhs.group {
                            ctx.groups.union(target_group, src);
                        }
                        return ShapeResult {
                            shape: Shape::Cyclic,
                            group: Some(target_group),
                        };
                    }
                }
                return fresh(ctx, Shape::Cyclic);
            }
            if op == kw.and || op == kw.or || op == kw.em || op == kw.set_meta || op == kw.scan
                || op == kw.deftype
            {
                for &arg in &args {
                    self.walk(arg, ctx);
                }
                return fresh(ctx, Shape::Unknown);
            }

            match Prim::by_name(self.interner.resolve(op)) {
                Some(Prim::Cons) if args.len() == 2 => {
                    let a = self.walk(args[0], ctx);
                    let b = self.walk(args[1], ctx);
                    let shape = self.cons_shape(a, b, ctx);
                    // A fresh cell is a new group; cons does not merge.
                    return fresh(ctx, shape);
                }
                Some(Prim::Car | Prim::Cdr) if args.len() == 1 => {
                    // Substructure: same shape class, same group.
                    return self.walk(args[0], ctx);
                }
                _ => {}
            }
        }

        // Unknown call: analyze operands for their effects, default to Dag.
        for &arg in &args {
            self.walk(arg, ctx);
        }
        fresh(ctx, Shape::Dag)
    }

    fn cons_shape(&self, a: ShapeResult, b: ShapeResult, ctx: &mut ShapeContext) -> Shape {
        if a.shape == Shape::Cyclic || b.shape == Shape::Cyclic {
            return Shape::Cyclic;
        }
        let overlapping = match (a.group, b.group) {
            (Some(ga), Some(gb)) => ctx.groups.same(ga, gb),
            _ => false,
        };
        if a.shape == Shape::Tree && b.shape == Shape::Tree && !overlapping {
            Shape::Tree
        } else {
            Shape::Dag
        }
    }

    fn walk_let(&self, is_letrec: bool, args: &[ValueId], ctx: &mut ShapeContext) -> ShapeResult {
        if args.len() != 2 {
            return ShapeResult {
                shape: Shape::Unknown,
                group: Some(ctx.groups.fresh()),
            };
        }
        let bindings = self.arena.list_to_vec(args[0]).unwrap_or_default();

        if is_letrec {
            // Pre-seed every bound name to Cyclic, then re-analyse.
            for &pair in &bindings {
                if let Some(items) = self.arena.list_to_vec(pair) {
                    if let Some(ValueData::Sym(name)) = items.first().map(|id| self.arena.get(*id))
                    {
                        ctx.record(*name, Shape::Cyclic);
                    }
                }
            }
        }

        for &pair in &bindings {
            let Some(items) = self.arena.list_to_vec(pair) else {
                continue;
            };
            if items.len() != 2 {
                continue;
            }
            if let ValueData::Sym(name) = self.arena.get(items[0]) {
                let name = *name;
                let rhs = self.walk(items[1], ctx);
                ctx.record(name, rhs.shape);
                // Re-binding from another variable joins the groups.
                match rhs.group {
                    Some(group) => ctx.groups.assign(name, group),
                    None => {
                        let g = ctx.groups.fresh();
                        ctx.groups.assign(name, g);
                    }
                }
            }
        }

        self.walk(args[1], ctx)
    }
}

/// Deallocation strategy for a binding, chosen from its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipStrategy {
    /// `free_tree`: unshared, acyclic
    FreeTree,
    /// `dec_ref`: shared or unknown
    DecRef,
    /// `deferred_release`: possibly cyclic
    DeferredRelease,
}

impl ShipStrategy {
    /// The shape-to-freer table.
    pub fn for_shape(shape: Shape) -> ShipStrategy {
        match shape {
            Shape::Tree => ShipStrategy::FreeTree,
            Shape::Dag | Shape::Unknown => ShipStrategy::DecRef,
            Shape::Cyclic => ShipStrategy::DeferredRelease,
        }
    }

    /// Runtime function the emitter calls.
    pub fn c_name(self) -> &'static str {
        match self {
            ShipStrategy::FreeTree => "free_tree",
            ShipStrategy::DecRef => "dec_ref",
            ShipStrategy::DeferredRelease => "deferred_release",
        }
    }
}
