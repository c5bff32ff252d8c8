//! Escape analysis.
//!
//! One forward pass over the AST classifies every tracked binding on the
//! lattice `None < Arg < Global`. The join only ascends and the AST is a
//! tree, so a single pass is exact; no fixpoint iteration is needed.
//!
//! Joins: a reference in argument position joins `Arg`; any reference
//! inside a `lambda` body joins `Global` (the closure may outlive the
//! scope); a `set!` target joins `Global`; `letrec`-bound names pre-join
//! `Global`; a bare variable in tail position joins `Global` because the
//! block's value leaves the scope.

use crate::value::{Arena, Keywords, Symbol, ValueData, ValueId};
use rustc_hash::FxHashMap;

/// Where a binding's value can end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EscapeClass {
    /// Never leaves its scope
    #[default]
    None,
    /// Passed to a callee
    Arg,
    /// Leaves the scope (captured, assigned, or returned)
    Global,
}

impl EscapeClass {
    /// Monotone lattice join.
    pub fn join(self, other: EscapeClass) -> EscapeClass {
        self.max(other)
    }
}

/// Per-binding usage record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarUsage {
    /// Number of references
    pub use_count: u32,
    /// Deepest AST depth of any reference
    pub max_depth: u32,
    /// Escape class (monotone over the pass)
    pub escape: EscapeClass,
    /// Referenced from inside a lambda body
    pub captured: bool,
    /// Set by the emitter once a freer has been emitted
    pub freed: bool,
}

/// Usage/escape table for one analysis envelope.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AnalysisContext {
    vars: FxHashMap<Symbol, VarUsage>,
}

impl AnalysisContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a binding.
    pub fn seed(&mut self, name: Symbol) {
        self.vars.entry(name).or_default();
    }

    /// True if `name` is tracked.
    pub fn is_tracked(&self, name: Symbol) -> bool {
        self.vars.contains_key(&name)
    }

    /// Usage record for a tracked binding.
    pub fn var(&self, name: Symbol) -> Option<&VarUsage> {
        self.vars.get(&name)
    }

    /// Join the escape class of a tracked binding.
    pub fn join_escape(&mut self, name: Symbol, class: EscapeClass) {
        if let Some(usage) = self.vars.get_mut(&name) {
            usage.escape = usage.escape.join(class);
        }
    }

    /// Record a reference at the given depth.
    pub fn note_use(&mut self, name: Symbol, depth: u32) {
        if let Some(usage) = self.vars.get_mut(&name) {
            usage.use_count += 1;
            usage.max_depth = usage.max_depth.max(depth);
        }
    }

    /// Mark a binding as captured by a lambda.
    pub fn mark_captured(&mut self, name: Symbol) {
        if let Some(usage) = self.vars.get_mut(&name) {
            usage.captured = true;
        }
    }

    /// Mark a binding as freed by the emitter.
    pub fn mark_freed(&mut self, name: Symbol) {
        if let Some(usage) = self.vars.get_mut(&name) {
            usage.freed = true;
        }
    }
}

struct EscapePass<'a> {
    arena: &'a Arena,
    kw: &'a Keywords,
    ctx: AnalysisContext,
    /// Names shadowed by an inner binding form
    shadow: Vec<Symbol>,
}

/// Run escape analysis over `expr` for the given tracked names.
///
/// `tail` position starts as true: the expression's own value leaves the
/// enclosing block, so a bare tracked variable there escapes globally.
pub fn analyze_escapes(
    arena: &Arena,
    kw: &Keywords,
    expr: ValueId,
    tracked: &[Symbol],
) -> AnalysisContext {
    let mut pass = EscapePass {
        arena,
        kw,
        ctx: AnalysisContext::new(),
        shadow: Vec::new(),
    };
    for &name in tracked {
        pass.ctx.seed(name);
    }
    pass.walk(expr, 0, false, false, true);
    pass.ctx
}

impl<'a> EscapePass<'a> {
    fn is_shadowed(&self, name: Symbol) -> bool {
        self.shadow.contains(&name)
    }

    /// `depth` is the AST depth, `in_lambda` joins everything to Global,
    /// `arg_pos` joins to Arg, `tail` marks result position.
    fn walk(&mut self, expr: ValueId, depth: u32, in_lambda: bool, arg_pos: bool, tail: bool) {
        match self.arena.get(expr) {
            ValueData::Sym(name) => {
                let name = *name;
                if self.is_shadowed(name) || !self.ctx.is_tracked(name) {
                    return;
                }
                self.ctx.note_use(name, depth);
                if arg_pos {
                    self.ctx.join_escape(name, EscapeClass::Arg);
                }
                if in_lambda {
                    self.ctx.join_escape(name, EscapeClass::Global);
                    self.ctx.mark_captured(name);
                }
                if tail {
                    self.ctx.join_escape(name, EscapeClass::Global);
                }
            }
            ValueData::Cell(head, tail_id) => {
                let head = *head;
                let rest = *tail_id;
                if let ValueData::Sym(op) = self.arena.get(head) {
                    let op = *op;
                    if !self.is_shadowed(op) {
                        if self.walk_special(op, rest, depth, in_lambda, tail) {
                            return;
                        }
                    }
                }
                // Plain application: operator position, then argument
                // positions.
                self.walk(head, depth + 1, in_lambda, false, false);
                let Some(args) = self.arena.list_to_vec(rest) else {
                    return;
                };
                for arg in args {
                    self.walk(arg, depth + 1, in_lambda, true, false);
                }
            }
            _ => {}
        }
    }

    /// Handle a special form; returns false if `op` is not one.
    fn walk_special(
        &mut self,
        op: Symbol,
        rest: ValueId,
        depth: u32,
        in_lambda: bool,
        tail: bool,
    ) -> bool {
        let kw = *self.kw;
        let Some(args) = self.arena.list_to_vec(rest) else {
            return false;
        };

        if op == kw.quote {
            return true;
        }

        if op == kw.lambda {
            // (lambda (params) body): everything referenced inside joins
            // Global; parameters shadow.
            if args.len() == 2 {
                let params = self.param_names(args[0]);
                let shadow_base = self.shadow.len();
                self.shadow.extend(params);
                self.walk(args[1], depth + 1, true, false, false);
                self.shadow.truncate(shadow_base);
            }
            return true;
        }

        if op == kw.let_ || op == kw.letrec {
            if args.len() == 2 {
                let bound = self.binding_names(args[0]);
                if op == kw.letrec {
                    for &name in &bound {
                        if !self.is_shadowed(name) {
                            self.ctx.join_escape(name, EscapeClass::Global);
                        }
                    }
                }
                let shadow_base = self.shadow.len();
                if op == kw.letrec {
                    self.shadow.extend(bound.iter().copied());
                }
                self.walk_binding_rhss(args[0], depth, in_lambda);
                if op == kw.let_ {
                    self.shadow.extend(bound.iter().copied());
                }
                self.walk(args[1], depth + 1, in_lambda, false, tail);
                self.shadow.truncate(shadow_base);
            }
            return true;
        }

        if op == kw.if_ {
            if !args.is_empty() {
                self.walk(args[0], depth + 1, in_lambda, false, false);
                for branch in args.iter().skip(1) {
                    self.walk(*branch, depth + 1, in_lambda, false, tail);
                }
            }
            return true;
        }

        if op == kw.set {
            if args.len() == 2 {
                if let ValueData::Sym(target) = self.arena.get(args[0]) {
                    let target = *target;
                    if !self.is_shadowed(target) {
                        self.ctx.note_use(target, depth);
                        self.ctx.join_escape(target, EscapeClass::Global);
                    }
                }
                self.walk(args[1], depth + 1, in_lambda, false, false);
            }
            return true;
        }

        if op == kw.and || op == kw.or {
            for arg in args {
                self.walk(arg, depth + 1, in_lambda, false, false);
            }
            return true;
        }

        // lift, scan, EM, set-meta!, deftype: operands behave like
        // arguments of a call.
        if op == kw.lift || op == kw.scan || op == kw.em || op == kw.set_meta || op == kw.deftype {
            for arg in args {
                self.walk(arg, depth + 1, in_lambda, true, false);
            }
            return true;
        }

        false
    }

    fn walk_binding_rhss(&mut self, bindings: ValueId, depth: u32, in_lambda: bool) {
        let Some(pairs) = self.arena.list_to_vec(bindings) else {
            return;
        };
        for pair in pairs {
            if let Some(items) = self.arena.list_to_vec(pair) {
                if items.len() == 2 {
                    self.walk(items[1], depth + 1, in_lambda, false, false);
                }
            }
        }
    }

    fn binding_names(&self, bindings: ValueId) -> Vec<Symbol> {
        let mut names = Vec::new();
        if let Some(pairs) = self.arena.list_to_vec(bindings) {
            for pair in pairs {
                if let Some(items) = self.arena.list_to_vec(pair) {
                    if let Some(ValueData::Sym(name)) = items.first().map(|id| self.arena.get(*id))
                    {
                        names.push(*name);
                    }
                }
            }
        }
        names
    }

    fn param_names(&self, params: ValueId) -> Vec<Symbol> {
        let mut names = Vec::new();
        if let Some(items) = self.arena.list_to_vec(params) {
            for item in items {
                if let ValueData::Sym(name) = self.arena.get(item) {
                    names.push(*name);
                }
            }
        }
        names
    }
}
