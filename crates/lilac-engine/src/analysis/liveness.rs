//! Control-flow graph construction and liveness.
//!
//! Builds a CFG over the expression tree (straight-line chains for
//! applications, one arm per `if` branch), computes live-in/live-out sets by
//! a backward fixed point, and derives free points: locations where a
//! variable is live on entry but dead on at least one successor. A free
//! point is conditional when another successor still needs the variable.
//!
//! The fixed point is stability-checked with an explicit iteration bound of
//! `2 * node_count + 1`; the lattice is finite and the transfer functions
//! monotone, so the bound is unreachable in practice and exists only as an
//! internal-invariant guard.

use super::freevars::free_variables;
use crate::value::{Arena, Keywords, Symbol, ValueData, ValueId};
use rustc_hash::FxHashSet;

/// Key of a CFG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// One evaluation step.
#[derive(Debug, Default)]
pub struct CfgNode {
    /// Variables read at this step
    pub uses: FxHashSet<Symbol>,
    /// Variables written at this step
    pub defs: FxHashSet<Symbol>,
    /// Control-flow successors
    pub succs: Vec<NodeId>,
    /// Live on entry
    pub live_in: FxHashSet<Symbol>,
    /// Live on exit
    pub live_out: FxHashSet<Symbol>,
}

/// The expression CFG.
#[derive(Debug)]
pub struct Cfg {
    /// Nodes in creation order
    pub nodes: Vec<CfgNode>,
    /// First evaluation step
    pub entry: NodeId,
    /// Final evaluation step
    pub exit: NodeId,
}

impl Cfg {
    fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.0 as usize]
    }
}

/// Outcome of the liveness fixed point.
#[derive(Debug, Clone, Copy)]
pub struct LivenessOutcome {
    /// False if the iteration bound was hit before stability
    pub stabilized: bool,
    /// Iterations actually run
    pub iterations: u32,
}

/// A location where a binding can be released early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePoint {
    /// Node after which the variable is (partly) dead
    pub node: NodeId,
    /// The variable
    pub var: Symbol,
    /// True when some other successor still needs the variable
    pub conditional: bool,
}

struct CfgBuilder<'a> {
    arena: &'a Arena,
    kw: &'a Keywords,
    nodes: Vec<CfgNode>,
}

impl<'a> CfgBuilder<'a> {
    fn new_node(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(CfgNode::default());
        id
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.0 as usize].succs.push(to);
    }

    /// Build the sub-graph for `expr`, returning its first and last nodes.
    fn build(&mut self, expr: ValueId) -> (NodeId, NodeId) {
        match self.arena.get(expr) {
            ValueData::Sym(name) => {
                let name = *name;
                let node = self.new_node();
                self.nodes[node.0 as usize].uses.insert(name);
                (node, node)
            }
            ValueData::Cell(head, rest) => {
                let head = *head;
                let rest = *rest;
                self.build_form(head, rest)
            }
            _ => {
                let node = self.new_node();
                (node, node)
            }
        }
    }

    fn build_form(&mut self, head: ValueId, rest: ValueId) -> (NodeId, NodeId) {
        let kw = *self.kw;
        let op = match self.arena.get(head) {
            ValueData::Sym(s) => Some(*s),
            _ => None,
        };
        let args = self.arena.list_to_vec(rest).unwrap_or_default();

        if let Some(op) = op {
            if op == kw.quote {
                let node = self.new_node();
                return (node, node);
            }

            if op == kw.lambda && args.len() == 2 {
                // Opaque step: referencing the closure keeps its upvalues
                // alive.
                let node = self.new_node();
                let params = self.param_names(args[0]);
                let free = free_variables(self.arena, self.kw, args[1], &params);
                self.nodes[node.0 as usize].uses.extend(free);
                return (node, node);
            }

            if op == kw.if_ && args.len() == 3 {
                let (cond_first, cond_last) = self.build(args[0]);
                let (then_first, then_last) = self.build(args[1]);
                let (else_first, else_last) = self.build(args[2]);
                let join = self.new_node();
                self.link(cond_last, then_first);
                self.link(cond_last, else_first);
                self.link(then_last, join);
                self.link(else_last, join);
                return (cond_first, join);
            }

            if (op == kw.let_ || op == kw.letrec) && args.len() == 2 {
                return self.build_let(op == kw.letrec, args[0], args[1]);
            }

            if op == kw.set && args.len() == 2 {
                let (rhs_first, rhs_last) = self.build(args[1]);
                let assign = self.new_node();
                if let ValueData::Sym(target) = self.arena.get(args[0]) {
                    self.nodes[assign.0 as usize].defs.insert(*target);
                }
                self.link(rhs_last, assign);
                return (rhs_first, assign);
            }
        }

        // Everything else is a straight-line chain: operator, operands left
        // to right, then the application step itself.
        let (first, mut last) = self.build(head);
        for &arg in &args {
            let (arg_first, arg_last) = self.build(arg);
            self.link(last, arg_first);
            last = arg_last;
        }
        let apply = self.new_node();
        self.link(last, apply);
        (first, apply)
    }

    fn build_let(&mut self, is_letrec: bool, bindings: ValueId, body: ValueId) -> (NodeId, NodeId) {
        let pairs = self.arena.list_to_vec(bindings).unwrap_or_default();

        let mut first: Option<NodeId> = None;
        let mut last: Option<NodeId> = None;
        let chain = |builder: &mut Self, f: NodeId, l: NodeId, first: &mut Option<NodeId>, last: &mut Option<NodeId>| {
            if let Some(prev) = *last {
                builder.link(prev, f);
            }
            if first.is_none() {
                *first = Some(f);
            }
            *last = Some(l);
        };

        if is_letrec {
            // letrec defines every name before any right-hand side runs.
            let defs = self.new_node();
            for &pair in &pairs {
                if let Some(name) = self.binding_name(pair) {
                    self.nodes[defs.0 as usize].defs.insert(name);
                }
            }
            chain(self, defs, defs, &mut first, &mut last);
        }

        for &pair in &pairs {
            let Some(items) = self.arena.list_to_vec(pair) else {
                continue;
            };
            if items.len() != 2 {
                continue;
            }
            let (rhs_first, rhs_last) = self.build(items[1]);
            chain(self, rhs_first, rhs_last, &mut first, &mut last);
            if !is_letrec {
                let def = self.new_node();
                if let ValueData::Sym(name) = self.arena.get(items[0]) {
                    self.nodes[def.0 as usize].defs.insert(*name);
                }
                chain(self, def, def, &mut first, &mut last);
            }
        }

        let (body_first, body_last) = self.build(body);
        chain(self, body_first, body_last, &mut first, &mut last);
        (first.unwrap_or(body_first), body_last)
    }

    fn binding_name(&self, pair: ValueId) -> Option<Symbol> {
        let items = self.arena.list_to_vec(pair)?;
        match self.arena.get(*items.first()?) {
            ValueData::Sym(name) => Some(*name),
            _ => None,
        }
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

/// Build the CFG for one expression.
pub fn build_cfg(arena: &Arena, kw: &Keywords, expr: ValueId) -> Cfg {
    let mut builder = CfgBuilder {
        arena,
        kw,
        nodes: Vec::new(),
    };
    let (entry, exit) = builder.build(expr);
    Cfg {
        nodes: builder.nodes,
        entry,
        exit,
    }
}

/// Backward liveness fixed point:
/// `live_in = uses ∪ (live_out − defs)`, `live_out = ⋃ succ.live_in`.
pub fn compute_liveness(cfg: &mut Cfg) -> LivenessOutcome {
    let bound = 2 * cfg.nodes.len() as u32 + 1;
    let mut iterations = 0;

    loop {
        iterations += 1;
        let mut changed = false;

        for idx in (0..cfg.nodes.len()).rev() {
            let mut live_out = FxHashSet::default();
            for succ in cfg.nodes[idx].succs.clone() {
                live_out.extend(cfg.nodes[succ.0 as usize].live_in.iter().copied());
            }

            let node = &cfg.nodes[idx];
            let mut live_in: FxHashSet<Symbol> = node.uses.clone();
            for &v in &live_out {
                if !node.defs.contains(&v) {
                    live_in.insert(v);
                }
            }

            let node = &mut cfg.nodes[idx];
            if live_in != node.live_in || live_out != node.live_out {
                node.live_in = live_in;
                node.live_out = live_out;
                changed = true;
            }
        }

        if !changed {
            return LivenessOutcome {
                stabilized: true,
                iterations,
            };
        }
        if iterations >= bound {
            return LivenessOutcome {
                stabilized: false,
                iterations,
            };
        }
    }
}

/// Derive free points from a solved CFG.
pub fn find_free_points(cfg: &Cfg) -> Vec<FreePoint> {
    let mut points = Vec::new();
    for (idx, node) in cfg.nodes.iter().enumerate() {
        if node.succs.is_empty() {
            continue;
        }
        for &var in &node.live_in {
            let dead_on = node
                .succs
                .iter()
                .filter(|s| !cfg.node(**s).live_in.contains(&var))
                .count();
            if dead_on == 0 {
                continue;
            }
            let conditional = dead_on < node.succs.len();
            points.push(FreePoint {
                node: NodeId(idx as u32),
                var,
                conditional,
            });
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagSink;
    use crate::reader::read_one;
    use crate::value::{Arena, Interner, Keywords};

    fn solve(source: &str) -> (Cfg, Vec<FreePoint>, Interner) {
        let mut arena = Arena::new();
        let mut interner = Interner::new();
        let mut diags = DiagSink::new();
        let kw = Keywords::intern_all(&mut interner);
        let expr = read_one(source, &mut arena, &mut interner, &mut diags).unwrap();
        let mut cfg = build_cfg(&arena, &kw, expr);
        let outcome = compute_liveness(&mut cfg);
        assert!(outcome.stabilized);
        let points = find_free_points(&cfg);
        (cfg, points, interner)
    }

    #[test]
    fn test_straight_line_liveness() {
        let (cfg, _, mut interner) = solve("(+ x y)");
        let x = interner.intern("x");
        let y = interner.intern("y");
        // Both operands are live at entry.
        assert!(cfg.node(cfg.entry).live_in.contains(&x));
        assert!(cfg.node(cfg.entry).live_in.contains(&y));
        // Nothing is live at the exit.
        assert!(cfg.node(cfg.exit).live_out.is_empty());
    }

    #[test]
    fn test_def_kills_liveness() {
        let (cfg, _, mut interner) = solve("(let ((x (+ a 1))) (+ x 2))");
        let x = interner.intern("x");
        // x is defined inside; it is not live at the entry.
        assert!(!cfg.node(cfg.entry).live_in.contains(&x));
    }

    #[test]
    fn test_unconditional_free_point() {
        let (_, points, mut interner) = solve("(+ x 1)");
        let x = interner.intern("x");
        let for_x: Vec<_> = points.iter().filter(|p| p.var == x).collect();
        assert!(!for_x.is_empty());
        assert!(for_x.iter().all(|p| !p.conditional));
    }

    #[test]
    fn test_conditional_free_point_on_branch() {
        // x is used only in the then-branch: on the branch node it is live
        // into one successor and dead into the other.
        let (_, points, mut interner) = solve("(if c (+ x 1) 2)");
        let x = interner.intern("x");
        assert!(points.iter().any(|p| p.var == x && p.conditional));
    }

    #[test]
    fn test_liveness_is_idempotent() {
        let (mut cfg, _, _) = solve("(let ((x (+ a 1))) (if x (+ x b) c))");
        let before: Vec<_> = cfg.nodes.iter().map(|n| n.live_in.clone()).collect();
        let outcome = compute_liveness(&mut cfg);
        assert!(outcome.stabilized);
        let after: Vec<_> = cfg.nodes.iter().map(|n| n.live_in.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_lambda_keeps_upvalues_live() {
        let (cfg, _, mut interner) = solve("(f (lambda (a) (+ a x)))");
        let x = interner.intern("x");
        assert!(cfg.node(cfg.entry).live_in.contains(&x));
    }
}
