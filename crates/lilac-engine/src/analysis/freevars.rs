//! Free-variable and capture analysis.
//!
//! A pure AST walk under a bound-name list. `quote` adds nothing; `lambda`
//! extends the bound list with its parameters before walking its body;
//! `let` extends after analysing the right-hand sides, `letrec` before. The
//! result is the deduplicated set of free symbols: a closure's upvalue
//! list.

use crate::value::{Arena, Keywords, Symbol, ValueData, ValueId};
use rustc_hash::FxHashSet;

/// Collects free variables during an AST traversal.
#[derive(Debug, Default)]
pub struct FreeVarCollector {
    bound: Vec<Symbol>,
    free: FxHashSet<Symbol>,
    /// Free variables that are also `set!` targets
    assigned: FxHashSet<Symbol>,
}

impl FreeVarCollector {
    /// Create a collector with an initial bound list.
    pub fn new(bound: &[Symbol]) -> Self {
        Self {
            bound: bound.to_vec(),
            free: FxHashSet::default(),
            assigned: FxHashSet::default(),
        }
    }

    fn reference(&mut self, name: Symbol) {
        if !self.bound.contains(&name) {
            self.free.insert(name);
        }
    }

    fn assign(&mut self, name: Symbol) {
        if !self.bound.contains(&name) {
            self.free.insert(name);
            self.assigned.insert(name);
        }
    }

    /// The free-variable set.
    pub fn free_variables(&self) -> &FxHashSet<Symbol> {
        &self.free
    }

    /// Free variables that are mutated.
    pub fn assigned_variables(&self) -> &FxHashSet<Symbol> {
        &self.assigned
    }
}

/// Free variables of `expr` under `bound`.
pub fn free_variables(
    arena: &Arena,
    kw: &Keywords,
    expr: ValueId,
    bound: &[Symbol],
) -> FxHashSet<Symbol> {
    let mut collector = FreeVarCollector::new(bound);
    walk(arena, kw, expr, &mut collector);
    collector.free.clone()
}

fn walk(arena: &Arena, kw: &Keywords, expr: ValueId, out: &mut FreeVarCollector) {
    match arena.get(expr) {
        ValueData::Sym(name) => out.reference(*name),
        ValueData::Cell(head, rest) => {
            let head = *head;
            let rest = *rest;
            if let ValueData::Sym(op) = arena.get(head) {
                let op = *op;
                if !out.bound.contains(&op) && walk_special(arena, kw, op, rest, out) {
                    return;
                }
            }
            walk(arena, kw, head, out);
            if let Some(args) = arena.list_to_vec(rest) {
                for arg in args {
                    walk(arena, kw, arg, out);
                }
            }
        }
        _ => {}
    }
}

fn walk_special(
    arena: &Arena,
    kw: &Keywords,
    op: Symbol,
    rest: ValueId,
    out: &mut FreeVarCollector,
) -> bool {
    let Some(args) = arena.list_to_vec(rest) else {
        return false;
    };

    if op == kw.quote {
        return true;
    }

    if op == kw.lambda {
        if args.len() == 2 {
            let base = out.bound.len();
            if let Some(params) = arena.list_to_vec(args[0]) {
                for p in params {
                    if let ValueData::Sym(name) = arena.get(p) {
                        out.bound.push(*name);
                    }
                }
            }
            walk(arena, kw, args[1], out);
            out.bound.truncate(base);
        }
        return true;
    }

    if op == kw.let_ || op == kw.letrec {
        if args.len() == 2 {
            let base = out.bound.len();
            let bindings = arena.list_to_vec(args[0]).unwrap_or_default();
            let names: Vec<Symbol> = bindings
                .iter()
                .filter_map(|&pair| {
                    let items = arena.list_to_vec(pair)?;
                    match arena.get(*items.first()?) {
                        ValueData::Sym(name) => Some(*name),
                        _ => None,
                    }
                })
                .collect();

            // letrec binds before the right-hand sides; let after.
            if op == kw.letrec {
                out.bound.extend(names.iter().copied());
            }
            for &pair in &bindings {
                if let Some(items) = arena.list_to_vec(pair) {
                    if items.len() == 2 {
                        walk(arena, kw, items[1], out);
                    }
                }
            }
            if op == kw.let_ {
                out.bound.extend(names.iter().copied());
            }
            walk(arena, kw, args[1], out);
            out.bound.truncate(base);
        }
        return true;
    }

    if op == kw.set {
        if args.len() == 2 {
            if let ValueData::Sym(target) = arena.get(args[0]) {
                out.assign(*target);
            }
            walk(arena, kw, args[1], out);
        }
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagSink;
    use crate::reader::read_one;
    use crate::value::{Arena, Interner, Keywords};

    fn free(source: &str, bound: &[&str]) -> (Vec<String>, Interner) {
        let mut arena = Arena::new();
        let mut interner = Interner::new();
        let mut diags = DiagSink::new();
        let kw = Keywords::intern_all(&mut interner);
        let expr = read_one(source, &mut arena, &mut interner, &mut diags).unwrap();
        let bound: Vec<_> = bound.iter().map(|s| interner.intern(s)).collect();
        let set = free_variables(&arena, &kw, expr, &bound);
        let mut names: Vec<String> = set
            .into_iter()
            .map(|s| interner.resolve(s).to_string())
            .collect();
        names.sort();
        (names, interner)
    }

    #[test]
    fn test_lambda_params_are_bound() {
        let (names, _) = free("(lambda (x) (+ x y))", &["+"]);
        assert_eq!(names, vec!["y"]);
    }

    #[test]
    fn test_quote_adds_nothing() {
        let (names, _) = free("(quote (x y z))", &[]);
        assert!(names.is_empty());
    }

    #[test]
    fn test_let_rhs_sees_outer_scope() {
        // The rhs x is free (refers outward); the body x is bound.
        let (names, _) = free("(let ((x x)) x)", &[]);
        assert_eq!(names, vec!["x"]);
    }

    #[test]
    fn test_letrec_binds_before_rhs() {
        let (names, _) = free("(letrec ((f (lambda (n) (f n)))) (f 1))", &[]);
        assert!(names.is_empty());
    }

    #[test]
    fn test_set_target_is_free_use() {
        let mut arena = Arena::new();
        let mut interner = Interner::new();
        let mut diags = DiagSink::new();
        let kw = Keywords::intern_all(&mut interner);
        let expr = read_one("(set! x (+ y 1))", &mut arena, &mut interner, &mut diags).unwrap();

        let mut collector = FreeVarCollector::new(&[interner.intern("+")]);
        super::walk(&arena, &kw, expr, &mut collector);

        let x = interner.intern("x");
        let y = interner.intern("y");
        assert!(collector.free_variables().contains(&x));
        assert!(collector.free_variables().contains(&y));
        assert!(collector.assigned_variables().contains(&x));
        assert!(!collector.assigned_variables().contains(&y));
    }

    #[test]
    fn test_dedup() {
        let (names, _) = free("(+ x (+ x x))", &["+"]);
        assert_eq!(names, vec!["x"]);
    }
}
