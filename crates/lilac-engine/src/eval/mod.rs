//! The stage-polymorphic evaluator.
//!
//! One `eval` both interprets values and synthesises residual C fragments:
//! when every operand is first-class data it computes, and when any operand
//! is a [`CodeExpr`] handle it splices fragments and yields a new fragment.
//! Dispatch goes through the meta-environment's handler slots, so a
//! `set-meta!` at any tower level reinterprets the forms evaluated under it.
//!
//! Recoverable failures (unbound symbol, arity mismatch, non-callable head,
//! uninitialized `letrec` read) degrade the offending sub-expression to
//! `Nil` with a diagnostic; only arena exhaustion aborts the compile.

mod forms;
mod prims;

use crate::compiler::Compiler;
use crate::diag::DiagKind;
use crate::emit::code::CodeExpr;
use crate::error::Fallible;
use crate::value::{
    value_to_string, Handler, HandlerTable, MEnvData, MEnvId, Symbol, ValueData, ValueId,
};

impl Compiler {
    /// Evaluate `expr` under the given meta-environment.
    pub fn eval(&mut self, expr: ValueId, menv: MEnvId) -> Fallible<ValueId> {
        match self.arena.get(expr) {
            ValueData::Int(_) | ValueData::Nil => self.h_lit(expr, menv),
            // Already in the next stage.
            ValueData::Code(_) => Ok(expr),
            ValueData::Sym(name) => {
                let name = *name;
                self.h_var(expr, name, menv)
            }
            ValueData::Cell(head, rest) => {
                let (head, rest) = (*head, *rest);
                self.eval_form(expr, head, rest, menv)
            }
            _ => Ok(expr),
        }
    }

    /// Literal dispatch: identity unless a user handler was installed.
    fn h_lit(&mut self, expr: ValueId, menv: MEnvId) -> Fallible<ValueId> {
        match self.arena.menv(menv).handlers.lit {
            Handler::Builtin(_) => Ok(expr),
            Handler::User(f) => self.apply_handler(f, &[expr]),
        }
    }

    /// Variable dispatch: environment lookup unless a user handler was
    /// installed. An unbound name or a `letrec` sentinel degrades to `Nil`.
    fn h_var(&mut self, expr: ValueId, name: Symbol, menv: MEnvId) -> Fallible<ValueId> {
        match self.arena.menv(menv).handlers.var {
            Handler::User(f) => self.apply_handler(f, &[expr]),
            Handler::Builtin(_) => {
                let env = self.arena.menv(menv).env;
                match self.arena.lookup_value(env, name) {
                    Some(value) if value == ValueId::UNINIT => {
                        self.diags.error(
                            DiagKind::Uninitialized,
                            format!(
                                "letrec binding '{}' read before initialization",
                                self.interner.resolve(name)
                            ),
                            None,
                        );
                        Ok(ValueId::NIL)
                    }
                    Some(value) => Ok(value),
                    None => {
                        self.diags.error(
                            DiagKind::UnboundSymbol,
                            format!("unbound symbol '{}'", self.interner.resolve(name)),
                            None,
                        );
                        Ok(ValueId::NIL)
                    }
                }
            }
        }
    }

    /// Application dispatch: special forms are recognised before `h_app` is
    /// consulted.
    fn eval_form(
        &mut self,
        expr: ValueId,
        head: ValueId,
        rest: ValueId,
        menv: MEnvId,
    ) -> Fallible<ValueId> {
        if let ValueData::Sym(op) = self.arena.get(head) {
            let op = *op;
            if let Some(result) = self.eval_special(expr, op, rest, menv)? {
                return Ok(result);
            }
        }

        if let Handler::User(f) = self.arena.menv(menv).handlers.app {
            return self.apply_handler(f, &[expr]);
        }

        // Default application: operator, then operands, strictly left to
        // right.
        let op_value = self.eval(head, menv)?;
        let Some(arg_asts) = self.arena.list_to_vec(rest) else {
            self.diags.error(
                DiagKind::Parse,
                "improper argument list in application",
                None,
            );
            return Ok(ValueId::NIL);
        };
        let mut args = Vec::with_capacity(arg_asts.len());
        for ast in arg_asts {
            args.push(self.eval(ast, menv)?);
        }
        self.apply_value(op_value, &args, menv)
    }

    /// Apply an already-evaluated operator to already-evaluated operands.
    pub(crate) fn apply_value(
        &mut self,
        op: ValueId,
        args: &[ValueId],
        menv: MEnvId,
    ) -> Fallible<ValueId> {
        match self.arena.get(op) {
            ValueData::Prim(prim) => {
                let prim = *prim;
                self.apply_prim(prim, args)
            }
            ValueData::Lambda(_) => self.apply_lambda(op, args, menv),
            _ => {
                let printed = value_to_string(&self.arena, &self.interner, op);
                self.diags.error(
                    DiagKind::NotCallable,
                    format!("cannot apply non-callable value {}", printed),
                    None,
                );
                Ok(ValueId::NIL)
            }
        }
    }

    /// Call a closure: the callee environment extends the *captured* env
    /// with the parameters, and the callee meta-environment inherits only
    /// the handler slots. Handlers are dynamically scoped; bindings are
    /// lexically scoped.
    fn apply_lambda(&mut self, op: ValueId, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        let lambda = match self.arena.get(op) {
            ValueData::Lambda(l) => l.clone(),
            _ => return Ok(ValueId::NIL),
        };
        if lambda.params.len() != args.len() {
            self.diags.error(
                DiagKind::Arity,
                format!(
                    "expected {} argument(s), got {}",
                    lambda.params.len(),
                    args.len()
                ),
                None,
            );
            return Ok(ValueId::NIL);
        }

        let mut env = lambda.env;
        for (&param, &arg) in lambda.params.iter().zip(args.iter()) {
            env = Some(self.arena.bind(param, arg, env)?);
            if self.opts.rc_opt {
                // Function parameters are borrowed.
                self.rc.define_borrowed(param);
            }
        }

        let handlers = self.arena.menv(menv).handlers;
        let callee = self.arena.alloc_menv(MEnvData::for_call(env, handlers))?;
        self.eval(lambda.body, callee)
    }

    /// Invoke a user-installed handler on the quoted form.
    ///
    /// The handler body runs under default handler semantics, as one tower
    /// level up would interpret it; otherwise a handler whose body
    /// contains the very shape it handles would re-enter itself forever.
    pub(crate) fn apply_handler(&mut self, f: ValueId, args: &[ValueId]) -> Fallible<ValueId> {
        match self.arena.get(f) {
            ValueData::Prim(prim) => {
                let prim = *prim;
                self.apply_prim(prim, args)
            }
            ValueData::Lambda(lambda) => {
                let lambda = lambda.clone();
                if lambda.params.len() != args.len() {
                    self.diags.error(
                        DiagKind::Arity,
                        format!(
                            "handler expects {} argument(s), got {}",
                            lambda.params.len(),
                            args.len()
                        ),
                        None,
                    );
                    return Ok(ValueId::NIL);
                }
                let mut env = lambda.env;
                for (&param, &arg) in lambda.params.iter().zip(args.iter()) {
                    env = Some(self.arena.bind(param, arg, env)?);
                }
                let callee = self
                    .arena
                    .alloc_menv(MEnvData::for_call(env, HandlerTable::builtin()))?;
                self.eval(lambda.body, callee)
            }
            _ => {
                let printed = value_to_string(&self.arena, &self.interner, f);
                self.diags.error(
                    DiagKind::NotCallable,
                    format!("handler is not callable: {}", printed),
                    None,
                );
                Ok(ValueId::NIL)
            }
        }
    }

    /// Lower an evaluated value to a C fragment.
    ///
    /// `Code` passes through, integers lift to `mk_int`, `Nil` to
    /// `mk_nil()`. Anything else has no C representation; it degrades to
    /// `mk_nil()` with a diagnostic.
    pub(crate) fn value_to_code(&mut self, value: ValueId) -> CodeExpr {
        match self.arena.get(value) {
            ValueData::Code(code) => code.clone(),
            ValueData::Int(n) => CodeExpr::mk_int(*n),
            ValueData::Nil => CodeExpr::call("mk_nil", vec![]),
            other => {
                let printed = match other {
                    ValueData::Lambda(l) => format!("#<lambda/{}>", l.params.len()),
                    ValueData::Prim(p) => format!("#<prim:{}>", p.name()),
                    _ => "#<opaque>".to_string(),
                };
                self.diags.warning(
                    DiagKind::NotCallable,
                    format!("{} has no C representation; lowered to nil", printed),
                    None,
                );
                CodeExpr::call("mk_nil", vec![])
            }
        }
    }

    /// True if the value is a code fragment.
    pub(crate) fn is_code(&self, value: ValueId) -> bool {
        self.arena.get(value).is_code()
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::Compiler;
    use crate::reader::read_one;
    use crate::value::value_to_string;

    fn eval_str(source: &str) -> (String, Compiler) {
        let mut compiler = Compiler::new().unwrap();
        let expr = read_one(
            source,
            &mut compiler.arena,
            &mut compiler.interner,
            &mut compiler.diags,
        )
        .unwrap();
        let root = compiler.root_menv();
        let value = compiler.eval(expr, root).unwrap();
        let printed = value_to_string(&compiler.arena, &compiler.interner, value);
        (printed, compiler)
    }

    #[test]
    fn test_static_arithmetic_folds() {
        assert_eq!(eval_str("(+ 2 3)").0, "5");
        assert_eq!(eval_str("(* (- 10 4) 2)").0, "12");
        assert_eq!(eval_str("(< 1 2)").0, "1");
        assert_eq!(eval_str("(= 1 2)").0, "0");
    }

    #[test]
    fn test_overflow_folds_to_zero_with_warning() {
        let (printed, compiler) = eval_str("(+ 9223372036854775807 1)");
        assert_eq!(printed, "0");
        assert!(compiler
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("overflows")));
    }

    #[test]
    fn test_quote_returns_unevaluated() {
        assert_eq!(eval_str("'(+ 1 2)").0, "(+ 1 2)");
    }

    #[test]
    fn test_lambda_application() {
        assert_eq!(eval_str("((lambda (x) (+ x 1)) 41)").0, "42");
        assert_eq!(eval_str("((lambda (x y) (cons x y)) 1 2)").0, "(1 . 2)");
    }

    #[test]
    fn test_static_let_and_shadowing() {
        assert_eq!(eval_str("(let ((x 2) (y 3)) (* x y))").0, "6");
        assert_eq!(eval_str("(let ((x 1)) (let ((x 2)) x))").0, "2");
    }

    #[test]
    fn test_letrec_recursion() {
        let src = "(letrec ((f (lambda (n) (if (< n 1) 0 (+ n (f (- n 1))))))) (f 4))";
        assert_eq!(eval_str(src).0, "10");
    }

    #[test]
    fn test_letrec_uninitialized_read_degrades() {
        let (printed, compiler) = eval_str("(letrec ((x x)) x)");
        assert_eq!(printed, "()");
        assert!(compiler
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("before initialization")));
    }

    #[test]
    fn test_unbound_symbol_degrades_to_nil() {
        let (printed, compiler) = eval_str("mystery");
        assert_eq!(printed, "()");
        assert!(compiler.has_errors());
    }

    #[test]
    fn test_apply_non_callable_reports_callee() {
        let (printed, compiler) = eval_str("(1 2 3)");
        assert_eq!(printed, "()");
        assert!(compiler
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("non-callable")));
    }

    #[test]
    fn test_arity_mismatch_degrades() {
        let (printed, compiler) = eval_str("((lambda (x) x) 1 2)");
        assert_eq!(printed, "()");
        assert!(compiler.has_errors());
    }

    #[test]
    fn test_lift_int_and_idempotence() {
        assert_eq!(eval_str("(lift 10)").0, "#<code:mk_int(10)>");
        assert_eq!(eval_str("(lift (lift 10))").0, "#<code:mk_int(10)>");
        // Non-int, non-code values lift to themselves.
        assert_eq!(eval_str("(lift 'a)").0, "a");
    }

    #[test]
    fn test_staged_prim_emits_call() {
        assert_eq!(
            eval_str("(+ (lift 10) (lift 5))").0,
            "#<code:add(mk_int(10), mk_int(5))>"
        );
        assert_eq!(
            eval_str("(cons (lift 1) (lift 2))").0,
            "#<code:mk_pair(mk_int(1), mk_int(2))>"
        );
        // Mixed static/staged operands lift the static side.
        assert_eq!(
            eval_str("(+ 1 (lift 2))").0,
            "#<code:add(mk_int(1), mk_int(2))>"
        );
    }

    #[test]
    fn test_static_if_evaluates_taken_branch_only() {
        assert_eq!(eval_str("(if 1 2 mystery)").0, "2");
        assert_eq!(eval_str("(if 0 mystery 3)").0, "3");
        assert_eq!(eval_str("(if () mystery 3)").0, "3");
    }

    #[test]
    fn test_and_or_static_semantics() {
        assert_eq!(eval_str("(and 1 2 3)").0, "3");
        assert_eq!(eval_str("(and 1 0 mystery)").0, "0");
        assert_eq!(eval_str("(or 0 () 7)").0, "7");
        assert_eq!(eval_str("(or 0 ())").0, "()");
        assert_eq!(eval_str("(and)").0, "1");
        assert_eq!(eval_str("(or)").0, "()");
    }

    #[test]
    fn test_and_or_staged_folds_to_text() {
        assert_eq!(
            eval_str("(and (lift 1) (lift 2))").0,
            "#<code:(mk_int(1) && mk_int(2))>"
        );
        assert_eq!(
            eval_str("(or (lift 1) (lift 2))").0,
            "#<code:(mk_int(1) || mk_int(2))>"
        );
    }

    #[test]
    fn test_em_creates_at_most_one_parent() {
        let (_, compiler) = eval_str("(let ((a (EM 1))) (EM 2))");
        // Root + one lazily created parent + the let body level.
        let parents = compiler.arena.menv_count();
        assert!(parents <= 3, "EM created too many levels: {}", parents);
    }

    #[test]
    fn test_set_meta_replaces_lit_handler() {
        let (printed, _) = eval_str("(let ((a (set-meta! lit (lambda (x) 99)))) 5)");
        assert_eq!(printed, "99");
    }

    #[test]
    fn test_set_meta_binds_plain_keys() {
        let (printed, _) = eval_str("(let ((a (set-meta! answer 42))) answer)");
        assert_eq!(printed, "42");
    }

    #[test]
    fn test_set_static_mutates_binding() {
        assert_eq!(eval_str("(let ((x 1)) (let ((y (set! x 5))) x))").0, "5");
    }

    #[test]
    fn test_scan_emits_typed_fragment() {
        let (printed, _) = eval_str("(scan Tree (lift 3))");
        assert_eq!(printed, "#<code:scan_Tree(mk_int(3))>");
    }

    #[test]
    fn test_scan_unknown_type_warns() {
        let (_, compiler) = eval_str("(scan Ghost (lift 3))");
        assert!(compiler
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("unregistered type")));
    }

    #[test]
    fn test_deftype_triggers_back_edge_pass() {
        let (_, compiler) = eval_str("(deftype Ring (next Ring) (prev Ring weak))");
        let demoted = compiler.types.demoted_fields();
        // next closes the self-cycle and is demoted; prev was declared weak.
        assert!(demoted.contains(&"Ring.next".to_string()));
    }

    #[test]
    fn test_em_set_meta_reinterprets_the_level_below() {
        // The first EM creates the parent level and installs a lit handler
        // there; the second EM evaluates under that reinterpretation.
        let src = "(let ((a (EM (set-meta! lit (lambda (x) 7))))) (EM 5))";
        assert_eq!(eval_str(src).0, "7");
        // The base level is untouched.
        let src = "(let ((a (EM (set-meta! lit (lambda (x) 7))))) 5)";
        assert_eq!(eval_str(src).0, "5");
    }

    #[test]
    fn test_set_meta_var_handler_intercepts_lookup() {
        let (printed, compiler) = eval_str("(let ((a (set-meta! var (lambda (v) 13)))) zzz)");
        assert_eq!(printed, "13");
        // The handler replaced the lookup, so no unbound diagnostic.
        assert!(!compiler.has_errors());
    }

    #[test]
    fn test_handlers_dynamic_bindings_lexical() {
        // The closure sees its captured x, not the caller's binding.
        let src = "(let ((x 1)) (let ((f (lambda (y) x))) (let ((x 2)) (f 0))))";
        assert_eq!(eval_str(src).0, "1");
    }
}
