//! Special forms.
//!
//! The dispatcher recognises these before consulting `h_app`. The staged
//! `let` is the emitter's hardest template: it runs the analysis envelope
//! over the body, picks a deallocation decision per binding, and wraps
//! declarations, body, and exit freers into one statement-expression
//! fragment.

use crate::analysis::escape::analyze_escapes;
use crate::analysis::shape::{analyze_shape, analyze_shape_result, Shape, ShapeContext};
use crate::analysis::typegraph::{FieldDef, Strength};
use crate::compiler::Compiler;
use crate::diag::DiagKind;
use crate::emit::code::CodeExpr;
use crate::emit::scope::{
    assemble_if_block, assemble_let_block, c_ident, choose_free, BindingPlan, FreeDecision,
};
use crate::error::Fallible;
use crate::value::{Handler, HandlerSlot, Lambda, MEnvData, MEnvId, Symbol, ValueData, ValueId};

impl Compiler {
    /// Try to evaluate `expr` as a special form. Returns `None` when `op`
    /// is not one, so the caller falls through to `h_app`.
    pub(crate) fn eval_special(
        &mut self,
        expr: ValueId,
        op: Symbol,
        rest: ValueId,
        menv: MEnvId,
    ) -> Fallible<Option<ValueId>> {
        let kw = self.kw;
        let Some(args) = self.arena.list_to_vec(rest) else {
            return Ok(None);
        };

        if op == kw.quote {
            return self.form_quote(&args).map(Some);
        }
        if op == kw.lift {
            return self.form_lift(&args, menv).map(Some);
        }
        if op == kw.if_ {
            return self.form_if(expr, &args, menv).map(Some);
        }
        if op == kw.let_ {
            return self.form_let(expr, &args, menv, false).map(Some);
        }
        if op == kw.letrec {
            return self.form_let(expr, &args, menv, true).map(Some);
        }
        if op == kw.lambda {
            return self.form_lambda(&args, menv).map(Some);
        }
        if op == kw.em {
            return self.form_em(&args, menv).map(Some);
        }
        if op == kw.set_meta {
            return self.form_set_meta(&args, menv).map(Some);
        }
        if op == kw.scan {
            return self.form_scan(&args, menv).map(Some);
        }
        if op == kw.set {
            return self.form_set(&args, menv).map(Some);
        }
        if op == kw.deftype {
            return self.form_deftype(&args).map(Some);
        }
        if op == kw.and {
            return self.form_and_or(&args, menv, true).map(Some);
        }
        if op == kw.or {
            return self.form_and_or(&args, menv, false).map(Some);
        }
        Ok(None)
    }

    fn arity_error(&mut self, form: &str, expected: usize, got: usize) -> ValueId {
        self.diags.error(
            DiagKind::Arity,
            format!("{} expects {} argument(s), got {}", form, expected, got),
            None,
        );
        ValueId::NIL
    }

    /// `(quote x)` returns `x` unevaluated.
    fn form_quote(&mut self, args: &[ValueId]) -> Fallible<ValueId> {
        if args.len() != 1 {
            return Ok(self.arity_error("quote", 1, args.len()));
        }
        Ok(args[0])
    }

    /// `(lift v)`: `Code` passes through, integers become `mk_int(n)`
    /// fragments, anything else is identity. `(lift (lift e))` is `(lift e)`.
    fn form_lift(&mut self, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        if args.len() != 1 {
            return Ok(self.arity_error("lift", 1, args.len()));
        }
        let value = self.eval(args[0], menv)?;
        match self.arena.get(value) {
            ValueData::Code(_) => Ok(value),
            ValueData::Int(n) => {
                let code = CodeExpr::mk_int(*n);
                self.arena.alloc(ValueData::Code(code))
            }
            _ => Ok(value),
        }
    }

    /// `(if c t e)`, delegated to `h_if`.
    ///
    /// With a static condition only the taken branch is evaluated. With a
    /// `Code` condition both branches are staged and spliced into the
    /// ternary statement-expression; the condition temporary is released
    /// unless it was a bare identifier.
    fn form_if(&mut self, expr: ValueId, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        if let Handler::User(f) = self.arena.menv(menv).handlers.if_ {
            return self.apply_handler(f, &[expr]);
        }
        if args.len() != 3 {
            return Ok(self.arity_error("if", 3, args.len()));
        }

        let cond = self.eval(args[0], menv)?;
        if self.is_code(cond) {
            let then_value = self.eval(args[1], menv)?;
            let else_value = self.eval(args[2], menv)?;
            let cond_code = self.value_to_code(cond);
            let then_code = self.value_to_code(then_value);
            let else_code = self.value_to_code(else_value);
            let block = assemble_if_block(cond_code, then_code, else_code);
            return self.arena.alloc(ValueData::Code(block));
        }

        if self.arena.get(cond).is_truthy() {
            self.eval(args[1], menv)
        } else {
            self.eval(args[2], menv)
        }
    }

    /// `(lambda (params) body)`: captures the current bindings only, never
    /// the handler slots.
    fn form_lambda(&mut self, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        if args.len() != 2 {
            return Ok(self.arity_error("lambda", 2, args.len()));
        }
        let mut params = Vec::new();
        if let Some(items) = self.arena.list_to_vec(args[0]) {
            for item in items {
                match self.arena.get(item) {
                    ValueData::Sym(name) => params.push(*name),
                    _ => {
                        self.diags.error(
                            DiagKind::Parse,
                            "lambda parameter is not a symbol",
                            None,
                        );
                    }
                }
            }
        }
        let env = self.arena.menv(menv).env;
        self.arena.alloc(ValueData::Lambda(Lambda {
            params,
            body: args[1],
            env,
        }))
    }

    /// `(EM e)`: evaluate at the parent tower level, creating an empty
    /// parent lazily on the first use. At most one parent is ever created
    /// per level.
    fn form_em(&mut self, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        if args.len() != 1 {
            return Ok(self.arity_error("EM", 1, args.len()));
        }
        let parent = match self.arena.menv(menv).parent {
            Some(parent) => parent,
            None => {
                let parent = self.arena.alloc_menv(MEnvData::new(None))?;
                self.arena.menv_mut(menv).parent = Some(parent);
                parent
            }
        };
        self.eval(args[0], parent)
    }

    /// `(set-meta! key fn)`: replace a handler slot (`app`, `let`, `if`,
    /// `lit`, `var`) or rebind `key` in the meta environment.
    fn form_set_meta(&mut self, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        if args.len() != 2 {
            return Ok(self.arity_error("set-meta!", 2, args.len()));
        }
        let Some(key) = self.syntactic_symbol(args[0]) else {
            self.diags
                .error(DiagKind::Parse, "set-meta! key is not a symbol", None);
            return Ok(ValueId::NIL);
        };
        let value = self.eval(args[1], menv)?;

        if let Some(slot) = HandlerSlot::from_name(self.interner.resolve(key)) {
            self.arena
                .menv_mut(menv)
                .handlers
                .set(slot, Handler::User(value));
            return Ok(ValueId::NIL);
        }

        let env = self.arena.menv(menv).env;
        match self.arena.lookup(env, key) {
            Some(node) => self.arena.env_set_value(node, value),
            None => {
                let new_env = self.arena.bind(key, value, env)?;
                self.arena.menv_mut(menv).env = Some(new_env);
            }
        }
        Ok(ValueId::NIL)
    }

    /// `(scan T v)` emits the fragment `scan_T(v)`.
    fn form_scan(&mut self, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        if args.len() != 2 {
            return Ok(self.arity_error("scan", 2, args.len()));
        }
        let Some(ty) = self.syntactic_symbol(args[0]) else {
            self.diags
                .error(DiagKind::Parse, "scan type is not a symbol", None);
            return Ok(ValueId::NIL);
        };
        let ty_name = self.interner.resolve(ty).to_string();
        if self.types.by_name(&ty_name).is_none() {
            self.diags.warning(
                DiagKind::UnknownType,
                format!("scan of unregistered type '{}'", ty_name),
                None,
            );
        }
        let value = self.eval(args[1], menv)?;
        let code = self.value_to_code(value);
        let call = CodeExpr::call(format!("scan_{}", ty_name), vec![code]);
        self.arena.alloc(ValueData::Code(call))
    }

    /// `(set! x e)`: mutate the binding in place; staged when either side
    /// already lives in the next stage.
    fn form_set(&mut self, args: &[ValueId], menv: MEnvId) -> Fallible<ValueId> {
        if args.len() != 2 {
            return Ok(self.arity_error("set!", 2, args.len()));
        }
        let Some(target) = self.syntactic_symbol(args[0]) else {
            self.diags
                .error(DiagKind::Parse, "set! target is not a symbol", None);
            return Ok(ValueId::NIL);
        };
        let value = self.eval(args[1], menv)?;

        let env = self.arena.menv(menv).env;
        let node = self.arena.lookup(env, target);

        let target_is_code = node
            .map(|n| self.is_code(self.arena.env(n).value))
            .unwrap_or(false);
        if self.is_code(value) || target_is_code {
            let rhs = self.value_to_code(value);
            let name = c_ident(self.interner.resolve(target));
            let assign = CodeExpr::assign(name, rhs);
            return self.arena.alloc(ValueData::Code(assign));
        }

        match node {
            Some(node) => {
                self.arena.env_set_value(node, value);
                Ok(value)
            }
            None => {
                self.diags.error(
                    DiagKind::UnboundSymbol,
                    format!("set! of unbound symbol '{}'", self.interner.resolve(target)),
                    None,
                );
                Ok(ValueId::NIL)
            }
        }
    }

    /// `(deftype Name (field Type [weak]) ...)`: register a record type and
    /// re-run back-edge detection.
    fn form_deftype(&mut self, args: &[ValueId]) -> Fallible<ValueId> {
        if args.is_empty() {
            return Ok(self.arity_error("deftype", 1, 0));
        }
        let Some(name) = self.syntactic_symbol(args[0]) else {
            self.diags
                .error(DiagKind::Parse, "deftype name is not a symbol", None);
            return Ok(ValueId::NIL);
        };
        let type_name = self.interner.resolve(name).to_string();

        let mut fields = Vec::new();
        for &spec in &args[1..] {
            let Some(items) = self.arena.list_to_vec(spec) else {
                self.diags
                    .error(DiagKind::Parse, "deftype field is not a list", None);
                continue;
            };
            let field_name = items.first().and_then(|&id| self.syntactic_symbol(id));
            let field_ty = items.get(1).and_then(|&id| self.syntactic_symbol(id));
            let (Some(field_name), Some(field_ty)) = (field_name, field_ty) else {
                self.diags.error(
                    DiagKind::Parse,
                    "deftype field needs a name and a type",
                    None,
                );
                continue;
            };
            let field_name = self.interner.resolve(field_name).to_string();
            let field_ty = self.interner.resolve(field_ty).to_string();

            let weak = items
                .get(2)
                .and_then(|&id| self.syntactic_symbol(id))
                .map(|s| self.interner.resolve(s) == "weak")
                .unwrap_or(false);

            let mut field = if field_ty == "int" {
                FieldDef::scalar(&field_name)
            } else {
                FieldDef::pointer(&field_name, &field_ty)
            };
            if weak && field.is_pointer {
                field.declared = Strength::Weak;
                field.effective = Strength::Weak;
            }
            fields.push(field);
        }

        self.types.declare(&type_name, fields);
        self.run_back_edge_detection();
        Ok(ValueId::NIL)
    }

    /// `and`/`or`: short-circuit while static; once any operand is `Code`,
    /// the whole chain folds into `(a && b)` / `(a || b)` text.
    fn form_and_or(&mut self, args: &[ValueId], menv: MEnvId, is_and: bool) -> Fallible<ValueId> {
        let mut values = Vec::with_capacity(args.len());
        let mut saw_code = false;

        for &ast in args {
            let value = self.eval(ast, menv)?;
            if self.is_code(value) {
                saw_code = true;
            }
            if !saw_code {
                let truthy = self.arena.get(value).is_truthy();
                if is_and && !truthy {
                    return Ok(value);
                }
                if !is_and && truthy {
                    return Ok(value);
                }
            }
            values.push(value);
        }

        if saw_code {
            let op = if is_and { "&&" } else { "||" };
            let mut codes = values.into_iter();
            let first = match codes.next() {
                Some(v) => self.value_to_code(v),
                None => CodeExpr::mk_int(if is_and { 1 } else { 0 }),
            };
            let mut chain = first;
            for v in codes {
                let rhs = self.value_to_code(v);
                chain = CodeExpr::binary(op, chain, rhs);
            }
            return self.arena.alloc(ValueData::Code(chain));
        }

        // Fully static: return-last semantics.
        match values.last() {
            Some(&last) => Ok(last),
            None => {
                if is_and {
                    self.arena.int(1)
                } else {
                    Ok(ValueId::NIL)
                }
            }
        }
    }

    /// `let` / `letrec`, delegated to `h_let`.
    fn form_let(
        &mut self,
        expr: ValueId,
        args: &[ValueId],
        menv: MEnvId,
        is_letrec: bool,
    ) -> Fallible<ValueId> {
        if let Handler::User(f) = self.arena.menv(menv).handlers.let_ {
            return self.apply_handler(f, &[expr]);
        }
        if args.len() != 2 {
            let name = if is_letrec { "letrec" } else { "let" };
            return Ok(self.arity_error(name, 2, args.len()));
        }
        let body_ast = args[1];

        // Parse the binding list.
        let mut bindings: Vec<(Symbol, ValueId)> = Vec::new();
        for pair in self.arena.list_to_vec(args[0]).unwrap_or_default() {
            let items = self.arena.list_to_vec(pair).unwrap_or_default();
            let name = items.first().and_then(|&id| match self.arena.get(id) {
                ValueData::Sym(s) => Some(*s),
                _ => None,
            });
            match (name, items.get(1)) {
                (Some(name), Some(&rhs)) if items.len() == 2 => bindings.push((name, rhs)),
                _ => {
                    self.diags.error(
                        DiagKind::Parse,
                        "malformed binding; expected (name expr)",
                        None,
                    );
                }
            }
        }

        // Evaluate the right-hand sides.
        let mut values = Vec::with_capacity(bindings.len());

        let rec_menv = if is_letrec {
            // letrec pre-binds every name to the sentinel in one shared
            // environment, then patches each binding cell in place.
            let parent = self.arena.menv(menv).parent;
            let handlers = self.arena.menv(menv).handlers;
            let mut env = self.arena.menv(menv).env;
            for &(name, _) in &bindings {
                env = Some(self.arena.bind(name, ValueId::UNINIT, env)?);
            }
            let rec = self.arena.alloc_menv(MEnvData {
                env,
                parent,
                handlers,
            })?;
            for &(name, rhs) in &bindings {
                let value = self.eval(rhs, rec)?;
                let node = self
                    .arena
                    .lookup(env, name)
                    .expect("letrec name was pre-bound");
                self.arena.env_set_value(node, value);
                values.push(value);
            }
            Some(rec)
        } else {
            for &(_, rhs) in &bindings {
                values.push(self.eval(rhs, menv)?);
            }
            None
        };

        let all_static = values.iter().all(|&v| !self.is_code(v));
        if all_static {
            // Plain lexical let. Handlers and parent are read after the
            // right-hand sides ran, so a set-meta! in a binding is visible
            // to the body.
            let body_menv = match rec_menv {
                Some(rec) => rec,
                None => {
                    let parent = self.arena.menv(menv).parent;
                    let handlers = self.arena.menv(menv).handlers;
                    let mut env = self.arena.menv(menv).env;
                    for (&(name, _), &value) in bindings.iter().zip(values.iter()) {
                        env = Some(self.arena.bind(name, value, env)?);
                    }
                    self.arena.alloc_menv(MEnvData {
                        env,
                        parent,
                        handlers,
                    })?
                }
            };
            return self.eval(body_ast, body_menv);
        }

        self.staged_let(&bindings, &values, body_ast, menv, is_letrec)
    }

    /// The analysis envelope and block assembly for a staged `let`.
    fn staged_let(
        &mut self,
        bindings: &[(Symbol, ValueId)],
        values: &[ValueId],
        body_ast: ValueId,
        menv: MEnvId,
        is_letrec: bool,
    ) -> Fallible<ValueId> {
        let tracked: Vec<Symbol> = bindings.iter().map(|&(name, _)| name).collect();

        // Usage and escape over the body; the block's value leaves the
        // scope, so tail variables join Global.
        let mut escape_ctx = analyze_escapes(&self.arena, &self.kw, body_ast, &tracked);

        // Shapes from the binding right-hand sides, then body effects.
        // letrec pre-joins: every bound name is Global (the recursive
        // references outlive any one activation) and Cyclic.
        let mut shape_ctx = ShapeContext::new();
        if is_letrec {
            for &(name, _) in bindings {
                escape_ctx.join_escape(name, crate::analysis::EscapeClass::Global);
                shape_ctx.record(name, Shape::Cyclic);
            }
        }
        for &(name, rhs) in bindings {
            let result = analyze_shape_result(&self.arena, &self.interner, &self.kw, rhs, &mut shape_ctx);
            shape_ctx.record(name, result.shape);
            match result.group {
                Some(group) => shape_ctx.groups.assign(name, group),
                None => {
                    let group = shape_ctx.groups.fresh();
                    shape_ctx.groups.assign(name, group);
                }
            }
        }
        analyze_shape(&self.arena, &self.interner, &self.kw, body_ast, &mut shape_ctx);

        // Alias/borrow facts for RC elision.
        if self.opts.rc_opt {
            for &(name, rhs) in bindings {
                match self.arena.get(rhs) {
                    ValueData::Sym(source) => {
                        let source = *source;
                        self.rc.define_alias(name, source);
                    }
                    _ => self.rc.define_fresh(name),
                }
            }
            self.rc_note_uses(body_ast);
        }

        // One plan per binding.
        let mut plans = Vec::with_capacity(bindings.len());
        for (&(name, _), &value) in bindings.iter().zip(values.iter()) {
            let c_name = c_ident(self.interner.resolve(name));
            let init = self.value_to_code(value);
            let usage = escape_ctx.var(name).cloned().unwrap_or_default();
            let shape = shape_ctx.shape_of(name);
            let unique = self.opts.rc_opt && self.rc.is_unique(name);
            let decision = choose_free(&usage, shape, unique);
            if matches!(decision, FreeDecision::Free(..)) {
                escape_ctx.mark_freed(name);
            }
            plans.push(BindingPlan {
                c_name,
                init,
                decision,
            });
        }

        // The body sees each binding as a bare identifier fragment.
        let parent = self.arena.menv(menv).parent;
        let handlers = self.arena.menv(menv).handlers;
        let mut env = self.arena.menv(menv).env;
        for (plan, &(name, _)) in plans.iter().zip(bindings.iter()) {
            let ident = CodeExpr::ident(&plan.c_name);
            let code = self.arena.alloc(ValueData::Code(ident))?;
            env = Some(self.arena.bind(name, code, env)?);
        }
        let body_menv = self.arena.alloc_menv(MEnvData {
            env,
            parent,
            handlers,
        })?;

        let body_value = self.eval(body_ast, body_menv)?;
        let body_code = self.value_to_code(body_value);

        let result_tmp = self.gensym("_r");
        let block = assemble_let_block(&plans, body_code, &result_tmp, self.opts.reuse);
        self.arena.alloc(ValueData::Code(block))
    }

    /// The symbol a syntactic position denotes: a bare symbol or a quoted
    /// one.
    fn syntactic_symbol(&self, id: ValueId) -> Option<Symbol> {
        match self.arena.get(id) {
            ValueData::Sym(s) => Some(*s),
            ValueData::Cell(head, rest) => {
                let head_sym = match self.arena.get(*head) {
                    ValueData::Sym(s) => *s,
                    _ => return None,
                };
                if head_sym != self.kw.quote {
                    return None;
                }
                let quoted = self.arena.car(*rest)?;
                match self.arena.get(quoted) {
                    ValueData::Sym(s) => Some(*s),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Record body uses in evaluation order for the RC clock.
    fn rc_note_uses(&mut self, expr: ValueId) {
        match self.arena.get(expr) {
            ValueData::Sym(name) => {
                let name = *name;
                self.rc.note_use(name);
            }
            ValueData::Cell(head, rest) => {
                let (head, rest) = (*head, *rest);
                if let ValueData::Sym(op) = self.arena.get(head) {
                    if *op == self.kw.quote {
                        return;
                    }
                }
                self.rc_note_uses(head);
                let mut cursor = rest;
                while let ValueData::Cell(item, next) = self.arena.get(cursor) {
                    let (item, next) = (*item, *next);
                    self.rc_note_uses(item);
                    cursor = next;
                }
            }
            _ => {}
        }
    }
}
