//! End-to-end emission scenarios: one source expression in, substring
//! assertions on the emitted C out.

use lilac_engine::{CompileOptions, Compiler};

fn compile(source: &str) -> String {
    let mut compiler = Compiler::new().unwrap();
    compiler.compile(source).unwrap().c_source
}

fn compile_with(source: &str, opts: CompileOptions) -> String {
    let mut compiler = Compiler::with_options(opts).unwrap();
    compiler.compile(source).unwrap().c_source
}

/// The emitted `main`, without the runtime header (whose own bodies would
/// otherwise collide with substring assertions).
fn main_body(c: &str) -> &str {
    &c[c.find("int main(void)").expect("emitted main")..]
}

// ============================================================================
// Core scenarios
// ============================================================================

#[test]
fn test_staged_addition_emits_runtime_call() {
    let c = compile("(+ (lift 10) (lift 5))");
    assert!(c.contains("add(mk_int(10), mk_int(5))"));
}

#[test]
fn test_staged_let_declares_computes_and_frees() {
    let c = compile("(let ((x (lift 10))) (+ x (lift 5)))");
    assert!(c.contains("Obj* x = mk_int(10);"));
    assert!(c.contains("add(x, mk_int(5))"));
    assert!(c.contains("free_tree(x);"));
    // The free runs after the body value is captured.
    let body = c.find("add(x, mk_int(5))").unwrap();
    let free = c.find("free_tree(x);").unwrap();
    assert!(body < free);
}

#[test]
fn test_escaping_binding_is_not_freed() {
    let c = compile("(let ((p (cons (lift 1) (lift 2)))) p)");
    assert!(c.contains("mk_pair(mk_int(1), mk_int(2))"));
    assert!(c.contains("/* p escapes to return - no free */"));
    assert!(!c.contains("free_tree(p)"));
    assert!(!c.contains("dec_ref(p)"));
    assert!(!c.contains("deferred_release(p)"));
}

#[test]
fn test_lambda_emits_no_fragment() {
    let c = compile("(lambda (x) x)");
    assert!(c.contains("/* compile-time value: #<lambda/1> */"));
    assert!(!c.contains("Obj* _result ="));
}

#[test]
fn test_backpointer_type_prints_auto_weak_before_header() {
    let c = compile("5");
    let auto_weak = c.find("AUTO-WEAK: DLLNode.prev").expect("AUTO-WEAK line");
    let header = c.find("#include <stdlib.h>").expect("runtime header");
    assert!(auto_weak < header);
}

#[test]
fn test_deftype_self_reference_is_demoted() {
    let c = compile("(deftype Widget (name int) (next Widget))");
    assert!(c.contains("AUTO-WEAK: Widget.next"));
    assert!(c.contains("static Obj* scan_Widget(Obj* o)"));
}

#[test]
fn test_staged_if_releases_complex_condition() {
    let c = compile("(if (lift 1) (lift 2) (lift 3))");
    assert!(c.contains("Obj* _c = mk_int(1);"));
    assert!(c.contains("(_c && _c->i) ? mk_int(2) : mk_int(3)"));
    assert!(c.contains("dec_ref(_c);"));
}

#[test]
fn test_staged_if_keeps_identifier_condition() {
    let c = compile("(let ((x (lift 1))) (if x (lift 2) (lift 3)))");
    // The condition is the bare identifier x: it is managed by its owning
    // scope, not the if template.
    assert!(c.contains("Obj* _c = x;"));
    assert!(!c.contains("dec_ref(_c);"));
}

// ============================================================================
// Boundary scenarios
// ============================================================================

#[test]
fn test_zero_binding_let_is_transparent() {
    let c = compile("(let () (lift 7))");
    assert!(c.contains("Obj* _result = mk_int(7);"));
    // No spurious block, declarations, or frees.
    assert!(!main_body(&c).contains("_r0"));
    assert!(!main_body(&c).contains("free_tree"));
}

#[test]
fn test_long_max_plus_one_folds_to_zero() {
    let c = compile("9223372036854775808");
    assert!(c.contains("Obj* _result = mk_int(0);"));
}

#[test]
fn test_overflowing_fold_agrees_with_runtime() {
    let mut compiler = Compiler::new().unwrap();
    let out = compiler.compile("(+ 9223372036854775807 1)").unwrap();
    assert!(out.c_source.contains("Obj* _result = mk_int(0);"));
    assert!(compiler
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("overflows")));
}

#[test]
fn test_main_wraps_body_with_exit_flushes() {
    let c = compile("(lift 1)");
    let main = c.find("int main(void)").unwrap();
    let flush_fl = c.find("flush_freelist();").unwrap();
    let flush_def = c.find("flush_all_deferred();").unwrap();
    let cleanup = c.find("cleanup_all_weak_refs();").unwrap();
    let ret = c.rfind("return 0;").unwrap();
    assert!(main < flush_fl && flush_fl < flush_def && flush_def < cleanup && cleanup < ret);
}

// ============================================================================
// Deallocation strategy selection
// ============================================================================

#[test]
fn test_unused_binding_pairs_with_later_allocation() {
    let c = compile("(let ((x (lift 1))) (lift 2))");
    // The immediate free of the unused binding is paired with the body's
    // allocation and rewritten into an in-place reuse.
    assert!(c.contains("reuse_int(x, 2)"));
    assert!(!c.contains("free_tree(x);"));
}

#[test]
fn test_unused_binding_freed_immediately_without_reuse() {
    let opts = CompileOptions {
        reuse: false,
        ..Default::default()
    };
    let c = compile_with("(let ((x (lift 1))) (lift 2))", opts);
    let decl = c.find("Obj* x = mk_int(1);").unwrap();
    let free = c.find("free_tree(x);").unwrap();
    let body = c.find("Obj* _r0 = mk_int(2);").unwrap();
    assert!(decl < free && free < body);
}

#[test]
fn test_cyclic_binding_uses_deferred_release() {
    let src = "(let ((x (cons (lift 1) (lift 2)))) (let ((q (set! x x))) (+ (lift 1) (lift 2))))";
    let opts = CompileOptions {
        reuse: false,
        ..Default::default()
    };
    let c = compile_with(src, opts);
    assert!(c.contains("deferred_release(q);"));
    // A scope that queued deferred decrements drains a batch on exit.
    assert!(main_body(&c).contains("safe_point();"));
}

#[test]
fn test_unique_dag_binding_uses_free_unique() {
    // p is a fresh pair whose children alias each other: shape Dag, but the
    // RC table proves p itself is the sole owner.
    let src = "(let ((x (lift 1))) (let ((p (cons x x))) (+ p (lift 9))))";
    let mut compiler = Compiler::new().unwrap();
    let c = compiler.compile(src).unwrap().c_source;
    let body = main_body(&c);
    assert!(body.contains("Obj* p = mk_pair(x, x);"));
    assert!(body.contains("free_unique(p);"));
    assert!(!body.contains("dec_ref(p);"));
}

#[test]
fn test_captured_binding_is_owned_by_closure() {
    let c = compile("(let ((x (lift 5))) (lambda (y) (+ x y)))");
    assert!(c.contains("/* x captured by lambda - no free */"));
    assert!(!c.contains("free_tree(x)"));
    assert!(!c.contains("dec_ref(x)"));
}

#[test]
fn test_exit_frees_run_in_reverse_declaration_order() {
    let opts = CompileOptions {
        reuse: false,
        ..Default::default()
    };
    let c = compile_with("(let ((a (lift 1)) (b (lift 2))) (+ a b))", opts);
    let body = main_body(&c);
    let free_b = body.find("free_tree(b);").unwrap();
    let free_a = body.find("free_tree(a);").unwrap();
    assert!(free_b < free_a);
}

#[test]
fn test_scan_form_emits_typed_scanner_call() {
    let c = compile("(scan Tree (lift 3))");
    assert!(c.contains("scan_Tree(mk_int(3))"));
}

#[test]
fn test_letrec_static_closure_stages_body() {
    let c = compile("(letrec ((f (lambda (n) n))) (f (lift 3)))");
    assert!(c.contains("Obj* _result = mk_int(3);"));
}

#[test]
fn test_batch_size_flows_into_header() {
    let opts = CompileOptions {
        batch_size: 128,
        ..Default::default()
    };
    let c = compile_with("(lift 1)", opts);
    assert!(c.contains("#define DEFERRED_BATCH_SIZE 128"));
}
