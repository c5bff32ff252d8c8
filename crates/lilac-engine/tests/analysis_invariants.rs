//! Cross-pass invariants: lattice algebra, monotonicity, idempotence, and
//! the frees-equals-bindings accounting of emitted scopes.

use lilac_engine::analysis::typegraph::{FieldDef, TypeRegistry};
use lilac_engine::{
    analyze_escapes, analyze_shape, AnalysisContext, Arena, CompileOptions, Compiler, DiagSink,
    EscapeClass, Interner, Keywords, Shape, ShapeContext, Symbol,
};

fn read(source: &str) -> (Arena, Interner, Keywords, lilac_engine::ValueId) {
    let mut arena = Arena::new();
    let mut interner = Interner::new();
    let mut diags = DiagSink::new();
    let kw = Keywords::intern_all(&mut interner);
    let expr = lilac_engine::read_one(source, &mut arena, &mut interner, &mut diags).unwrap();
    (arena, interner, kw, expr)
}

// ============================================================================
// Lattice algebra
// ============================================================================

#[test]
fn test_escape_join_is_monotone() {
    let classes = [EscapeClass::None, EscapeClass::Arg, EscapeClass::Global];
    for &a in &classes {
        for &b in &classes {
            let joined = a.join(b);
            assert!(joined >= a);
            assert!(joined >= b);
            // Commutative and idempotent.
            assert_eq!(joined, b.join(a));
            assert_eq!(a.join(a), a);
        }
    }
}

#[test]
fn test_shape_join_algebra() {
    let shapes = [Shape::Tree, Shape::Dag, Shape::Cyclic];
    assert_eq!(Shape::Tree.join(Shape::Dag), Shape::Dag);
    assert_eq!(Shape::Dag.join(Shape::Cyclic), Shape::Cyclic);
    for &a in &shapes {
        assert_eq!(a.join(a), a);
        for &b in &shapes {
            assert_eq!(a.join(b), b.join(a));
            for &c in &shapes {
                assert_eq!(a.join(b).join(c), a.join(b.join(c)));
            }
        }
    }
}

// ============================================================================
// Pass idempotence
// ============================================================================

#[test]
fn test_escape_pass_is_idempotent() {
    let (arena, mut interner, kw, expr) =
        read("(let ((y (+ x 1))) (lambda (z) (+ x (set! w 2))))");
    let tracked: Vec<Symbol> = ["x", "w"].iter().map(|s| interner.intern(s)).collect();

    let first: AnalysisContext = analyze_escapes(&arena, &kw, expr, &tracked);
    let second: AnalysisContext = analyze_escapes(&arena, &kw, expr, &tracked);
    assert_eq!(first, second);
}

#[test]
fn test_shape_pass_is_idempotent() {
    let (arena, mut interner, kw, expr) = read("(let ((x (cons 1 2))) (cons x x))");

    let mut ctx1 = ShapeContext::new();
    let shape1 = analyze_shape(&arena, &interner, &kw, expr, &mut ctx1);
    let mut ctx2 = ShapeContext::new();
    let shape2 = analyze_shape(&arena, &interner, &kw, expr, &mut ctx2);

    assert_eq!(shape1, shape2);
    let x = interner.intern("x");
    assert_eq!(ctx1.shape_of(x), ctx2.shape_of(x));
}

#[test]
fn test_back_edge_detection_is_idempotent_across_runs() {
    let mut registry = TypeRegistry::with_builtins();
    registry.declare(
        "Graph",
        vec![
            FieldDef::pointer("edges", "Graph"),
            FieldDef::untyped_pointer("payload"),
        ],
    );
    registry.detect_back_edges();
    let first = registry.demoted_fields();
    registry.detect_back_edges();
    assert_eq!(first, registry.demoted_fields());
    assert!(first.contains(&"Graph.edges".to_string()));
}

// ============================================================================
// Emitted-scope accounting
// ============================================================================

/// frees(scheduled at exit) == bindings − (captured ∪ escapes-Global ∪
/// unused); unused bindings are freed immediately instead.
#[test]
fn test_scope_frees_match_binding_accounting() {
    let opts = CompileOptions {
        reuse: false,
        ..Default::default()
    };
    let mut compiler = Compiler::with_options(opts).unwrap();
    // a, c used locally; b unused; all three are declarations.
    let c_src = compiler
        .compile("(let ((a (lift 1)) (b (lift 2)) (c (lift 3))) (+ a (+ c c)))")
        .unwrap()
        .c_source;
    let body = &c_src[c_src.find("int main(void)").unwrap()..];

    // Three declarations, three frees in total.
    assert!(body.contains("Obj* a = mk_int(1);"));
    assert!(body.contains("Obj* b = mk_int(2);"));
    assert!(body.contains("Obj* c = mk_int(3);"));
    assert_eq!(body.matches("free_tree(").count(), 3);

    // The unused binding is released immediately (before the body result),
    // the used ones at block exit (after it).
    let result_decl = body.find("Obj* _r0 =").unwrap();
    assert!(body.find("free_tree(b);").unwrap() < result_decl);
    assert!(body.find("free_tree(a);").unwrap() > result_decl);
    assert!(body.find("free_tree(c);").unwrap() > result_decl);
}

#[test]
fn test_escaping_and_captured_bindings_are_never_freed() {
    let opts = CompileOptions {
        reuse: false,
        ..Default::default()
    };
    let mut compiler = Compiler::with_options(opts).unwrap();
    // k is captured by the condition lambda; p is the block's value on
    // both branches.
    let c_src = compiler
        .compile("(let ((k (lift 9)) (p (cons (lift 1) (lift 2)))) (if (lambda (z) k) p p))")
        .unwrap()
        .c_source;
    let body = &c_src[c_src.find("int main(void)").unwrap()..];

    assert!(!body.contains("free_tree(p)"));
    assert!(!body.contains("free_tree(k)"));
    assert!(body.contains("/* k captured by lambda - no free */"));
    assert!(body.contains("/* p escapes to return - no free */"));
}

// ============================================================================
// Escape classes end to end
// ============================================================================

#[test]
fn test_escape_classes_over_a_mixed_expression() {
    let (arena, mut interner, kw, expr) = read("(f x (lambda (a) y) (set! z 1))");
    let tracked: Vec<Symbol> = ["x", "y", "z"].iter().map(|s| interner.intern(s)).collect();
    let ctx = analyze_escapes(&arena, &kw, expr, &tracked);

    assert_eq!(ctx.var(tracked[0]).unwrap().escape, EscapeClass::Arg);
    assert_eq!(ctx.var(tracked[1]).unwrap().escape, EscapeClass::Global);
    assert!(ctx.var(tracked[1]).unwrap().captured);
    assert_eq!(ctx.var(tracked[2]).unwrap().escape, EscapeClass::Global);
}
