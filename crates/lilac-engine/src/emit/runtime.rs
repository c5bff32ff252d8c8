//! The fixed C runtime the emitted program links against.
//!
//! One-shot writer: includes, the `Obj` record, a free list, a stack pool
//! with an address-range membership test, constructors, shape-specialised
//! freers, reference counting, a weak-ref table with invalidation-on-free,
//! a Tarjan SCC builder that installs a shared component reference count,
//! a deferred-decrement batcher drained at safe points, reuse helpers, a
//! cycle arena, and scan functions for every registered type. The emitter
//! only ever calls these; it never inlines their bodies.
//!
//! The `Obj` layout is an external invariant and must not change:
//! `int mark; int scc_id; int is_pair; unsigned int scan_tag;` plus the
//! payload union. `mark` doubles as the reference count.

use crate::analysis::typegraph::{Strength, TypeRegistry};
use std::fmt::Write;

/// Default deferred-decrement batch drained per safe point.
pub const DEFAULT_BATCH_SIZE: u32 = 32;

const PRELUDE: &str = r#"/* Lilac runtime */
#include <stdlib.h>
#include <stdio.h>
#include <stdint.h>
#include <limits.h>

typedef struct Obj {
    int mark;               /* doubles as the reference count */
    int scc_id;
    int is_pair;
    unsigned int scan_tag;
    union {
        long i;
        struct { struct Obj *a, *b; };
    };
} Obj;

static Obj NIL_SINGLETON = { 1, -1, 0, 0u, { 0 } };

static Obj* mk_nil(void) { return &NIL_SINGLETON; }

/* free list: released cells chained through the a slot */
static Obj* free_list = NULL;
static long free_list_len = 0;

/* stack pool: short-lived cells carved from static storage */
#define STACK_POOL_SIZE 256
static Obj stack_pool[STACK_POOL_SIZE];
static int stack_pool_top = 0;

static int in_stack_pool(Obj* o) {
    uintptr_t p = (uintptr_t)o;
    uintptr_t lo = (uintptr_t)&stack_pool[0];
    uintptr_t hi = (uintptr_t)&stack_pool[STACK_POOL_SIZE];
    return p >= lo && p < hi;
}

/* cycle arena: cyclic structures live here and are reclaimed in bulk */
#define CYCLE_ARENA_SIZE 1024
static Obj cycle_arena[CYCLE_ARENA_SIZE];
static int cycle_arena_top = 0;

static int in_cycle_arena(Obj* o) {
    uintptr_t p = (uintptr_t)o;
    uintptr_t lo = (uintptr_t)&cycle_arena[0];
    uintptr_t hi = (uintptr_t)&cycle_arena[CYCLE_ARENA_SIZE];
    return p >= lo && p < hi;
}

static Obj* arena_obj(void) {
    if (cycle_arena_top < CYCLE_ARENA_SIZE) return &cycle_arena[cycle_arena_top++];
    return NULL;
}

static void arena_reset(void) { cycle_arena_top = 0; }

/* individually unfreeable storage */
static int is_static(Obj* o) { return o == &NIL_SINGLETON || in_stack_pool(o); }

/* weak references: slots invalidated when their target is freed */
#define WEAK_TABLE_SIZE 256
static struct { Obj** slot; Obj* target; } weak_table[WEAK_TABLE_SIZE];
static int weak_count = 0;

static void register_weak(Obj** slot) {
    if (weak_count < WEAK_TABLE_SIZE && slot) {
        weak_table[weak_count].slot = slot;
        weak_table[weak_count].target = *slot;
        weak_count++;
    }
}

static void invalidate_weak_refs(Obj* target) {
    int k;
    for (k = 0; k < weak_count; k++) {
        if (weak_table[k].slot && weak_table[k].target == target) {
            *weak_table[k].slot = NULL;
            weak_table[k].slot = NULL;
        }
    }
}

static void cleanup_all_weak_refs(void) {
    int k;
    for (k = 0; k < weak_count; k++) {
        if (weak_table[k].slot) *weak_table[k].slot = NULL;
        weak_table[k].slot = NULL;
    }
    weak_count = 0;
}

/* move a dead cell onto the free list */
static void release_obj(Obj* o) {
    if (!o || is_static(o) || in_cycle_arena(o)) return;
    invalidate_weak_refs(o);
    o->is_pair = 0;
    o->a = free_list;
    free_list = o;
    free_list_len++;
}

static void flush_freelist(void) {
    while (free_list) {
        Obj* next = free_list->a;
        free(free_list);
        free_list = next;
    }
    free_list_len = 0;
}

static Obj* obj_alloc(void) {
    if (free_list) {
        Obj* o = free_list;
        free_list = o->a;
        free_list_len--;
        return o;
    }
    {
        Obj* o = (Obj*)malloc(sizeof(Obj));
        if (!o) {
            fprintf(stderr, "lilac runtime: out of memory\n");
            exit(1);
        }
        return o;
    }
}

static Obj* mk_int(long n) {
    Obj* o = obj_alloc();
    o->mark = 1;
    o->scc_id = -1;
    o->is_pair = 0;
    o->scan_tag = 0u;
    o->i = n;
    return o;
}

static Obj* mk_pair(Obj* a, Obj* b) {
    Obj* o = obj_alloc();
    o->mark = 1;
    o->scc_id = -1;
    o->is_pair = 1;
    o->scan_tag = 0u;
    o->a = a;
    o->b = b;
    return o;
}

/* stack-pool variant of mk_int for provably stack-local cells */
static Obj* pool_int(long n) {
    if (stack_pool_top < STACK_POOL_SIZE) {
        Obj* o = &stack_pool[stack_pool_top++];
        o->mark = 1;
        o->scc_id = -1;
        o->is_pair = 0;
        o->scan_tag = 0u;
        o->i = n;
        return o;
    }
    return mk_int(n);
}

static void pool_reset(void) { stack_pool_top = 0; }

static void inc_ref(Obj* o) {
    if (o && !is_static(o)) o->mark++;
}

static void dec_ref(Obj* o) {
    Obj *a, *b;
    if (!o || is_static(o) || in_cycle_arena(o)) return;
    if (--o->mark > 0) return;
    a = o->is_pair ? o->a : NULL;
    b = o->is_pair ? o->b : NULL;
    release_obj(o);
    if (a) dec_ref(a);
    if (b) dec_ref(b);
}

/* structural free for cells the analyses proved unshared and acyclic */
static void free_tree(Obj* o) {
    Obj *a, *b;
    if (!o || is_static(o) || in_cycle_arena(o)) return;
    a = o->is_pair ? o->a : NULL;
    b = o->is_pair ? o->b : NULL;
    release_obj(o);
    if (a) free_tree(a);
    if (b) free_tree(b);
}

/* free for a unique owner: no RC check on the cell itself */
static void free_unique(Obj* o) {
    Obj *a, *b;
    if (!o || is_static(o) || in_cycle_arena(o)) return;
    a = o->is_pair ? o->a : NULL;
    b = o->is_pair ? o->b : NULL;
    release_obj(o);
    if (a) dec_ref(a);
    if (b) dec_ref(b);
}
"#;

const DEFERRED: &str = r#"
/* deferred decrements, drained in batches at safe points */
#define DEFERRED_CAP 1024
static Obj* deferred_queue[DEFERRED_CAP];
static int deferred_head = 0;
static int deferred_tail = 0;

static void deferred_release(Obj* o) {
    int next;
    if (!o || is_static(o)) return;
    next = (deferred_tail + 1) % DEFERRED_CAP;
    if (next == deferred_head) {
        dec_ref(o); /* queue full: pay now */
        return;
    }
    deferred_queue[deferred_tail] = o;
    deferred_tail = next;
}

static void safe_point(void) {
    int n = 0;
    while (deferred_head != deferred_tail && n < DEFERRED_BATCH_SIZE) {
        Obj* o = deferred_queue[deferred_head];
        deferred_head = (deferred_head + 1) % DEFERRED_CAP;
        dec_ref(o);
        n++;
    }
}

static void flush_all_deferred(void) {
    while (deferred_head != deferred_tail) {
        Obj* o = deferred_queue[deferred_head];
        deferred_head = (deferred_head + 1) % DEFERRED_CAP;
        dec_ref(o);
    }
    arena_reset();
}
"#;

const TARJAN: &str = r#"
/* Tarjan SCC builder: every member of a frozen immutable cycle shares one
   component reference count */
#define SCC_MAX 512
static Obj* scc_nodes[SCC_MAX];
static int scc_index[SCC_MAX];
static int scc_lowlink[SCC_MAX];
static int scc_onstack[SCC_MAX];
static int scc_node_count = 0;
static Obj* scc_stack[SCC_MAX];
static int scc_sp = 0;
static int scc_counter = 0;
static int scc_next_id = 0;
static int scc_ref_counts[SCC_MAX];

static int scc_slot(Obj* o) {
    int k;
    for (k = 0; k < scc_node_count; k++) {
        if (scc_nodes[k] == o) return k;
    }
    if (scc_node_count >= SCC_MAX) return -1;
    scc_nodes[scc_node_count] = o;
    scc_index[scc_node_count] = -1;
    scc_lowlink[scc_node_count] = -1;
    scc_onstack[scc_node_count] = 0;
    return scc_node_count++;
}

static int tarjan_visit(Obj* o) {
    int slot, child, low;
    slot = scc_slot(o);
    if (slot < 0) return -1;
    scc_index[slot] = scc_counter;
    scc_lowlink[slot] = scc_counter;
    scc_counter++;
    scc_stack[scc_sp++] = o;
    scc_onstack[slot] = 1;

    if (o->is_pair) {
        Obj* kids[2];
        int k;
        kids[0] = o->a;
        kids[1] = o->b;
        for (k = 0; k < 2; k++) {
            Obj* c = kids[k];
            if (!c || is_static(c)) continue;
            child = scc_slot(c);
            if (child < 0) continue;
            if (scc_index[child] < 0) {
                low = tarjan_visit(c);
                if (low >= 0 && low < scc_lowlink[slot]) scc_lowlink[slot] = low;
            } else if (scc_onstack[child] && scc_index[child] < scc_lowlink[slot]) {
                scc_lowlink[slot] = scc_index[child];
            }
        }
    }

    if (scc_lowlink[slot] == scc_index[slot]) {
        int id = scc_next_id++;
        Obj* member;
        scc_ref_counts[id] = 1;
        do {
            int ms;
            member = scc_stack[--scc_sp];
            ms = scc_slot(member);
            if (ms >= 0) scc_onstack[ms] = 0;
            member->scc_id = id;
        } while (member != o && scc_sp > 0);
    }
    return scc_lowlink[slot];
}

static void build_sccs(Obj* root) {
    if (!root || is_static(root)) return;
    scc_node_count = 0;
    scc_sp = 0;
    scc_counter = 0;
    if (scc_slot(root) >= 0 && scc_index[scc_slot(root)] < 0) tarjan_visit(root);
}

static void scc_release(int id) {
    int k;
    if (id < 0 || id >= scc_next_id) return;
    if (--scc_ref_counts[id] > 0) return;
    for (k = 0; k < scc_node_count; k++) {
        if (scc_nodes[k] && scc_nodes[k]->scc_id == id) {
            release_obj(scc_nodes[k]);
            scc_nodes[k] = NULL;
        }
    }
}
"#;

const REUSE: &str = r#"
/* in-place reuse of a just-freed slot of the same size */
static Obj* reuse_pair(Obj* v, Obj* a, Obj* b) {
    if (v && v->mark == 1 && !is_static(v) && !in_cycle_arena(v)) {
        invalidate_weak_refs(v);
        v->scc_id = -1;
        v->is_pair = 1;
        v->scan_tag = 0u;
        v->a = a;
        v->b = b;
        return v;
    }
    dec_ref(v);
    return mk_pair(a, b);
}

static Obj* reuse_int(Obj* v, long n) {
    if (v && v->mark == 1 && !is_static(v) && !in_cycle_arena(v)) {
        invalidate_weak_refs(v);
        v->scc_id = -1;
        v->is_pair = 0;
        v->scan_tag = 0u;
        v->i = n;
        return v;
    }
    dec_ref(v);
    return mk_int(n);
}
"#;

const OPS: &str = r##"
/* arithmetic agrees with compile-time folding: overflow yields 0 */
static Obj* add(Obj* x, Obj* y) {
    long r = 0;
    if (__builtin_add_overflow(x->i, y->i, &r)) r = 0;
    return mk_int(r);
}

static Obj* sub(Obj* x, Obj* y) {
    long r = 0;
    if (__builtin_sub_overflow(x->i, y->i, &r)) r = 0;
    return mk_int(r);
}

static Obj* mul(Obj* x, Obj* y) {
    long r = 0;
    if (__builtin_mul_overflow(x->i, y->i, &r)) r = 0;
    return mk_int(r);
}

static Obj* divi(Obj* x, Obj* y) {
    long r = 0;
    if (y->i != 0 && !(x->i == LONG_MIN && y->i == -1)) r = x->i / y->i;
    return mk_int(r);
}

static Obj* modi(Obj* x, Obj* y) {
    long r = 0;
    if (y->i != 0 && !(x->i == LONG_MIN && y->i == -1)) r = x->i % y->i;
    return mk_int(r);
}

static Obj* lt(Obj* x, Obj* y) { return mk_int(x->i < y->i); }
static Obj* gt(Obj* x, Obj* y) { return mk_int(x->i > y->i); }
static Obj* eqi(Obj* x, Obj* y) { return mk_int(x->i == y->i); }

static int truthy(Obj* o) {
    if (!o || o == &NIL_SINGLETON) return 0;
    if (o->is_pair) return 1;
    return o->i != 0;
}

static Obj* car_(Obj* p) { return p && p->is_pair ? p->a : mk_nil(); }
static Obj* cdr_(Obj* p) { return p && p->is_pair ? p->b : mk_nil(); }
static Obj* is_nil(Obj* p) { return mk_int(p == &NIL_SINGLETON); }
static Obj* is_pair(Obj* p) { return mk_int(p != NULL && p->is_pair); }
static Obj* not_(Obj* p) { return mk_int(!truthy(p)); }

static void print_rec(Obj* o) {
    if (!o) { printf("#<null>"); return; }
    if (o == &NIL_SINGLETON) { printf("()"); return; }
    if (!o->is_pair) { printf("%ld", o->i); return; }
    printf("(");
    print_rec(o->a);
    printf(" . ");
    print_rec(o->b);
    printf(")");
}

static Obj* print_obj(Obj* o) {
    print_rec(o);
    printf("\n");
    return o;
}

/* generic strong traversal used by the per-type scanners */
static Obj* scan_obj(Obj* o) {
    if (!o || o == &NIL_SINGLETON || o->scan_tag) return o;
    o->scan_tag = 1u;
    if (o->is_pair) {
        scan_obj(o->a);
        scan_obj(o->b);
    }
    return o;
}
"##;

/// Render the whole runtime header.
///
/// `batch_size` parameterises the deferred-decrement batcher; the scan
/// functions honor the registry's effective field strengths (weak fields
/// are not traversed).
pub fn runtime_header(registry: &TypeRegistry, batch_size: u32) -> String {
    let mut out = String::with_capacity(16 * 1024);
    out.push_str(PRELUDE);
    let _ = write!(out, "\n#define DEFERRED_BATCH_SIZE {}\n", batch_size);
    out.push_str(DEFERRED);
    out.push_str(TARJAN);
    out.push_str(REUSE);
    out.push_str(OPS);
    write_scanners(&mut out, registry);
    write_freers(&mut out, registry);
    out
}

/// Per-type scan functions: the first two pointer fields map onto the `a`
/// and `b` payload slots; weak fields are skipped with a comment.
fn write_scanners(out: &mut String, registry: &TypeRegistry) {
    for ty in registry.types() {
        let pointers: Vec<_> = ty.fields.iter().filter(|f| f.is_pointer).collect();
        let _ = writeln!(out, "\n/* scanner for {} */", ty.name);
        let _ = writeln!(out, "static Obj* scan_{}(Obj* o) {{", ty.name);
        out.push_str("    if (!o || o == &NIL_SINGLETON || o->scan_tag) return o;\n");
        out.push_str("    o->scan_tag = 1u;\n");
        for (slot, field) in pointers.iter().take(2).enumerate() {
            let slot_name = if slot == 0 { "a" } else { "b" };
            match field.effective {
                Strength::Strong => {
                    let _ = writeln!(
                        out,
                        "    if (o->is_pair && o->{}) scan_obj(o->{}); /* {} */",
                        slot_name, slot_name, field.name
                    );
                }
                Strength::Weak => {
                    let _ = writeln!(
                        out,
                        "    /* field '{}' is weak - not scanned */",
                        field.name
                    );
                }
                Strength::Untraced => {}
            }
        }
        for field in pointers.iter().skip(2) {
            if field.effective == Strength::Weak {
                let _ = writeln!(
                    out,
                    "    /* field '{}' is weak - not scanned */",
                    field.name
                );
            }
        }
        out.push_str("    return o;\n}\n");
    }
}

/// Per-type freers: strong fields are released (typed targets through
/// their own freer, untyped payload through `dec_ref`), weak fields are
/// left alone, then the cell itself goes to the free list. Prototypes come
/// first so mutually recursive types link.
fn write_freers(out: &mut String, registry: &TypeRegistry) {
    out.push_str("\n/* typed freers */\n");
    for ty in registry.types() {
        let _ = writeln!(out, "static void free_{}(Obj* o);", ty.name);
    }

    for ty in registry.types() {
        let pointers: Vec<_> = ty.fields.iter().filter(|f| f.is_pointer).collect();
        let _ = writeln!(out, "\nstatic void free_{}(Obj* o) {{", ty.name);
        out.push_str(
            "    if (!o || o == &NIL_SINGLETON || in_stack_pool(o) || in_cycle_arena(o)) return;\n",
        );
        for (slot, field) in pointers.iter().take(2).enumerate() {
            let slot_name = if slot == 0 { "a" } else { "b" };
            match field.effective {
                Strength::Strong => match field.target.as_deref() {
                    Some(target) if registry.by_name(target).is_some() => {
                        let _ = writeln!(
                            out,
                            "    if (o->is_pair && o->{}) free_{}(o->{}); /* {} */",
                            slot_name, target, slot_name, field.name
                        );
                    }
                    _ => {
                        let _ = writeln!(
                            out,
                            "    if (o->is_pair && o->{}) dec_ref(o->{}); /* {} */",
                            slot_name, slot_name, field.name
                        );
                    }
                },
                Strength::Weak => {
                    let _ = writeln!(out, "    /* field '{}' is weak - not freed */", field.name);
                }
                Strength::Untraced => {}
            }
        }
        for field in pointers.iter().skip(2) {
            if field.effective == Strength::Weak {
                let _ = writeln!(out, "    /* field '{}' is weak - not freed */", field.name);
            }
        }
        out.push_str("    release_obj(o);\n}\n");
    }
}
