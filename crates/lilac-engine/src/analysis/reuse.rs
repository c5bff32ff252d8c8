//! Reuse pairing over emitted statement sequences.
//!
//! Scans a block's statements in program order for a free of `v` followed
//! by an allocation of the same size with no intervening use of `v`. The
//! pair is rewritten into an in-place reuse: the free disappears and the
//! allocation becomes `reuse_pair(v, ...)` / `reuse_int(v, ...)`, runtime
//! helpers that reconstruct in `v`'s slot when `v && v->rc == 1` and fall
//! back to `dec_ref(v)` plus a fresh allocation otherwise.
//!
//! Every managed object is one `Obj` cell, so the same-size condition holds
//! between any two allocation sites; it is still checked structurally so a
//! differently-sized constructor added later pairs correctly.

use crate::emit::code::{CodeExpr, CodeStmt};

/// Freers whose object can be reused in place.
const REUSABLE_FREERS: &[&str] = &["free_tree", "dec_ref", "free_unique"];

/// Object size (in `Obj` cells) of an allocation expression.
fn alloc_size(expr: &CodeExpr) -> Option<usize> {
    match expr {
        CodeExpr::Call { func, .. } if func == "mk_int" || func == "mk_pair" => Some(1),
        _ => None,
    }
}

/// Freed variable of a statement, if it is a reusable free.
fn freed_var(stmt: &CodeStmt) -> Option<&str> {
    if let CodeStmt::Expr(CodeExpr::Call { func, args }) = stmt {
        if REUSABLE_FREERS.contains(&func.as_str()) && args.len() == 1 {
            if let CodeExpr::Ident(name) = &args[0] {
                return Some(name);
            }
        }
    }
    None
}

/// True if `expr` mentions the identifier anywhere.
fn uses_ident(expr: &CodeExpr, name: &str) -> bool {
    match expr {
        CodeExpr::Ident(id) => id == name,
        CodeExpr::IntLit(_) => false,
        CodeExpr::Call { args, .. } => args.iter().any(|a| uses_ident(a, name)),
        CodeExpr::Binary { lhs, rhs, .. } => uses_ident(lhs, name) || uses_ident(rhs, name),
        CodeExpr::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            uses_ident(cond, name) || uses_ident(then_branch, name) || uses_ident(else_branch, name)
        }
        CodeExpr::Assign { target, value } => target == name || uses_ident(value, name),
        CodeExpr::Field { base, .. } => uses_ident(base, name),
        CodeExpr::Raw(text) => text.contains(name),
        CodeExpr::StmtExpr(block) => {
            block.stmts.iter().any(|s| stmt_uses_ident(s, name))
                || uses_ident(&block.result, name)
        }
    }
}

fn stmt_uses_ident(stmt: &CodeStmt, name: &str) -> bool {
    match stmt {
        CodeStmt::Decl { init, .. } => uses_ident(init, name),
        CodeStmt::Expr(expr) => uses_ident(expr, name),
        CodeStmt::Comment(_) => false,
    }
}

fn reuse_helper(func: &str) -> &'static str {
    match func {
        "mk_pair" => "reuse_pair",
        _ => "reuse_int",
    }
}

/// Pair frees with later same-size allocations and rewrite the statements
/// in place. Returns the number of pairs made.
pub fn pair_reuses(stmts: &mut Vec<CodeStmt>) -> usize {
    let mut paired_frees: Vec<usize> = Vec::new();
    let mut claimed_allocs: Vec<usize> = Vec::new();
    // (free index, alloc index)
    let mut pairs: Vec<(usize, usize)> = Vec::new();

    for i in 0..stmts.len() {
        let Some(var) = freed_var(&stmts[i]).map(str::to_string) else {
            continue;
        };
        if paired_frees.contains(&i) {
            continue;
        }

        for j in (i + 1)..stmts.len() {
            // An intervening use of the freed variable kills the pairing.
            if stmt_uses_ident(&stmts[j], &var) {
                break;
            }
            if claimed_allocs.contains(&j) {
                continue;
            }
            if let CodeStmt::Decl { init, .. } = &stmts[j] {
                if alloc_size(init).is_some() {
                    paired_frees.push(i);
                    claimed_allocs.push(j);
                    pairs.push((i, j));
                    break;
                }
            }
        }
    }

    // Rewrite the allocations, then drop the frees (in reverse so indices
    // stay valid).
    for &(free_idx, alloc_idx) in &pairs {
        let var = freed_var(&stmts[free_idx])
            .expect("pair recorded from a free statement")
            .to_string();
        if let CodeStmt::Decl { init, .. } = &mut stmts[alloc_idx] {
            if let CodeExpr::Call { func, args } = init {
                let helper = reuse_helper(func);
                let mut reuse_args = vec![CodeExpr::Ident(var)];
                reuse_args.append(args);
                *init = CodeExpr::call(helper, reuse_args);
            }
        }
    }
    let mut to_remove: Vec<usize> = pairs.iter().map(|&(f, _)| f).collect();
    to_remove.sort_unstable();
    for idx in to_remove.into_iter().rev() {
        stmts.remove(idx);
    }

    pairs.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_stmt(func: &str, var: &str) -> CodeStmt {
        CodeStmt::Expr(CodeExpr::call(func, vec![CodeExpr::ident(var)]))
    }

    fn decl(name: &str, init: CodeExpr) -> CodeStmt {
        CodeStmt::Decl {
            name: name.to_string(),
            init,
        }
    }

    #[test]
    fn test_free_then_alloc_pairs() {
        let mut stmts = vec![
            free_stmt("free_tree", "x"),
            decl("p", CodeExpr::call("mk_pair", vec![CodeExpr::mk_int(1), CodeExpr::mk_int(2)])),
        ];
        assert_eq!(pair_reuses(&mut stmts), 1);
        assert_eq!(stmts.len(), 1);
        let rendered = match &stmts[0] {
            CodeStmt::Decl { init, .. } => init.render(),
            _ => panic!("expected a declaration"),
        };
        assert_eq!(rendered, "reuse_pair(x, mk_int(1), mk_int(2))");
    }

    #[test]
    fn test_intervening_use_blocks_pairing() {
        let mut stmts = vec![
            free_stmt("dec_ref", "x"),
            CodeStmt::Expr(CodeExpr::call("print_obj", vec![CodeExpr::ident("x")])),
            decl("p", CodeExpr::mk_int(3)),
        ];
        assert_eq!(pair_reuses(&mut stmts), 0);
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_deferred_release_never_pairs() {
        let mut stmts = vec![
            free_stmt("deferred_release", "x"),
            decl("p", CodeExpr::mk_int(3)),
        ];
        assert_eq!(pair_reuses(&mut stmts), 0);
    }

    #[test]
    fn test_int_reuse_helper() {
        let mut stmts = vec![free_stmt("free_unique", "x"), decl("n", CodeExpr::mk_int(9))];
        assert_eq!(pair_reuses(&mut stmts), 1);
        let rendered = match &stmts[0] {
            CodeStmt::Decl { init, .. } => init.render(),
            _ => panic!("expected a declaration"),
        };
        assert_eq!(rendered, "reuse_int(x, 9)");
    }

    #[test]
    fn test_each_alloc_claimed_once() {
        let mut stmts = vec![
            free_stmt("free_tree", "x"),
            free_stmt("free_tree", "y"),
            decl("p", CodeExpr::mk_int(1)),
        ];
        // Only one free can claim the single allocation.
        assert_eq!(pair_reuses(&mut stmts), 1);
        assert_eq!(stmts.len(), 2);
    }
}
