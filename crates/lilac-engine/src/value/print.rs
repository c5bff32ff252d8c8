//! S-expression printing.
//!
//! Reading a structure of ints, symbols, cells, Nil, and quotes and printing
//! it again yields a textually equivalent string modulo whitespace. The
//! non-readable variants print as `#<...>` handles; they only appear in
//! diagnostics.

use super::arena::{Arena, ValueId};
use super::interner::Interner;
use super::ValueData;
use std::fmt::Write;

/// Render a value back to source text.
pub fn value_to_string(arena: &Arena, interner: &Interner, id: ValueId) -> String {
    let mut out = String::new();
    write_value(arena, interner, id, &mut out);
    out
}

fn write_value(arena: &Arena, interner: &Interner, id: ValueId, out: &mut String) {
    match arena.get(id) {
        ValueData::Nil => out.push_str("()"),
        ValueData::Int(n) => {
            let _ = write!(out, "{}", n);
        }
        ValueData::Sym(s) => out.push_str(interner.resolve(*s)),
        ValueData::Cell(head, tail) => {
            // (quote x) prints with its reader sugar
            if let Some(quoted) = as_quote(arena, interner, *head, *tail) {
                out.push('\'');
                write_value(arena, interner, quoted, out);
                return;
            }
            out.push('(');
            let mut first = true;
            let mut cursor = id;
            loop {
                match arena.get(cursor) {
                    ValueData::Cell(h, t) => {
                        if !first {
                            out.push(' ');
                        }
                        first = false;
                        write_value(arena, interner, *h, out);
                        cursor = *t;
                    }
                    ValueData::Nil => break,
                    _ => {
                        out.push_str(" . ");
                        write_value(arena, interner, cursor, out);
                        break;
                    }
                }
            }
            out.push(')');
        }
        ValueData::Prim(p) => {
            let _ = write!(out, "#<prim:{}>", p.name());
        }
        ValueData::Lambda(l) => {
            let _ = write!(out, "#<lambda/{}>", l.params.len());
        }
        ValueData::Code(c) => {
            let _ = write!(out, "#<code:{}>", c.render());
        }
        ValueData::MEnv(_) => out.push_str("#<menv>"),
        ValueData::Uninit => out.push_str("#<uninit>"),
    }
}

fn as_quote(arena: &Arena, interner: &Interner, head: ValueId, tail: ValueId) -> Option<ValueId> {
    if let ValueData::Sym(s) = arena.get(head) {
        if interner.resolve(*s) == "quote" {
            if let ValueData::Cell(quoted, rest) = arena.get(tail) {
                if matches!(arena.get(*rest), ValueData::Nil) {
                    return Some(*quoted);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueData;

    #[test]
    fn test_print_atoms() {
        let mut arena = Arena::new();
        let interner = Interner::new();

        let n = arena.int(-42).unwrap();
        assert_eq!(value_to_string(&arena, &interner, n), "-42");
        assert_eq!(value_to_string(&arena, &interner, ValueId::NIL), "()");
    }

    #[test]
    fn test_print_list() {
        let mut arena = Arena::new();
        let mut interner = Interner::new();

        let plus = interner.intern("+");
        let head = arena.sym(plus).unwrap();
        let a = arena.int(1).unwrap();
        let b = arena.int(2).unwrap();
        let list = arena.vec_to_list(&[head, a, b]).unwrap();

        assert_eq!(value_to_string(&arena, &interner, list), "(+ 1 2)");
    }

    #[test]
    fn test_print_dotted_pair() {
        let mut arena = Arena::new();
        let interner = Interner::new();

        let a = arena.int(1).unwrap();
        let b = arena.int(2).unwrap();
        let pair = arena.cell(a, b).unwrap();

        assert_eq!(value_to_string(&arena, &interner, pair), "(1 . 2)");
    }

    #[test]
    fn test_print_quote_sugar() {
        let mut arena = Arena::new();
        let mut interner = Interner::new();

        let quote = interner.intern("quote");
        let x = interner.intern("x");
        let qs = arena.sym(quote).unwrap();
        let xs = arena.sym(x).unwrap();
        let form = arena.vec_to_list(&[qs, xs]).unwrap();

        assert_eq!(value_to_string(&arena, &interner, form), "'x");
    }

    #[test]
    fn test_print_opaque_handles() {
        let mut arena = Arena::new();
        let interner = Interner::new();

        let prim = arena.alloc(ValueData::Prim(crate::value::Prim::Add)).unwrap();
        assert_eq!(value_to_string(&arena, &interner, prim), "#<prim:+>");
        assert_eq!(
            value_to_string(&arena, &interner, ValueId::UNINIT),
            "#<uninit>"
        );
    }
}
