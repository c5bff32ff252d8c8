//! Primitive application.
//!
//! Primitives are stage-polymorphic like everything else: with first-class
//! operands they compute (constant folding with saturate-to-zero overflow);
//! with any `Code` operand they emit a call to the matching runtime
//! function. `print` always stages; the compiler's own stdout belongs to
//! the emitted C program.

use crate::compiler::Compiler;
use crate::diag::DiagKind;
use crate::emit::code::CodeExpr;
use crate::error::Fallible;
use crate::value::{fold_int, Prim, ValueData, ValueId};

impl Compiler {
    /// Apply a primitive to evaluated operands.
    pub(crate) fn apply_prim(&mut self, prim: Prim, args: &[ValueId]) -> Fallible<ValueId> {
        if args.len() != prim.arity() {
            self.diags.error(
                DiagKind::Arity,
                format!(
                    "{} expects {} argument(s), got {}",
                    prim.name(),
                    prim.arity(),
                    args.len()
                ),
                None,
            );
            return Ok(ValueId::NIL);
        }

        let staged = prim == Prim::Print || args.iter().any(|&a| self.is_code(a));
        if staged {
            let mut codes = Vec::with_capacity(args.len());
            for &arg in args {
                codes.push(self.value_to_code(arg));
            }
            let call = CodeExpr::call(prim.c_name(), codes);
            return self.arena.alloc(ValueData::Code(call));
        }

        match prim {
            Prim::Add | Prim::Sub | Prim::Mul | Prim::Div | Prim::Mod => {
                let Some((a, b)) = self.int_operands(prim, args) else {
                    return Ok(ValueId::NIL);
                };
                let folded = match fold_int(prim, a, b) {
                    Some(v) => v,
                    None => {
                        self.diags.warning(
                            DiagKind::Overflow,
                            format!("({} {} {}) overflows; folded to 0", prim.name(), a, b),
                            None,
                        );
                        0
                    }
                };
                self.arena.int(folded)
            }
            Prim::Lt | Prim::Gt | Prim::NumEq => {
                let Some((a, b)) = self.int_operands(prim, args) else {
                    return Ok(ValueId::NIL);
                };
                let result = match prim {
                    Prim::Lt => a < b,
                    Prim::Gt => a > b,
                    _ => a == b,
                };
                self.arena.int(result as i64)
            }
            Prim::Cons => self.arena.cell(args[0], args[1]),
            Prim::Car | Prim::Cdr => match self.arena.get(args[0]) {
                ValueData::Cell(head, tail) => {
                    Ok(if prim == Prim::Car { *head } else { *tail })
                }
                _ => {
                    self.diags.error(
                        DiagKind::NotCallable,
                        format!("{} of a non-pair", prim.name()),
                        None,
                    );
                    Ok(ValueId::NIL)
                }
            },
            Prim::IsNull => {
                let is_nil = matches!(self.arena.get(args[0]), ValueData::Nil);
                self.arena.int(is_nil as i64)
            }
            Prim::IsPair => {
                let is_pair = matches!(self.arena.get(args[0]), ValueData::Cell(..));
                self.arena.int(is_pair as i64)
            }
            Prim::Not => {
                let truthy = self.arena.get(args[0]).is_truthy();
                self.arena.int(!truthy as i64)
            }
            Prim::Print => unreachable!("print always stages"),
        }
    }

    /// Two integer operands, or a kind-mismatch diagnostic.
    fn int_operands(&mut self, prim: Prim, args: &[ValueId]) -> Option<(i64, i64)> {
        let a = match self.arena.get(args[0]) {
            ValueData::Int(n) => Some(*n),
            _ => None,
        };
        let b = match self.arena.get(args[1]) {
            ValueData::Int(n) => Some(*n),
            _ => None,
        };
        match (a, b) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => {
                self.diags.error(
                    DiagKind::NotCallable,
                    format!("{} expects integer operands", prim.name()),
                    None,
                );
                None
            }
        }
    }
}
