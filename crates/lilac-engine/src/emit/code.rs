//! Typed C-expression fragments.
//!
//! Staged evaluation composes [`CodeExpr`] trees instead of splicing
//! strings; the tree is pretty-printed exactly once, when the driver
//! assembles the output file. Statement-expression blocks (`({ ... })`) are
//! the GCC extension the deallocation templates are built on.

use std::fmt::Write;

/// A piece of not-yet-executed C.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeExpr {
    /// Bare identifier
    Ident(String),
    /// Integer literal
    IntLit(i64),
    /// Runtime call `func(args...)`
    Call {
        /// Callee name
        func: String,
        /// Argument fragments
        args: Vec<CodeExpr>,
    },
    /// Parenthesised infix expression
    Binary {
        /// C operator text
        op: &'static str,
        lhs: Box<CodeExpr>,
        rhs: Box<CodeExpr>,
    },
    /// `cond ? then : else`
    Ternary {
        cond: Box<CodeExpr>,
        then_branch: Box<CodeExpr>,
        else_branch: Box<CodeExpr>,
    },
    /// `(target = value)`
    Assign {
        /// Assigned identifier
        target: String,
        value: Box<CodeExpr>,
    },
    /// `base->field`
    Field {
        base: Box<CodeExpr>,
        field: &'static str,
    },
    /// Verbatim C text
    Raw(String),
    /// GCC statement expression `({ ... })`
    StmtExpr(CodeBlock),
}

/// A statement inside a statement-expression block.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeStmt {
    /// `Obj* name = init;`
    Decl {
        /// Declared identifier
        name: String,
        init: CodeExpr,
    },
    /// `expr;`
    Expr(CodeExpr),
    /// `/* text */`
    Comment(String),
}

/// Statements plus the block's result expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub stmts: Vec<CodeStmt>,
    /// Final expression; its value is the value of the whole block
    pub result: Box<CodeExpr>,
}

impl CodeExpr {
    /// Identifier fragment.
    pub fn ident(name: impl Into<String>) -> Self {
        CodeExpr::Ident(name.into())
    }

    /// Call fragment.
    pub fn call(func: impl Into<String>, args: Vec<CodeExpr>) -> Self {
        CodeExpr::Call {
            func: func.into(),
            args,
        }
    }

    /// `mk_int(n)`, the lift of a static integer.
    pub fn mk_int(n: i64) -> Self {
        CodeExpr::call("mk_int", vec![CodeExpr::IntLit(n)])
    }

    /// Infix fragment.
    pub fn binary(op: &'static str, lhs: CodeExpr, rhs: CodeExpr) -> Self {
        CodeExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Ternary fragment.
    pub fn ternary(cond: CodeExpr, then_branch: CodeExpr, else_branch: CodeExpr) -> Self {
        CodeExpr::Ternary {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    /// Assignment fragment.
    pub fn assign(target: impl Into<String>, value: CodeExpr) -> Self {
        CodeExpr::Assign {
            target: target.into(),
            value: Box::new(value),
        }
    }

    /// `base->field` fragment.
    pub fn field(base: CodeExpr, field: &'static str) -> Self {
        CodeExpr::Field {
            base: Box::new(base),
            field,
        }
    }

    /// A single variable reference is already managed by its owning scope;
    /// anything else is "complex" and the `if` template must release it.
    pub fn is_ident(&self) -> bool {
        matches!(self, CodeExpr::Ident(_))
    }

    /// Pretty-print the fragment.
    pub fn render(&self) -> String {
        self.render_at(0)
    }

    /// Pretty-print at a given indent level (for splicing into an already
    /// indented context such as the emitted `main`).
    pub fn render_at(&self, indent: usize) -> String {
        let mut out = String::new();
        self.write(&mut out, indent);
        out
    }

    fn write(&self, out: &mut String, indent: usize) {
        match self {
            CodeExpr::Ident(name) => out.push_str(name),
            CodeExpr::IntLit(n) => {
                let _ = write!(out, "{}", n);
            }
            CodeExpr::Call { func, args } => {
                out.push_str(func);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.write(out, indent);
                }
                out.push(')');
            }
            CodeExpr::Binary { op, lhs, rhs } => {
                out.push('(');
                lhs.write(out, indent);
                let _ = write!(out, " {} ", op);
                rhs.write(out, indent);
                out.push(')');
            }
            CodeExpr::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.write(out, indent);
                out.push_str(" ? ");
                then_branch.write(out, indent);
                out.push_str(" : ");
                else_branch.write(out, indent);
            }
            CodeExpr::Assign { target, value } => {
                out.push('(');
                out.push_str(target);
                out.push_str(" = ");
                value.write(out, indent);
                out.push(')');
            }
            CodeExpr::Field { base, field } => {
                base.write(out, indent);
                out.push_str("->");
                out.push_str(field);
            }
            CodeExpr::Raw(text) => out.push_str(text),
            CodeExpr::StmtExpr(block) => block.write(out, indent),
        }
    }
}

impl CodeBlock {
    /// Build a block.
    pub fn new(stmts: Vec<CodeStmt>, result: CodeExpr) -> Self {
        Self {
            stmts,
            result: Box::new(result),
        }
    }

    fn write(&self, out: &mut String, indent: usize) {
        let pad = "    ".repeat(indent + 1);
        out.push_str("({\n");
        for stmt in &self.stmts {
            out.push_str(&pad);
            stmt.write(out, indent + 1);
            out.push('\n');
        }
        out.push_str(&pad);
        self.result.write(out, indent + 1);
        out.push_str(";\n");
        out.push_str(&"    ".repeat(indent));
        out.push_str("})");
    }
}

impl CodeStmt {
    fn write(&self, out: &mut String, indent: usize) {
        match self {
            CodeStmt::Decl { name, init } => {
                let _ = write!(out, "Obj* {} = ", name);
                init.write(out, indent);
                out.push(';');
            }
            CodeStmt::Expr(expr) => {
                expr.write(out, indent);
                out.push(';');
            }
            CodeStmt::Comment(text) => {
                let _ = write!(out, "/* {} */", text);
            }
        }
    }
}
