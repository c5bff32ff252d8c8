//! `lilac build` (and the bare invocation): lower one expression to C.

use super::read_source;
use crate::output::{resolve_color_choice, DiagPrinter};
use crate::PassOpts;
use anyhow::Context;
use lilac_engine::Compiler;

pub fn execute(expr: Option<String>, opts: &PassOpts) -> anyhow::Result<()> {
    let source = read_source(expr)?;

    let mut compiler = Compiler::with_options(opts.to_compile_options())
        .context("failed to initialize the compiler")?;
    let output = compiler
        .compile(&source)
        .context("compilation aborted")?;

    // Recoverable problems degraded to Nil; the C file is still produced.
    let mut printer = DiagPrinter::new(resolve_color_choice(&opts.color));
    printer.print_all(compiler.diagnostics());

    print!("{}", output.c_source);
    Ok(())
}
