//! `lilac check`: reader and analyses only, no C output.

use super::read_source;
use crate::output::{resolve_color_choice, DiagPrinter};
use crate::PassOpts;
use anyhow::Context;
use lilac_engine::Compiler;

pub fn execute(expr: Option<String>, format: &str, opts: &PassOpts) -> anyhow::Result<()> {
    let source = read_source(expr)?;

    let mut compiler = Compiler::with_options(opts.to_compile_options())
        .context("failed to initialize the compiler")?;
    let report = compiler.check(&source).context("check aborted")?;

    let mut printer = DiagPrinter::new(resolve_color_choice(&opts.color));
    printer.print_all(compiler.diagnostics());

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            println!(
                "free points: {} ({} conditional)",
                report.free_points, report.conditional_free_points
            );
            for field in &report.demoted_fields {
                println!("auto-weak: {}", field);
            }
            let stats = compiler.stats();
            println!(
                "arena: {} values, {} bindings, {} tower levels, {} symbols, {} types",
                stats.values, stats.env_nodes, stats.menvs, stats.interned, stats.types
            );
        }
    }

    if compiler.has_errors() {
        anyhow::bail!("check found errors");
    }
    Ok(())
}
