//! `lilac header`: print only the runtime header.

use anyhow::Context;
use lilac_engine::{CompileOptions, Compiler};

pub fn execute(batch_size: u32) -> anyhow::Result<()> {
    let opts = CompileOptions {
        batch_size,
        ..Default::default()
    };
    let compiler =
        Compiler::with_options(opts).context("failed to initialize the compiler")?;
    print!("{}", compiler.header());
    Ok(())
}
