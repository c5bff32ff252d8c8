//! CLI subcommand implementations.

pub mod build;
pub mod check;
pub mod header;

use anyhow::Context;
use std::io::Read;

/// The source expression: the positional argument, or stdin read to EOF
/// with a growing buffer.
pub fn read_source(expr: Option<String>) -> anyhow::Result<String> {
    match expr {
        Some(text) => Ok(text),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read expression from stdin")?;
            Ok(buffer)
        }
    }
}
