//! Lilac command-line driver.
//!
//! Single binary: reads one S-expression from the argument or stdin,
//! lowers it, and writes the full emitted C source to stdout. Exit code 0
//! on success; non-zero on arena exhaustion or an unrecoverable error.

mod commands;
mod output;

use clap::{Args, Parser, Subcommand};
use lilac_engine::{CompileOptions, DEFAULT_BATCH_SIZE};

#[derive(Parser)]
#[command(name = "lilac")]
#[command(about = "Lilac staged Lisp-to-C compiler")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Expression to compile (reads stdin when omitted)
    expr: Option<String>,

    #[command(flatten)]
    opts: PassOpts,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone)]
pub(crate) struct PassOpts {
    /// Disable the liveness/free-point pass
    #[arg(long)]
    no_liveness: bool,

    /// Disable reuse pairing of frees with allocations
    #[arg(long)]
    no_reuse: bool,

    /// Disable RC-operation elision
    #[arg(long)]
    no_rc_opt: bool,

    /// Deferred-decrement batch drained per safe point
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u32,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub(crate) color: String,
}

impl PassOpts {
    pub(crate) fn to_compile_options(&self) -> CompileOptions {
        CompileOptions {
            liveness: !self.no_liveness,
            reuse: !self.no_reuse,
            rc_opt: !self.no_rc_opt,
            batch_size: self.batch_size,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one expression to C on stdout
    #[command(alias = "b")]
    Build {
        /// Expression to compile (reads stdin when omitted)
        expr: Option<String>,
        #[command(flatten)]
        opts: PassOpts,
    },

    /// Run the reader and analyses without emitting C
    #[command(alias = "c")]
    Check {
        /// Expression to check (reads stdin when omitted)
        expr: Option<String>,
        /// Report format (pretty, json)
        #[arg(long, default_value = "pretty")]
        format: String,
        #[command(flatten)]
        opts: PassOpts,
    },

    /// Print only the runtime header
    Header {
        /// Deferred-decrement batch drained per safe point
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Build { expr, opts }) => commands::build::execute(expr, &opts),
        Some(Commands::Check { expr, format, opts }) => {
            commands::check::execute(expr, &format, &opts)
        }
        Some(Commands::Header { batch_size }) => commands::header::execute(batch_size),
        None => commands::build::execute(cli.expr, &cli.opts),
    }
}
