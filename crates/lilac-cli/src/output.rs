//! Colored diagnostic output.
//!
//! Uses `termcolor` for cross-platform colored stderr. Respects the
//! `NO_COLOR` environment variable and the `--color` flag.

use lilac_engine::{Diagnostic, Severity};
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from the CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: &str) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        "always" => ColorChoice::Always,
        "never" => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled stderr writer for diagnostics.
pub struct DiagPrinter {
    stderr: StandardStream,
}

impl DiagPrinter {
    /// Create a printer with the given color choice.
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stderr: StandardStream::stderr(choice),
        }
    }

    /// Print one diagnostic, colored by severity.
    pub fn print(&mut self, diag: &Diagnostic) {
        let (label, color) = match diag.severity {
            Severity::Warning => ("warning", Color::Yellow),
            Severity::Error => ("error", Color::Red),
        };
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(color)).set_bold(true);
        let _ = self.stderr.set_color(&spec);
        let _ = write!(self.stderr, "{}", label);
        let _ = self.stderr.reset();
        match diag.span {
            Some(span) => {
                let _ = writeln!(self.stderr, ": {} (line {})", diag.message, span.line);
            }
            None => {
                let _ = writeln!(self.stderr, ": {}", diag.message);
            }
        }
    }

    /// Print a batch of diagnostics.
    pub fn print_all(&mut self, diags: &[Diagnostic]) {
        for diag in diags {
            self.print(diag);
        }
    }
}
