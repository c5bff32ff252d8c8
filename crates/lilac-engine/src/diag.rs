//! Diagnostic collection for the compiler.
//!
//! The engine never prints; it records diagnostics into a [`DiagSink`] and
//! the driver decides how to render them (pretty text or JSON). Recoverable
//! errors (unbound symbol, arity mismatch, parse error) degrade the offending
//! sub-expression to `Nil` and compilation continues.

use crate::reader::Span;
use serde::Serialize;
use std::fmt;

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Degraded behaviour, compile continues unchanged
    Warning,
    /// The offending sub-expression lowered to `Nil`
    Error,
}

/// The kind of problem a diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagKind {
    /// Malformed S-expression, unterminated list, bad integer
    Parse,
    /// Symbol not bound in any enclosing environment
    UnboundSymbol,
    /// A `letrec` binding read before its initializer ran
    Uninitialized,
    /// Non-callable in head position or wrong operand kind
    NotCallable,
    /// Wrong number of arguments to a primitive or lambda
    Arity,
    /// Compile-time integer overflow (folded to 0)
    Overflow,
    /// Type-graph DFS path stack exceeded its depth cap
    DepthCap,
    /// Liveness fixed point failed to stabilize within its bound
    IterationCap,
    /// A field was demoted Strong -> Weak by back-edge detection
    AutoWeak,
    /// Reference to a type the registry does not know
    UnknownType,
}

/// A single reported problem.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Warning or error
    pub severity: Severity,
    /// Machine-readable category
    pub kind: DiagKind,
    /// Human-readable message
    pub message: String,
    /// Source location, when one is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match self.span {
            Some(span) => write!(f, "{}: {} (line {})", sev, self.message, span.line),
            None => write!(f, "{}: {}", sev, self.message),
        }
    }
}

/// Accumulates diagnostics for one compilation unit.
#[derive(Debug, Default)]
pub struct DiagSink {
    diags: Vec<Diagnostic>,
    errors: usize,
}

impl DiagSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error diagnostic.
    pub fn error(&mut self, kind: DiagKind, message: impl Into<String>, span: Option<Span>) {
        self.errors += 1;
        self.diags.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message: message.into(),
            span,
        });
    }

    /// Record a warning diagnostic.
    pub fn warning(&mut self, kind: DiagKind, message: impl Into<String>, span: Option<Span>) {
        self.diags.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            span,
        });
    }

    /// All diagnostics in report order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    /// Number of error-severity diagnostics.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// True if any error-severity diagnostic was recorded.
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    /// Render every diagnostic as one JSON array.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.diags).unwrap_or_else(|_| "[]".to_string())
    }

    /// Drain the sink, leaving it empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        self.errors = 0;
        std::mem::take(&mut self.diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counting() {
        let mut sink = DiagSink::new();
        assert!(!sink.has_errors());

        sink.warning(DiagKind::AutoWeak, "AUTO-WEAK: DLLNode.prev", None);
        assert!(!sink.has_errors());

        sink.error(DiagKind::UnboundSymbol, "unbound symbol 'x'", None);
        assert!(sink.has_errors());
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics().len(), 2);
    }

    #[test]
    fn test_json_rendering() {
        let mut sink = DiagSink::new();
        sink.error(DiagKind::Parse, "unterminated list", None);

        let json = sink.to_json();
        assert!(json.contains("\"parse\""));
        assert!(json.contains("unterminated list"));
    }

    #[test]
    fn test_take_resets() {
        let mut sink = DiagSink::new();
        sink.error(DiagKind::Arity, "expected 2 arguments, got 3", None);

        let taken = sink.take();
        assert_eq!(taken.len(), 1);
        assert!(sink.is_empty());
        assert!(!sink.has_errors());
    }
}
