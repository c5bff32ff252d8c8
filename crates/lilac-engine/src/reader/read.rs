//! The S-expression reader.
//!
//! An explicit-stack (non-recursive) parser, so reader depth is bounded by
//! input length rather than the call stack. Parse errors degrade: the
//! offending structure becomes `Nil` or is closed early, a diagnostic is
//! recorded, and the caller still gets a value to compile.

use super::lexer::Lexer;
use super::token::{Span, Token};
use crate::diag::{DiagKind, DiagSink};
use crate::error::Fallible;
use crate::value::{Arena, Interner, Symbol, ValueId};
use thiserror::Error;

/// Problems the reader can report. These never cross the API boundary as
/// `Err`; they become [`DiagKind::Parse`] diagnostics.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// No expression in the input
    #[error("empty input")]
    EmptyInput,
    /// A `)` with no open list
    #[error("unexpected ')'")]
    UnexpectedClose,
    /// End of input inside an open list
    #[error("unterminated list")]
    UnterminatedList,
    /// A `'` with nothing to quote
    #[error("dangling quote")]
    DanglingQuote,
}

enum Frame {
    List { items: Vec<ValueId>, open: Span },
    Quote { span: Span },
}

struct ReaderState {
    stack: Vec<Frame>,
    done: Option<ValueId>,
}

impl ReaderState {
    /// Feed one finished value upward: wrap pending quotes, then either
    /// append to the enclosing list or finish the top-level expression.
    fn complete(&mut self, mut value: ValueId, arena: &mut Arena, quote: Symbol) -> Fallible<()> {
        loop {
            match self.stack.last_mut() {
                Some(Frame::Quote { .. }) => {
                    self.stack.pop();
                    let q = arena.sym(quote)?;
                    let tail = arena.cell(value, ValueId::NIL)?;
                    value = arena.cell(q, tail)?;
                }
                Some(Frame::List { items, .. }) => {
                    items.push(value);
                    return Ok(());
                }
                None => {
                    self.done = Some(value);
                    return Ok(());
                }
            }
        }
    }
}

/// Read one top-level S-expression.
///
/// Always yields a value; parse problems are recorded in `diags` and the
/// damaged region degrades (to `Nil`, or to the list as read so far).
pub fn read_one(
    source: &str,
    arena: &mut Arena,
    interner: &mut Interner,
    diags: &mut DiagSink,
) -> Fallible<ValueId> {
    let tokens = Lexer::new(source).tokenize(interner);
    let quote = interner.intern("quote");

    let mut state = ReaderState {
        stack: Vec::new(),
        done: None,
    };

    let mut tokens_iter = tokens.iter().copied();
    let mut last_span = Span::new(0, 0, 1, 1);
    for (token, span) in tokens_iter.by_ref() {
        last_span = span;
        match token {
            Token::LParen => state.stack.push(Frame::List {
                items: Vec::new(),
                open: span,
            }),
            Token::RParen => {
                if matches!(state.stack.last(), Some(Frame::List { .. })) {
                    let Some(Frame::List { items, .. }) = state.stack.pop() else {
                        unreachable!()
                    };
                    let list = arena.vec_to_list(&items)?;
                    state.complete(list, arena, quote)?;
                } else {
                    diags.error(DiagKind::Parse, ReadError::UnexpectedClose.to_string(), Some(span));
                }
            }
            Token::Quote => state.stack.push(Frame::Quote { span }),
            Token::Int(n) => {
                let v = arena.int(n)?;
                state.complete(v, arena, quote)?;
            }
            Token::Sym(s) => {
                let v = arena.sym(s)?;
                state.complete(v, arena, quote)?;
            }
            Token::Eof => break,
        }
        if state.done.is_some() {
            break;
        }
    }

    // End of input with open structure: close it early and degrade.
    if state.done.is_none() && !state.stack.is_empty() {
        let (error, span) = match state.stack.last() {
            Some(Frame::Quote { span }) => (ReadError::DanglingQuote, *span),
            Some(Frame::List { open, .. }) => (ReadError::UnterminatedList, *open),
            None => unreachable!(),
        };
        diags.error(DiagKind::Parse, error.to_string(), Some(span));

        while state.done.is_none() {
            match state.stack.last() {
                Some(Frame::Quote { .. }) => {
                    // complete() consumes the quote wrapper itself
                    state.complete(ValueId::NIL, arena, quote)?;
                }
                Some(Frame::List { .. }) => {
                    let Some(Frame::List { items, .. }) = state.stack.pop() else {
                        unreachable!()
                    };
                    let list = arena.vec_to_list(&items)?;
                    state.complete(list, arena, quote)?;
                }
                None => state.done = Some(ValueId::NIL),
            }
        }
    }

    match state.done {
        Some(value) => {
            // One expression per compile; anything after it is ignored.
            if let Some((token, span)) = tokens_iter.next() {
                if token != Token::Eof {
                    diags.warning(
                        DiagKind::Parse,
                        "trailing input after first expression ignored",
                        Some(span),
                    );
                }
            }
            Ok(value)
        }
        None => {
            diags.error(DiagKind::Parse, ReadError::EmptyInput.to_string(), Some(last_span));
            Ok(ValueId::NIL)
        }
    }
}
