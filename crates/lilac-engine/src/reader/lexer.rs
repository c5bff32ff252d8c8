//! Lexer for the S-expression grammar.
//!
//! Built on logos and converted to the reader's own [`Token`] enum with
//! absolute spans. The grammar has no invalid characters (anything that is
//! not whitespace, a paren, or a quote is a symbol), so lexing never fails.
//! Integers are parsed with saturating out-of-range handling.

use super::token::{Span, Token};
use crate::value::Interner;
use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum LogosToken {
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("'")]
    Quote,

    // Maximal munch makes "123abc" a symbol, not an int followed by a symbol
    #[regex(r"-?[0-9]+", priority = 3)]
    Int,

    #[regex(r#"[^ \t\r\n()']+"#)]
    Sym,
}

/// Parse an optionally signed decimal literal with saturating out-of-range
/// handling: a value outside the `i64` range folds to 0 instead of
/// aborting, matching compile-time constant folding.
pub fn parse_int_saturating(text: &str) -> i64 {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut acc: i64 = 0;
    for b in digits.bytes() {
        let digit = (b - b'0') as i64;
        let step = acc.checked_mul(10).and_then(|v| {
            if negative {
                v.checked_sub(digit)
            } else {
                v.checked_add(digit)
            }
        });
        match step {
            Some(v) => acc = v,
            None => return 0,
        }
    }
    acc
}

/// The S-expression lexer.
pub struct Lexer<'src> {
    source: &'src str,
}

impl<'src> Lexer<'src> {
    /// Create a lexer over `source`.
    pub fn new(source: &'src str) -> Self {
        Self { source }
    }

    /// Tokenize the whole input, interning symbol names.
    ///
    /// The returned stream always ends with [`Token::Eof`].
    pub fn tokenize(self, interner: &mut Interner) -> Vec<(Token, Span)> {
        let mut tokens = Vec::new();
        let mut lexer = LogosToken::lexer(self.source);

        // Line/column tracking: token spans come back in ascending order,
        // so one forward scan suffices.
        let mut scanned_to = 0usize;
        let mut line = 1u32;
        let mut column = 1u32;

        while let Some(result) = lexer.next() {
            let range = lexer.span();
            for c in self.source[scanned_to..range.start].chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
            scanned_to = range.start;

            let span = Span::new(range.start, range.end, line, column);
            let text = lexer.slice();

            // The error branch is unreachable for this grammar: every
            // non-structural character run lexes as a symbol.
            let Ok(logos_token) = result else { continue };
            let token = match logos_token {
                LogosToken::LParen => Token::LParen,
                LogosToken::RParen => Token::RParen,
                LogosToken::Quote => Token::Quote,
                LogosToken::Int => Token::Int(parse_int_saturating(text)),
                LogosToken::Sym => Token::Sym(interner.intern(text)),
            };
            tokens.push((token, span));
        }

        for c in self.source[scanned_to..].chars() {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        let end = self.source.len();
        tokens.push((Token::Eof, Span::new(end, end, line, column)));
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> (Vec<Token>, Interner) {
        let mut interner = Interner::new();
        let tokens = Lexer::new(source)
            .tokenize(&mut interner)
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        (tokens, interner)
    }

    #[test]
    fn test_lex_simple_form() {
        let (tokens, mut interner) = lex("(+ 1 -2)");
        let plus = interner.intern("+");
        assert_eq!(
            tokens,
            vec![
                Token::LParen,
                Token::Sym(plus),
                Token::Int(1),
                Token::Int(-2),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_quote() {
        let (tokens, mut interner) = lex("'x");
        let x = interner.intern("x");
        assert_eq!(tokens, vec![Token::Quote, Token::Sym(x), Token::Eof]);
    }

    #[test]
    fn test_symbols_are_maximal_runs() {
        let (tokens, mut interner) = lex("set-meta! null? 123abc");
        let a = interner.intern("set-meta!");
        let b = interner.intern("null?");
        let c = interner.intern("123abc");
        assert_eq!(
            tokens,
            vec![Token::Sym(a), Token::Sym(b), Token::Sym(c), Token::Eof]
        );
    }

    #[test]
    fn test_int_out_of_range_folds_to_zero() {
        // LONG_MAX + 1 folds to 0 without aborting
        assert_eq!(parse_int_saturating("9223372036854775808"), 0);
        assert_eq!(parse_int_saturating("-9223372036854775809"), 0);
        // The bounds themselves are representable
        assert_eq!(parse_int_saturating("9223372036854775807"), i64::MAX);
        assert_eq!(parse_int_saturating("-9223372036854775808"), i64::MIN);
        assert_eq!(parse_int_saturating("42"), 42);
    }

    #[test]
    fn test_spans_track_lines() {
        let mut interner = Interner::new();
        let tokens = Lexer::new("(\n  x)").tokenize(&mut interner);
        // x is on line 2
        let (token, span) = tokens[1];
        assert!(matches!(token, Token::Sym(_)));
        assert_eq!(span.line, 2);
        assert_eq!(span.column, 3);
    }
}
