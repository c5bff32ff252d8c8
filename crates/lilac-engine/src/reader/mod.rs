//! S-expression front end: lexer, tokens, and the iterative reader.

pub mod lexer;
pub mod read;
pub mod token;

pub use lexer::{parse_int_saturating, Lexer};
pub use read::{read_one, ReadError};
pub use token::{Span, Token};
