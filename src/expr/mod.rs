//! Formula tokenizing, compiling to postfix, and evaluation.
//!
//! A formula such as `bg * (1 + sig)` is built from registered term names, numbers, the
//! binary operators `+ - * /`, and parentheses. Term names take no explicit arguments: each
//! is evaluated against the shared abscissa and its own parameter slice.

mod program;
mod token;

pub use program::{compile, Layout, Program, MAX_STACK};
pub use token::{tokenize, BinOp, Token, TokenKind, Tokens};
pub(crate) use token::is_identifier;
