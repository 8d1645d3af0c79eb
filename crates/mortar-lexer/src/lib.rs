//! Mortar Lexer
//!
//! Tokenizes template source into a stream of positioned tokens.
//! Recognizes template tags `{...}`, template comments `{* ... *}`,
//! and for HTML/XML content the surrounding markup: elements, attributes,
//! quoted values, comments and raw text bodies of `<script>`/`<style>`.
//!
//! # Example
//!
//! ```
//! use mortar_lexer::{ContentType, Scanner};
//!
//! let tokens = Scanner::tokenize("", ContentType::Html).unwrap();
//! assert_eq!(tokens.len(), 1); // Just End
//! ```

pub mod scanner;
pub mod stream;
pub mod token;

pub use scanner::Scanner;
pub use stream::TokenStream;
pub use token::{ContentType, Position, Token, TokenKind};

/// Lexer error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lexer error at line {line}, column {column}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}
