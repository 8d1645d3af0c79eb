//! Mortar Parser
//!
//! Turns template tokens into an AST. The driver in `parser` handles text,
//! HTML structure and tag nesting; the semantics of every tag live in a
//! handler registered in a `TagRegistry`. Tag arguments go through the
//! expression lexer, the token rewrite passes (syntax sugar, sandbox) and the
//! expression parser.
//!
//! # Example
//!
//! ```
//! use mortar_parser::{parse, Node, ParserOptions};
//!
//! let template = parse("{if $a}yes{/if}", &ParserOptions::default()).unwrap();
//! assert!(matches!(template.root.children[0], Node::If(_)));
//! ```

pub mod ast;
pub mod error;
pub mod expr_lexer;
pub mod expr_parser;
pub mod parser;
pub mod passes;
pub mod policy;
pub mod registry;
pub mod tag;
pub mod tags;

pub use ast::{Expr, Fragment, Node, Template};
pub use error::{suggest, CompileError};
pub use expr_parser::ExprParser;
pub use parser::{parse, ParserOptions, TemplateParser};
pub use policy::{Policy, StaticPolicy};
pub use registry::TagRegistry;
pub use tag::{AttrPrefix, Placement, Section, Tag, TagHandler, TagStep};
