//! # runefmt - Opinionated Formatter for Julia-Style Source
//!
//! runefmt reformats source code by rewriting a lossless concrete syntax
//! tree in place. The output is lexically identical to the input up to
//! whitespace and a small, enumerated set of literal normalizations: the
//! formatter never re-lays-out code, it only applies local rewrite rules
//! (the *runestones*) until none of them has anything left to say.
//!
//! ## How it works
//!
//! The source is parsed into a tree in which every byte — whitespace and
//! comments included — belongs to exactly one leaf. The engine copies the
//! source into an output buffer and walks the tree while the buffer cursor
//! mirrors the traversal; each rule either accepts a node or splices
//! replacement bytes into the buffer and hands back a new subtree. Because
//! every rule is idempotent, the walk reaches a fixed point, and so does the
//! formatter as a whole: formatting formatted code is a no-op.
//!
//! ## Usage
//!
//! ### As a Library
//!
//! ```rust
//! let formatted = runefmt::format_string("for i = 1:3\nend\n").unwrap();
//! assert_eq!(formatted, "for i in 1:3\nend\n");
//!
//! let spaced = runefmt::format_string("a+b\n").unwrap();
//! assert_eq!(spaced, "a + b\n");
//! ```
//!
//! ### As a CLI Tool
//!
//! The library is also available as a command-line tool. See the `main`
//! module for CLI usage details.
//!
//! ## Modules
//!
//! - [`parser`] - Lossless lexing and parsing
//! - [`cst`] - The concrete syntax tree and its operations
//! - [`buffer`] - The output byte buffer and splice primitive
//! - [`formatter`] - The fixed-point rewriting engine and public API
//! - [`rules`] - The rewrite rules, in pipeline order
//!
//! ## Limitations
//!
//! - The parser covers a practical subset of the surface syntax; anything
//!   outside it is rejected rather than guessed at
//! - No line re-breaking: multiline expressions keep their layout
//! - String interpolation is preserved verbatim, not inspected

/// Lossless lexer and parser
pub mod parser;

/// Concrete syntax tree and classification predicates
pub mod cst;

/// Output byte buffer with the splice primitive
pub mod buffer;

/// Fixed-point rewriting engine and public API
pub mod formatter;

/// The rewrite rules (runestones), in pipeline order
pub mod rules;

/// Library error surface
pub mod error;

pub use error::{EngineError, Error, ParseError};
pub use formatter::{format_string, format_tree, Context, Flags, Outcome};

#[cfg(test)]
mod debug;
