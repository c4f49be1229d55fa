//! Error surface of the formatter library.
//!
//! Parse errors are user errors: the input does not lex or parse. Engine
//! errors are not — every one of them means a rule or driver broke its
//! contract, and the partially formatted buffer is discarded.

use thiserror::Error;

use crate::cst::Kind;
pub use crate::parser::ParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Fatal engine failures. None of these are recoverable; all signal a bug in
/// the engine or a rule rather than bad input.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("formatter invariant violated: {0}; this is a bug in runefmt, please file an issue")]
    Assertion(String),

    #[error("rewrite rules failed to converge after {limit} iterations (infinite loop?)")]
    Convergence { limit: usize },

    #[error("root node modified more than once")]
    RootRewrite,

    #[error("root node cannot be deleted")]
    RootDeleted,

    #[error("node deletion is not supported by the children driver")]
    DeletedKid,

    #[error("unhandled syntax kind {kind:?} (formatted so far: {partial:?})")]
    UnhandledKind { kind: Kind, partial: String },
}
