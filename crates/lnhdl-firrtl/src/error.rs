//! Error types for the FIRRTL front-end

use thiserror::Error;

use lnhdl_library::LibraryError;

/// Result type for lowering operations
pub type Result<T> = std::result::Result<T, LoweringError>;

/// Fatal conditions while lowering a circuit
#[derive(Debug, Error)]
pub enum LoweringError {
    /// Port or wire declared with a type the front-end cannot classify
    #[error("unknown port type")]
    UnknownPortType,

    #[error("unsupported type: {0}")]
    UnsupportedType(&'static str),

    #[error("unsupported primitive op: {0}")]
    UnsupportedOp(String),

    #[error("unsupported statement: {0}")]
    UnsupportedStatement(&'static str),

    #[error("malformed primitive op {op}: expected {expected}")]
    PrimOpArity { op: String, expected: &'static str },

    #[error("more than one top module specified")]
    MultipleTop,

    #[error("module contains neither a user nor an external definition")]
    ModuleNotSet,

    #[error("port {0} specified with unknown direction")]
    UnknownDirection(String),

    #[error("memory '{0}' referenced before its declaration was seen")]
    UnknownMemory(String),

    #[error("expression cannot be flattened into an access path")]
    NotAnAccessPath,

    #[error("module registry error: {0}")]
    Library(#[from] LibraryError),
}
