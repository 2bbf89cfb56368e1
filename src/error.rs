//! Typed error surface for the matrix engine.
//!
//! Every fallible boundary (bad magic, short read, failed file
//! extension, failed allocation) returns a typed error to the caller
//! instead of aborting the process — see [`EngineError::Poisoned`] for
//! how the engine protects itself once it has observed an I/O or
//! corruption failure post-open.

use std::fmt;

/// Everything that can go wrong talking to a matrix file.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A read, write, or file-extension syscall failed.
    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// A MetaBlock or RMap header failed magic/size validation.
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    /// A resize could not grow the backing file. Retryable: the RMap is
    /// left exactly as it was before the attempt.
    #[error("allocation failure: {0}")]
    AllocFailure(String),

    /// A caller-supplied id or argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested row has never been written.
    #[error("row {0} not found")]
    NotFound(u32),

    /// A prior fatal I/O or corruption error poisoned the engine; every
    /// subsequent operation fails fast instead of touching the file.
    #[error("engine is poisoned by a prior fatal io or corruption error")]
    Poisoned,
}

impl EngineError {
    /// Whether this error should poison the engine for future calls.
    /// Only unexpected I/O and on-disk corruption are fatal in this
    /// sense — bad arguments, missing rows, and resize-time allocation
    /// failures are ordinary, recoverable outcomes.
    pub(crate) fn poisons(&self) -> bool {
        matches!(self, EngineError::IoFailure(_) | EngineError::CorruptHeader(_))
    }
}

/// Helper for constructing a [`EngineError::CorruptHeader`] with a
/// formatted message, mirroring how other variants are built inline.
pub(crate) fn corrupt(msg: impl fmt::Display) -> EngineError {
    EngineError::CorruptHeader(msg.to_string())
}

pub type Result<T> = std::result::Result<T, EngineError>;
