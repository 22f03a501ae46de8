//! Error taxonomy for the bridge
//!
//! Value conversions never error; everything else surfaces through this
//! enum. Script exceptions raised inside queued invocations are caught at
//! the drain boundary and logged, so they only appear here when the caller
//! is on the script-owning thread and can actually observe them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("property not found: {0}")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("type mismatch: expected {0}")]
    TypeMismatch(&'static str),

    #[error("not enough arguments")]
    NotEnoughArgs,

    #[error("invocation failed: {0}")]
    Invocation(String),

    #[error("script engine is owned by another thread")]
    WrongThread,

    #[error("dispatch queue is closed")]
    QueueClosed,

    #[error("script exception: {0}")]
    Exception(String),

    #[error("engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, Error>;
