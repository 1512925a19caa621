//! Error types for the completion engine.
//!
//! Error handling follows a few rules:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Submission-time failures are returned synchronously and never enqueue work
//! - Channel-layer failures end the affected op and surface through its
//!   [`Completion`](crate::aio::Completion), never through the submitter
//! - Worker-side failures (spawn errors, panicking jobs) are recovered locally
//!
//! # Error Kinds
//!
//! - **InvalidChannelState**: async op submitted against a listening channel
//! - **Io**: the channel endpoint reported a hard error
//! - **Config**: pool configuration rejected at build time
//! - **SpawnFailed**: a worker thread could not be created
//! - **Shutdown**: the engine no longer accepts work
//!
//! Cancellation is not an error: it is reported as
//! [`OpStatus::Cancelled`](crate::aio::OpStatus::Cancelled) on the op's
//! completion.

use core::fmt;
use std::sync::Arc;

use crate::runtime::config::BuildError;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Async operations are not accepted on this channel (listening socket).
    InvalidChannelState,
    /// The channel endpoint reported an I/O error.
    Io,
    /// Configuration was rejected.
    Config,
    /// A worker thread could not be spawned.
    SpawnFailed,
    /// The engine has been shut down.
    Shutdown,
}

/// The main error type for engine operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Submission against a channel that does not accept async operations.
    #[must_use]
    pub fn invalid_channel_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidChannelState).with_message(detail)
    }

    /// Submission after the engine stopped accepting work.
    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown).with_message("engine is shut down")
    }

    /// Returns the underlying I/O error kind when this wraps one.
    #[must_use]
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        self.source
            .as_ref()
            .and_then(|s| s.downcast_ref::<std::io::Error>())
            .map(std::io::Error::kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let message = e.to_string();
        Self::new(ErrorKind::Io).with_message(message).with_source(e)
    }
}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        let message = e.to_string();
        Self::new(ErrorKind::Config).with_message(message).with_source(e)
    }
}

/// A specialized Result type for engine operations.
pub type Result<T> = core::result::Result<T, Error>;
