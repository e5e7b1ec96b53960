//! Error types for hook registration and registry merging.
//!
//! `SetupError` is the only error kind the registration surface raises.
//! Failures inside hook bodies or the real operation are a separate class:
//! they travel out of an intercepted call as [`anyhow::Error`], unmodified.

/// Errors raised while registering hooks or merging registries.
///
/// These are configuration mistakes, caught synchronously at registration
/// time. They are fatal to the registration call and are never retried by
/// the engine.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The receiver (or, for instance-scoped registries, its instance
    /// surface) does not expose the named operation.
    #[error("receiver does not respond to '{operation}'")]
    UnknownOperation { operation: String },

    /// A string did not name one of the recognized hook kinds.
    #[error("'{kind}' is not a valid callback type (expected before, after, or around)")]
    InvalidKind { kind: String },

    /// A string did not name a recognized ordering value.
    #[error("invalid ordering value '{value}' (expected append or prepend)")]
    InvalidPlacement { value: String },
}
