//! Error taxonomy for the binding layer.
//!
//! Two families with very different propagation rules:
//!
//! - **Configuration errors** (`MissingTransport`, `InvalidPath`,
//!   `UnknownProcedure`, `KindMismatch`) are returned as `Err` from the
//!   façade constructor and the binding factories. They are the only errors
//!   a caller ever has to handle with `?`.
//! - **Remote failures** (`Remote`, `Subscription`) are never raised to the
//!   caller. They are captured into the binding's reactive error slot so UI
//!   consumers can observe them.
//!
//! The error type is `Clone + PartialEq` because it lives inside signals.

use thiserror::Error;

use crate::procedures::MethodKind;

/// Errors produced by the binding layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// No transport was supplied to the client configuration.
    /// The single fatal construction-time condition.
    #[error("no transport configured")]
    MissingTransport,

    /// A procedure path was empty or contained empty segments.
    #[error("invalid procedure path `{0}`")]
    InvalidPath(String),

    /// A procedure path is not present in the procedure registry.
    #[error("unknown procedure `{0}`")]
    UnknownProcedure(String),

    /// A procedure exists but was requested through the wrong factory
    /// (e.g. a mutation bound with `query()`).
    #[error("procedure `{path}` is registered as {registered:?}, requested as {requested:?}")]
    KindMismatch {
        path: String,
        registered: MethodKind,
        requested: MethodKind,
    },

    /// The remote call rejected. Captured into the binding's error slot,
    /// never re-thrown out of `execute()`.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// The transport reported a subscription stream error. Captured via
    /// `on_error`; does not change the subscribed flag by itself.
    #[error("subscription error: {0}")]
    Subscription(String),
}
