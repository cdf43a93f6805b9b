//! Procedure registry - validated paths over a statically known procedure set.
//!
//! Remote procedures are addressed by dot-delimited paths (`"greeting.hello"`).
//! Instead of walking a dynamic object tree and faulting at call time on a
//! typo, the client is configured with an explicit registry of every
//! procedure it may bind. Binding factories resolve paths against this
//! registry up front, so an unknown path or a kind mismatch is a
//! configuration error at the call site, never a runtime fault mid-request.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

// =============================================================================
// Method Kind
// =============================================================================

/// What a registered procedure is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodKind {
    /// Read-only remote call.
    Query,
    /// Mutating remote call.
    Mutation,
    /// Long-lived streaming topic.
    Subscription,
}

// =============================================================================
// Procedure Path
// =============================================================================

/// A validated, dot-delimited procedure path.
///
/// Construction is the only place validation happens; everything downstream
/// (transport, bindings, registry) can rely on non-empty segments.
///
/// # Example
///
/// ```ignore
/// use spark_rpc::procedures::ProcedurePath;
///
/// let path = ProcedurePath::parse("greeting.hello")?;
/// assert_eq!(path.segments(), &["greeting", "hello"]);
/// assert_eq!(path.to_string(), "greeting.hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcedurePath {
    segments: Vec<String>,
}

impl ProcedurePath {
    /// Parse a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(path: &str) -> Result<Self, RpcError> {
        if path.is_empty() {
            return Err(RpcError::InvalidPath(path.to_string()));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(RpcError::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// The path segments, in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for ProcedurePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

// =============================================================================
// Procedure Registry
// =============================================================================

/// The statically known set of procedures a client may bind.
#[derive(Debug, Clone, Default)]
pub struct ProcedureRegistry {
    entries: HashMap<String, MethodKind>,
}

impl ProcedureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure under a dotted path.
    ///
    /// Re-registering a path overwrites its kind; registries are built once
    /// at configuration time.
    pub fn register(&mut self, path: &str, kind: MethodKind) -> Result<(), RpcError> {
        let parsed = ProcedurePath::parse(path)?;
        self.entries.insert(parsed.to_string(), kind);
        Ok(())
    }

    /// Builder-style [`register`](Self::register) for configuration literals.
    pub fn with(mut self, path: &str, kind: MethodKind) -> Self {
        // Invalid paths in a hardcoded registry literal are programmer error.
        if let Err(err) = self.register(path, kind) {
            panic!("invalid procedure registration: {err}");
        }
        self
    }

    /// Resolve a dotted path to a validated [`ProcedurePath`], checking that
    /// it is registered with the requested kind.
    pub fn resolve(&self, path: &str, requested: MethodKind) -> Result<ProcedurePath, RpcError> {
        let parsed = ProcedurePath::parse(path)?;
        let key = parsed.to_string();
        match self.entries.get(&key) {
            None => Err(RpcError::UnknownProcedure(key)),
            Some(registered) if *registered != requested => Err(RpcError::KindMismatch {
                path: key,
                registered: *registered,
                requested,
            }),
            Some(_) => Ok(parsed),
        }
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
