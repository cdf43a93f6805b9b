//! # spark-rpc
//!
//! Reactive RPC client bindings for Rust.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals) for
//! fine-grained reactivity. Callers declare queries, mutations, and
//! subscriptions against named remote procedures; the binding layer tracks
//! reactive inputs (arguments, headers), coalesces concurrent executions,
//! and publishes results, errors, and execution state as signals.
//!
//! ## Architecture
//!
//! ```text
//! RpcClient ─┬─ ExecutionRegistry (shared in-flight tracking)
//!            ├─ connectivity Signal<bool> (written by transport glue)
//!            ├─ query()/mutation() → ProcedureBinding ──┐
//!            └─ subscription()     → SubscriptionBinding ┴─→ RpcTransport
//! ```
//!
//! The wire client stays external: anything satisfying
//! [`RpcTransport`](transport::RpcTransport) (one completion-settled `call`,
//! one observer-driven `subscribe`) plugs in. Scheduling is single-threaded
//! and cooperative - deferred work runs on the next [`schedule::tick`],
//! which is also what collapses any number of synchronous triggers into
//! exactly one remote call.
//!
//! ## Modules
//!
//! - [`error`] - error taxonomy (fatal configuration vs captured failures)
//! - [`schedule`] - the scheduling-tick task queue
//! - [`procedures`] - validated paths and the static procedure registry
//! - [`executions`] - in-flight execution tracking
//! - [`tracking`] - trackable inputs and the reactivity classifier
//! - [`transport`] - the consumed transport interface
//! - [`procedure`] - the query/mutation execution scheduler
//! - [`subscription`] - the subscription lifecycle state machine
//! - [`client`] - the client façade and binding factories

pub mod client;
pub mod error;
pub mod executions;
pub mod procedure;
pub mod procedures;
pub mod schedule;
pub mod subscription;
pub mod tracking;
pub mod transport;

pub use client::{RpcClient, RpcClientConfig};
pub use error::RpcError;
pub use executions::{ExecutionRecord, ExecutionRegistry};
pub use procedure::{ProcedureBinding, ProcedureOptions};
pub use procedures::{MethodKind, ProcedurePath, ProcedureRegistry};
pub use schedule::{defer_one_step, run_until_idle, tick};
pub use subscription::{SubscriptionBinding, SubscriptionOptions, SubscriptionState};
pub use tracking::{classify, Classification, Trackable};
pub use transport::{
    CallCompletion, CallKind, RpcTransport, SubscriptionHandle, SubscriptionObserver,
};
