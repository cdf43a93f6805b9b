//! Consumed transport interface.
//!
//! The binding layer never speaks the wire protocol itself. It consumes any
//! RPC client through two narrow operations: a single remote call settled by
//! a completion callback, and a long-lived subscription driven by observer
//! callbacks. Connectivity is a plain `Signal<bool>` written by the
//! transport's open/close hooks; this layer only reads it.

use serde_json::Value;

use crate::error::RpcError;
use crate::procedures::ProcedurePath;

// =============================================================================
// Call Interface
// =============================================================================

/// Whether a remote call reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Query.
    Read,
    /// Mutation.
    Write,
}

/// Completion callback for a remote call. Invoked exactly once.
pub type CallCompletion = Box<dyn FnOnce(Result<Value, RpcError>)>;

// =============================================================================
// Subscription Interface
// =============================================================================

/// Observer callbacks for one subscription, mapped 1:1 to the transport's
/// own notifications.
pub struct SubscriptionObserver {
    /// A streamed value arrived.
    pub on_data: Box<dyn Fn(Value)>,
    /// The stream reported an error. Does not imply the stream ended.
    pub on_error: Box<dyn Fn(RpcError)>,
    /// The transport acknowledged the subscription.
    pub on_started: Box<dyn Fn()>,
    /// The stream stopped.
    pub on_stopped: Box<dyn Fn()>,
    /// The stream completed. Some transports report this instead of
    /// `on_stopped` for client-initiated unsubscribes; this layer passes
    /// through whatever the transport says.
    pub on_complete: Box<dyn Fn()>,
}

/// Handle returned by [`RpcTransport::subscribe`]; consuming it tears the
/// subscription down.
pub struct SubscriptionHandle {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl SubscriptionHandle {
    /// Wrap a transport's unsubscribe function.
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Tear the subscription down.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// The narrow interface any RPC client must satisfy.
///
/// Implementations settle `call` by invoking `complete` exactly once, on the
/// binding layer's thread, typically via a deferred scheduling step. Failure
/// is an `Err` completion, never a panic.
pub trait RpcTransport {
    /// Perform one remote call.
    fn call(&self, kind: CallKind, path: &ProcedurePath, args: Value, complete: CallCompletion);

    /// Open a long-lived subscription. The returned handle closes it.
    fn subscribe(
        &self,
        topic: &ProcedurePath,
        args: Value,
        observer: SubscriptionObserver,
    ) -> SubscriptionHandle;
}

// =============================================================================
// Mock Transport (test support)
// =============================================================================

#[cfg(test)]
pub(crate) mod mock {
    //! Deterministic in-memory transport for binding tests.
    //!
    //! Calls settle through `defer_one_step`, so a test drives settlement
    //! explicitly with `tick()` / `run_until_idle()`. Subscriptions are
    //! recorded so tests can emit stream events by hand.

    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::schedule::defer_one_step;

    /// One recorded remote call.
    pub struct MockCall {
        pub kind: CallKind,
        pub path: String,
        pub args: Value,
    }

    /// One recorded subscription, kept alive so tests can drive it.
    pub struct MockSubscription {
        pub path: String,
        pub args: Value,
        pub observer: SubscriptionObserver,
        pub open: Cell<bool>,
    }

    impl MockSubscription {
        pub fn emit(&self, value: Value) {
            (self.observer.on_data)(value);
        }

        pub fn emit_error(&self, message: &str) {
            (self.observer.on_error)(RpcError::Subscription(message.to_string()));
        }
    }

    pub struct MockTransport {
        pub calls: RefCell<Vec<MockCall>>,
        pub subscriptions: RefCell<Vec<Rc<MockSubscription>>>,
        handler: RefCell<Box<dyn Fn(&MockCall) -> Result<Value, RpcError>>>,
        /// When true, client-initiated unsubscribes report `on_complete`
        /// instead of `on_stopped` (the known transport inconsistency).
        complete_on_unsubscribe: Rc<Cell<bool>>,
    }

    impl MockTransport {
        pub fn new() -> Rc<Self> {
            Rc::new(Self {
                calls: RefCell::new(Vec::new()),
                subscriptions: RefCell::new(Vec::new()),
                handler: RefCell::new(Box::new(|_| Ok(Value::Null))),
                complete_on_unsubscribe: Rc::new(Cell::new(false)),
            })
        }

        /// Script the response for every subsequent call.
        pub fn respond_with(
            &self,
            handler: impl Fn(&MockCall) -> Result<Value, RpcError> + 'static,
        ) {
            *self.handler.borrow_mut() = Box::new(handler);
        }

        /// Make unsubscribe report `on_complete` instead of `on_stopped`.
        pub fn complete_on_unsubscribe(&self) {
            self.complete_on_unsubscribe.set(true);
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }

        pub fn subscription_count(&self) -> usize {
            self.subscriptions.borrow().len()
        }

        pub fn last_subscription(&self) -> Rc<MockSubscription> {
            self.subscriptions
                .borrow()
                .last()
                .cloned()
                .expect("no subscription opened")
        }
    }

    impl RpcTransport for MockTransport {
        fn call(
            &self,
            kind: CallKind,
            path: &ProcedurePath,
            args: Value,
            complete: CallCompletion,
        ) {
            let call = MockCall {
                kind,
                path: path.to_string(),
                args,
            };
            let handler = self.handler.borrow();
            let result = (*handler)(&call);
            drop(handler);
            self.calls.borrow_mut().push(call);
            // Settle on the next tick, like a real asynchronous transport.
            defer_one_step(move || complete(result));
        }

        fn subscribe(
            &self,
            topic: &ProcedurePath,
            args: Value,
            observer: SubscriptionObserver,
        ) -> SubscriptionHandle {
            let subscription = Rc::new(MockSubscription {
                path: topic.to_string(),
                args,
                observer,
                open: Cell::new(true),
            });
            self.subscriptions.borrow_mut().push(subscription.clone());

            // Acknowledge synchronously; tests stay deterministic.
            (subscription.observer.on_started)();

            let complete_flag = self.complete_on_unsubscribe.clone();
            SubscriptionHandle::new(move || {
                if !subscription.open.get() {
                    return;
                }
                subscription.open.set(false);
                if complete_flag.get() {
                    (subscription.observer.on_complete)();
                } else {
                    (subscription.observer.on_stopped)();
                }
            })
        }
    }
}
