//! Subscription Lifecycle Manager - the long-lived stream binding.
//!
//! One [`SubscriptionBinding`] manages one socket-backed subscription:
//!
//! - Explicit `subscribe()` / `unsubscribe()` driving the state machine
//!   `Created → Started → {Stopped, Completed}`. Re-subscription always
//!   passes through unsubscribe; the exposed state is whatever the transport
//!   reports, including transports that report `Completed` for a
//!   client-initiated unsubscribe.
//! - **Reactive re-subscription**: a watcher over the argument source
//!   triggers `resubscribe()` on change, but only while subscribed and not
//!   paused. Firing while unsubscribed or paused is a silent no-op - nothing
//!   is queued.
//! - **Reconnect re-subscription**: a genuine disconnect-then-reconnect of
//!   the shared connectivity signal re-subscribes automatically, regardless
//!   of pause state. The initial connect never triggers anything.
//! - Scope teardown forces `unsubscribe()` and drops all callback handles.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spark_signals::{effect, effect_scope, on_scope_dispose, signal, Signal};
use tracing::{debug, trace};

use crate::error::RpcError;
use crate::procedures::ProcedurePath;
use crate::schedule::defer_one_step;
use crate::tracking::{classify, Trackable};
use crate::transport::{RpcTransport, SubscriptionHandle, SubscriptionObserver};

// =============================================================================
// State Machine
// =============================================================================

/// Lifecycle state of a subscription, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// Binding exists, nothing opened yet.
    Created,
    /// The transport acknowledged the subscription.
    Started,
    /// The stream stopped.
    Stopped,
    /// The stream completed.
    Completed,
}

// =============================================================================
// Options
// =============================================================================

/// Per-binding configuration for subscriptions.
#[derive(Default, Clone)]
pub struct SubscriptionOptions {
    /// Per-call override for the reactivity classifier. `None` uses the
    /// client default.
    pub reactive: Option<bool>,
}

// =============================================================================
// Binding Internals
// =============================================================================

struct SubscriptionInner {
    topic: ProcedurePath,
    args: Trackable<Value>,
    transport: Rc<dyn RpcTransport>,

    data: Signal<Value>,
    error: Signal<Option<RpcError>>,
    state: Signal<SubscriptionState>,
    subscribed: Signal<bool>,
    paused: Signal<bool>,

    /// Present iff `subscribed` is true.
    handle: RefCell<Option<SubscriptionHandle>>,
    /// Guards against double-subscribe while an async argument source is
    /// still resolving.
    pending_open: Cell<bool>,
    /// An unsubscribe() arrived while the argument read was still pending;
    /// the resolution must not open the subscription.
    open_cancelled: Cell<bool>,
    /// A disconnect tore down an active subscription; the next reconnect
    /// owes a subscribe().
    resubscribe_owed: Cell<bool>,
    disposed: Cell<bool>,
}

impl SubscriptionInner {
    fn subscribe(inner: &Rc<Self>) {
        if inner.disposed.get() || inner.subscribed.get() || inner.pending_open.get() {
            return;
        }
        inner.pending_open.set(true);
        inner.open_cancelled.set(false);

        let source = inner.args.clone();
        let inner = inner.clone();
        source.read(Box::new(move |resolved| {
            inner.pending_open.set(false);
            if inner.disposed.get() || inner.open_cancelled.get() {
                inner.open_cancelled.set(false);
                return;
            }
            // No-value sentinel: nothing to subscribe with.
            let Some(args) = resolved else {
                trace!(topic = %inner.topic, "argument sentinel, subscription skipped");
                return;
            };

            let observer = SubscriptionObserver {
                on_data: {
                    let data = inner.data.clone();
                    Box::new(move |value| { data.set(value); })
                },
                on_error: {
                    // A stream error alone does not change the subscribed
                    // flag; only connectivity loss does.
                    let error = inner.error.clone();
                    Box::new(move |err| { error.set(Some(err)); })
                },
                on_started: {
                    let state = inner.state.clone();
                    Box::new(move || { state.set(SubscriptionState::Started); })
                },
                on_stopped: {
                    let state = inner.state.clone();
                    Box::new(move || { state.set(SubscriptionState::Stopped); })
                },
                on_complete: {
                    let state = inner.state.clone();
                    Box::new(move || { state.set(SubscriptionState::Completed); })
                },
            };

            debug!(topic = %inner.topic, "subscribing");
            let handle = inner.transport.subscribe(&inner.topic, args, observer);
            *inner.handle.borrow_mut() = Some(handle);
            inner.subscribed.set(true);
        }));
    }

    fn unsubscribe(&self) {
        // An open still resolving its arguments counts as subscribed intent;
        // cancel it so the resolution does not open a stream nobody wants.
        if self.pending_open.get() {
            self.open_cancelled.set(true);
        }
        if !self.subscribed.get() {
            return;
        }
        debug!(topic = %self.topic, "unsubscribing");
        self.subscribed.set(false);
        // The terminal state is whatever the transport reports from here -
        // Stopped or Completed, depending on the transport.
        if let Some(handle) = self.handle.borrow_mut().take() {
            handle.unsubscribe();
        }
    }

    fn resubscribe(inner: &Rc<Self>) {
        inner.unsubscribe();
        let inner = inner.clone();
        defer_one_step(move || SubscriptionInner::subscribe(&inner));
    }

    /// Connectivity dropped. An active subscription is dead on the wire;
    /// close it out and owe a subscribe() on the next reconnect.
    fn handle_disconnect(&self) {
        if self.subscribed.get() {
            debug!(topic = %self.topic, "connectivity lost, dropping subscription");
            self.unsubscribe();
            self.resubscribe_owed.set(true);
        }
    }

    /// Connectivity came back after a genuine disconnect. Pause does not
    /// apply here.
    fn handle_reconnect(inner: &Rc<Self>) {
        if inner.resubscribe_owed.get() {
            inner.resubscribe_owed.set(false);
            debug!(topic = %inner.topic, "connectivity restored, resubscribing");
            SubscriptionInner::subscribe(inner);
        }
    }
}

// =============================================================================
// Subscription Binding
// =============================================================================

/// Reactive binding for one subscription call site.
pub struct SubscriptionBinding {
    inner: Rc<SubscriptionInner>,
    dispose: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl SubscriptionBinding {
    pub(crate) fn new(
        topic: ProcedurePath,
        args: Trackable<Value>,
        options: SubscriptionOptions,
        transport: Rc<dyn RpcTransport>,
        connected: Signal<bool>,
        default_reactive: bool,
    ) -> Self {
        let args_decision = classify(&args, options.reactive, default_reactive);

        let inner = Rc::new(SubscriptionInner {
            topic,
            args,
            transport,
            data: signal(Value::Null),
            error: signal(None),
            state: signal(SubscriptionState::Created),
            subscribed: signal(false),
            paused: signal(false),
            handle: RefCell::new(None),
            pending_open: Cell::new(false),
            open_cancelled: Cell::new(false),
            resubscribe_owed: Cell::new(false),
            disposed: Cell::new(false),
        });

        // Not detached: disposing an enclosing scope tears the binding down.
        let scope = effect_scope(false);
        {
            let inner = inner.clone();
            scope.run(move || {
                if args_decision.trackable {
                    let trigger = inner.clone();
                    let _stop = inner.args.watch(move || {
                        // Silent no-op while unsubscribed or paused; nothing
                        // is queued for later.
                        if trigger.subscribed.get() && !trigger.paused.get() {
                            SubscriptionInner::resubscribe(&trigger);
                        }
                    });
                }

                // Reconnect watcher. The first observed value establishes the
                // baseline; only a real false→true transition after a
                // true→false one re-subscribes.
                {
                    let watcher = inner.clone();
                    let connected = connected.clone();
                    let mut previous: Option<bool> = None;
                    let _stop = effect(move || {
                        let now = connected.get();
                        match previous {
                            None => previous = Some(now),
                            Some(seen) if seen == now => {}
                            Some(_) => {
                                previous = Some(now);
                                if now {
                                    SubscriptionInner::handle_reconnect(&watcher);
                                } else {
                                    watcher.handle_disconnect();
                                }
                            }
                        }
                    });
                }

                let inner_for_dispose = inner.clone();
                on_scope_dispose(move || {
                    inner_for_dispose.disposed.set(true);
                    inner_for_dispose.unsubscribe();
                });
            });
        }

        Self {
            inner,
            dispose: RefCell::new(Some(Box::new(move || scope.stop()))),
        }
    }

    /// Open the subscription. No-op if already subscribed.
    pub fn subscribe(&self) {
        SubscriptionInner::subscribe(&self.inner);
    }

    /// Close the subscription. No-op if not subscribed.
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    /// Unsubscribe now, subscribe again on the next scheduling tick.
    pub fn resubscribe(&self) {
        SubscriptionInner::resubscribe(&self.inner);
    }

    /// Last streamed value.
    pub fn data(&self) -> Value {
        self.inner.data.get()
    }

    /// The data signal.
    pub fn data_signal(&self) -> Signal<Value> {
        self.inner.data.clone()
    }

    /// Last stream error.
    pub fn error(&self) -> Option<RpcError> {
        self.inner.error.get()
    }

    /// The error signal.
    pub fn error_signal(&self) -> Signal<Option<RpcError>> {
        self.inner.error.clone()
    }

    /// Current lifecycle state, as last reported by the transport.
    pub fn state(&self) -> SubscriptionState {
        self.inner.state.get()
    }

    /// The state signal.
    pub fn state_signal(&self) -> Signal<SubscriptionState> {
        self.inner.state.clone()
    }

    /// Whether the binding currently holds an open subscription.
    pub fn subscribed(&self) -> bool {
        self.inner.subscribed.get()
    }

    /// The subscribed signal.
    pub fn subscribed_signal(&self) -> Signal<bool> {
        self.inner.subscribed.clone()
    }

    /// Suppress reactive re-subscription. Reconnect handling is unaffected.
    pub fn pause(&self) {
        self.inner.paused.set(true);
    }

    /// Re-enable reactive re-subscription.
    pub fn unpause(&self) {
        self.inner.paused.set(false);
    }

    /// Whether reactive re-subscription is suppressed.
    pub fn paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Tear the binding down: forces unsubscribe and stops all watchers.
    pub fn dispose(&self) {
        if let Some(dispose) = self.dispose.borrow_mut().take() {
            dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{reset_scheduler, run_until_idle};
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use spark_signals::signal;
    use std::rc::Rc;

    fn binding_with(
        transport: Rc<MockTransport>,
        args: Trackable<Value>,
        connected: Signal<bool>,
    ) -> SubscriptionBinding {
        SubscriptionBinding::new(
            ProcedurePath::parse("events.tail").unwrap(),
            args,
            SubscriptionOptions::default(),
            transport,
            connected,
            true,
        )
    }

    #[test]
    fn test_lifecycle_created_started_data() {
        reset_scheduler();
        let transport = MockTransport::new();
        let binding = binding_with(transport.clone(), Trackable::value(json!(null)), signal(true));

        assert_eq!(binding.state(), SubscriptionState::Created);
        assert!(!binding.subscribed());

        binding.subscribe();
        assert_eq!(binding.state(), SubscriptionState::Started);
        assert!(binding.subscribed());
        assert_eq!(transport.subscription_count(), 1);

        transport.last_subscription().emit(json!({"seq": 1}));
        assert_eq!(binding.data(), json!({"seq": 1}));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        reset_scheduler();
        let transport = MockTransport::new();
        let binding = binding_with(transport.clone(), Trackable::value(json!(null)), signal(true));

        binding.subscribe();
        binding.subscribe();
        binding.subscribe();
        assert_eq!(transport.subscription_count(), 1);
    }

    #[test]
    fn test_unsubscribe_reports_transport_terminal_state() {
        reset_scheduler();
        let transport = MockTransport::new();
        let binding = binding_with(transport.clone(), Trackable::value(json!(null)), signal(true));

        binding.subscribe();
        binding.unsubscribe();
        assert!(!binding.subscribed());
        assert_eq!(binding.state(), SubscriptionState::Stopped);

        // Some transports report Completed for a client-initiated
        // unsubscribe; the binding passes that through untouched.
        let transport = MockTransport::new();
        transport.complete_on_unsubscribe();
        let binding = binding_with(transport.clone(), Trackable::value(json!(null)), signal(true));
        binding.subscribe();
        binding.unsubscribe();
        assert!(!binding.subscribed());
        assert_eq!(binding.state(), SubscriptionState::Completed);
    }

    #[test]
    fn test_unsubscribe_when_not_subscribed_is_noop() {
        reset_scheduler();
        let transport = MockTransport::new();
        let binding = binding_with(transport.clone(), Trackable::value(json!(null)), signal(true));
        binding.unsubscribe();
        assert_eq!(binding.state(), SubscriptionState::Created);
    }

    #[test]
    fn test_reactive_args_resubscribe_through_unsubscribe() {
        reset_scheduler();
        let transport = MockTransport::new();
        let args = signal(json!({"room": "a"}));
        let binding = binding_with(
            transport.clone(),
            Trackable::from_signal(args.clone()),
            signal(true),
        );

        binding.subscribe();
        assert_eq!(transport.subscription_count(), 1);

        args.set(json!({"room": "b"}));
        // Old subscription is already closed; the new one opens next tick.
        assert!(!transport.subscriptions.borrow()[0].open.get());
        run_until_idle();

        assert_eq!(transport.subscription_count(), 2);
        assert_eq!(binding.state(), SubscriptionState::Started);
        assert!(binding.subscribed());
        assert_eq!(transport.last_subscription().args, json!({"room": "b"}));
    }

    #[test]
    fn test_arg_change_while_unsubscribed_is_silent() {
        reset_scheduler();
        let transport = MockTransport::new();
        let args = signal(json!(1));
        let binding = binding_with(
            transport.clone(),
            Trackable::from_signal(args.clone()),
            signal(true),
        );

        binding.subscribe();
        binding.unsubscribe();
        args.set(json!(2));
        run_until_idle();

        // No queued resubscription.
        assert_eq!(transport.subscription_count(), 1);
        assert!(!binding.subscribed());
    }

    #[test]
    fn test_pause_suppresses_reactive_resubscription() {
        reset_scheduler();
        let transport = MockTransport::new();
        let args = signal(json!("a"));
        let binding = binding_with(
            transport.clone(),
            Trackable::from_signal(args.clone()),
            signal(true),
        );

        binding.subscribe();
        transport.last_subscription().emit(json!("from-a"));

        binding.pause();
        args.set(json!("b"));
        run_until_idle();

        // Still the original subscription; data derived from the old
        // arguments is untouched.
        assert_eq!(transport.subscription_count(), 1);
        assert_eq!(binding.state(), SubscriptionState::Started);
        assert_eq!(binding.data(), json!("from-a"));

        binding.unpause();
        args.set(json!("c"));
        run_until_idle();

        // Exactly one resubscription.
        assert_eq!(transport.subscription_count(), 2);
        assert_eq!(transport.last_subscription().args, json!("c"));
    }

    #[test]
    fn test_stream_error_keeps_subscription_open() {
        reset_scheduler();
        let transport = MockTransport::new();
        let binding = binding_with(transport.clone(), Trackable::value(json!(null)), signal(true));

        binding.subscribe();
        transport.last_subscription().emit_error("stream hiccup");

        assert_eq!(
            binding.error(),
            Some(RpcError::Subscription("stream hiccup".to_string()))
        );
        assert!(binding.subscribed());
        assert_eq!(binding.state(), SubscriptionState::Started);
    }

    #[test]
    fn test_reconnect_resubscribes_after_genuine_disconnect() {
        reset_scheduler();
        let transport = MockTransport::new();
        let connected = signal(true);
        let binding = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            connected.clone(),
        );

        binding.subscribe();
        assert_eq!(transport.subscription_count(), 1);

        connected.set(false);
        assert!(!binding.subscribed());

        connected.set(true);
        assert!(binding.subscribed());
        assert_eq!(transport.subscription_count(), 2);
        assert_eq!(binding.state(), SubscriptionState::Started);
    }

    #[test]
    fn test_reconnect_ignores_pause() {
        reset_scheduler();
        let transport = MockTransport::new();
        let connected = signal(true);
        let binding = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            connected.clone(),
        );

        binding.subscribe();
        binding.pause();

        connected.set(false);
        connected.set(true);

        assert!(binding.subscribed());
        assert_eq!(transport.subscription_count(), 2);
    }

    #[test]
    fn test_reconnect_without_prior_subscription_does_nothing() {
        reset_scheduler();
        let transport = MockTransport::new();
        let connected = signal(true);
        let _binding = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            connected.clone(),
        );

        connected.set(false);
        connected.set(true);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[test]
    fn test_initial_connect_is_not_a_reconnect() {
        reset_scheduler();
        let transport = MockTransport::new();
        // The signal starts disconnected; the first connect must not open
        // anything by itself.
        let connected = signal(false);
        let _binding = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            connected.clone(),
        );

        connected.set(true);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[test]
    fn test_dispose_forces_unsubscribe() {
        reset_scheduler();
        let transport = MockTransport::new();
        let args = signal(json!(1));
        let binding = binding_with(
            transport.clone(),
            Trackable::from_signal(args.clone()),
            signal(true),
        );

        binding.subscribe();
        binding.dispose();

        assert!(!binding.subscribed());
        assert!(!transport.subscriptions.borrow()[0].open.get());

        // Disposed bindings ignore everything.
        args.set(json!(2));
        binding.subscribe();
        run_until_idle();
        assert_eq!(transport.subscription_count(), 1);
    }

    #[test]
    fn test_unsubscribe_cancels_pending_async_open() {
        reset_scheduler();
        let transport = MockTransport::new();
        let source = Trackable::async_getter(|deliver| {
            defer_one_step(move || deliver(Some(json!("late"))));
        });
        let binding = binding_with(transport.clone(), source, signal(true));

        binding.subscribe();
        assert!(!binding.subscribed());

        // The arguments have not resolved yet; this must still win.
        binding.unsubscribe();
        run_until_idle();
        assert_eq!(transport.subscription_count(), 0);
        assert!(!binding.subscribed());

        // The cancel is consumed; a later subscribe opens normally.
        binding.subscribe();
        run_until_idle();
        assert_eq!(transport.subscription_count(), 1);
        assert!(binding.subscribed());
    }

    #[test]
    fn test_sentinel_args_skip_subscription() {
        reset_scheduler();
        let transport = MockTransport::new();
        let binding = binding_with(transport.clone(), Trackable::getter(|| None), signal(true));

        binding.subscribe();
        assert_eq!(transport.subscription_count(), 0);
        assert!(!binding.subscribed());
        assert_eq!(binding.state(), SubscriptionState::Created);
    }
}
