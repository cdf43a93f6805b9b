//! Procedure Execution Scheduler - the query/mutation binding.
//!
//! One [`ProcedureBinding`] wraps one remote procedure with:
//!
//! - **Coalescing**: any number of synchronous `execute()` triggers within
//!   one scheduling tick collapse into exactly one remote call. The in-flight
//!   flag flips synchronously, so later triggers in the same tick see it; the
//!   remote invocation itself is deferred one step, so reactive inputs that
//!   changed together are read exactly once, in their final state.
//! - **Reactive re-triggering**: watchers on the argument and header inputs
//!   (when the classifier deems them trackable) call `execute()` on change,
//!   suppressed while paused. Manual `execute()` is never suppressed.
//! - **Cancellation**: each remote call carries a generation token. Disposing
//!   the binding invalidates the current token, so a late response cannot
//!   publish stale data.
//! - **Result publication**: success lands in `data` (clearing `error`);
//!   rejection lands in `error`. Neither ever re-throws out of `execute()`.
//!
//! # Example
//!
//! ```ignore
//! use spark_rpc::{ProcedureOptions, Trackable};
//! use spark_signals::signal;
//! use serde_json::json;
//!
//! let name = signal(json!({"name": "Steve"}));
//! let greeting = client.query("greeting.hello", name.clone(), ProcedureOptions {
//!     immediate: true,
//!     ..Default::default()
//! })?;
//!
//! // Changing the argument re-executes automatically.
//! name.set(json!({"name": "Bob"}));
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;
use spark_signals::{effect_scope, on_scope_dispose, signal, Signal};
use tracing::{debug, trace};

use crate::error::RpcError;
use crate::executions::ExecutionRegistry;
use crate::procedures::ProcedurePath;
use crate::schedule::defer_one_step;
use crate::tracking::{classify, Trackable};
use crate::transport::{CallKind, RpcTransport};

// =============================================================================
// Options
// =============================================================================

/// Per-binding configuration for queries and mutations.
#[derive(Default, Clone)]
pub struct ProcedureOptions {
    /// Execute once at construction. Observe settlement via
    /// [`ProcedureBinding::on_settled`].
    pub immediate: bool,
    /// Per-call override for the reactivity classifier. `None` uses the
    /// client default.
    pub reactive: Option<bool>,
    /// Seed for `data` until the first successful execution.
    pub initial_value: Option<Value>,
    /// Label shown in the client's in-flight execution list.
    pub label: Option<String>,
}

// =============================================================================
// Binding Internals
// =============================================================================

struct ProcedureInner {
    kind: CallKind,
    path: ProcedurePath,
    args: Trackable<Value>,
    transport: Rc<dyn RpcTransport>,
    executions: ExecutionRegistry,
    label: Option<String>,

    data: Signal<Value>,
    error: Signal<Option<RpcError>>,
    executing: Signal<bool>,
    paused: Signal<bool>,

    /// Coalescing guard. Flipped synchronously on the first trigger of a
    /// tick; later triggers in the same tick return immediately.
    in_flight: Cell<bool>,
    /// Cancellation token: a settlement publishes only while its generation
    /// is still current.
    generation: Cell<u64>,
    disposed: Cell<bool>,
    settled_once: Cell<bool>,
    settled_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl ProcedureInner {
    /// Start one coalesced execution.
    fn request(inner: &Rc<Self>) {
        if inner.disposed.get() {
            return;
        }
        if inner.in_flight.get() {
            trace!(path = %inner.path, "execution already in flight, coalescing");
            return;
        }

        // (a) flag flips synchronously so the coalescing window closes for
        // every later trigger in this tick.
        inner.in_flight.set(true);
        inner.executing.set(true);
        // (b) one registry entry per coalesced execution.
        let execution_id = inner.executions.begin(inner.label.as_deref());
        let token = inner.generation.get().wrapping_add(1);
        inner.generation.set(token);
        debug!(path = %inner.path, execution_id, "execution scheduled");

        // (c) defer the remote invocation one step: reactive inputs that
        // changed synchronously together are read once, settled.
        let inner = inner.clone();
        defer_one_step(move || {
            let inner_for_args = inner.clone();
            inner.args.read(Box::new(move |resolved| match resolved {
                // Explicit no-value sentinel: skip the remote call, but the
                // coalescing bookkeeping still completes cleanly.
                None => {
                    trace!(path = %inner_for_args.path, "argument sentinel, skipping call");
                    inner_for_args.settle(execution_id, token, None);
                }
                Some(args) => {
                    let inner_for_settle = inner_for_args.clone();
                    inner_for_args.transport.call(
                        inner_for_args.kind,
                        &inner_for_args.path,
                        args,
                        Box::new(move |result| {
                            inner_for_settle.settle(execution_id, token, Some(result));
                        }),
                    );
                }
            }));
        });
    }

    /// Finish one execution: publish (unless stale), release bookkeeping,
    /// fire settlement callbacks.
    fn settle(&self, execution_id: u64, token: u64, result: Option<Result<Value, RpcError>>) {
        // (d) publish - but a stale or cancelled completion must not
        // overwrite current state.
        if token == self.generation.get() && !self.disposed.get() {
            match result {
                Some(Ok(value)) => {
                    self.data.set(value);
                    self.error.set(None);
                }
                Some(Err(err)) => {
                    debug!(path = %self.path, error = %err, "execution failed");
                    self.error.set(Some(err));
                }
                None => {}
            }
        }

        // (e) release bookkeeping exactly once, success or failure.
        self.in_flight.set(false);
        self.executing.set(false);
        self.executions.end(execution_id);
        self.settled_once.set(true);

        let callbacks: Vec<_> = self.settled_callbacks.borrow_mut().drain(..).collect();
        for callback in callbacks {
            callback();
        }
    }
}

// =============================================================================
// Procedure Binding
// =============================================================================

/// Reactive binding for one query or mutation call site.
pub struct ProcedureBinding {
    inner: Rc<ProcedureInner>,
    dispose: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl ProcedureBinding {
    pub(crate) fn new(
        kind: CallKind,
        path: ProcedurePath,
        args: Trackable<Value>,
        headers: Option<Trackable<Value>>,
        options: ProcedureOptions,
        transport: Rc<dyn RpcTransport>,
        executions: ExecutionRegistry,
        default_reactive: bool,
    ) -> Self {
        let args_decision = classify(&args, options.reactive, default_reactive);

        let inner = Rc::new(ProcedureInner {
            kind,
            path,
            args,
            transport,
            executions,
            label: options.label,
            data: signal(options.initial_value.unwrap_or(Value::Null)),
            error: signal(None),
            executing: signal(false),
            paused: signal(false),
            in_flight: Cell::new(false),
            generation: Cell::new(0),
            disposed: Cell::new(false),
            settled_once: Cell::new(false),
            settled_callbacks: RefCell::new(Vec::new()),
        });

        // Watchers and teardown live in the binding's own scope, stopped by
        // dispose(). Not detached: disposing an enclosing scope tears the
        // binding down with it.
        let scope = effect_scope(false);
        {
            let inner = inner.clone();
            scope.run(move || {
                if args_decision.trackable {
                    let trigger = inner.clone();
                    let _stop = inner.args.watch(move || {
                        if !trigger.paused.get() {
                            ProcedureInner::request(&trigger);
                        }
                    });
                }

                if let Some(headers) = headers {
                    // Headers share the client default; the per-call override
                    // applies to arguments only.
                    if classify(&headers, None, default_reactive).trackable {
                        let trigger = inner.clone();
                        let _stop = headers.watch(move || {
                            if !trigger.paused.get() {
                                ProcedureInner::request(&trigger);
                            }
                        });
                    }
                }

                let inner_for_dispose = inner.clone();
                on_scope_dispose(move || {
                    // Cancels the most recent token: an in-flight response
                    // settles its bookkeeping but publishes nothing.
                    inner_for_dispose.disposed.set(true);
                });
            });
        }

        let binding = Self {
            inner,
            dispose: RefCell::new(Some(Box::new(move || scope.stop()))),
        };

        if options.immediate {
            ProcedureInner::request(&binding.inner);
        }

        binding
    }

    /// Trigger one execution. Coalesces with any execution already in
    /// flight; never suppressed by pause.
    pub fn execute(&self) {
        ProcedureInner::request(&self.inner);
    }

    /// Last successful result (or the seed value).
    pub fn data(&self) -> Value {
        self.inner.data.get()
    }

    /// The result signal, for deriveds and effects.
    pub fn data_signal(&self) -> Signal<Value> {
        self.inner.data.clone()
    }

    /// Last captured error, cleared by the next success.
    pub fn error(&self) -> Option<RpcError> {
        self.inner.error.get()
    }

    /// The error signal.
    pub fn error_signal(&self) -> Signal<Option<RpcError>> {
        self.inner.error.clone()
    }

    /// True while an execution is in flight.
    pub fn executing(&self) -> bool {
        self.inner.executing.get()
    }

    /// The executing signal.
    pub fn executing_signal(&self) -> Signal<bool> {
        self.inner.executing.clone()
    }

    /// Suppress automatic (watcher-driven) executions.
    pub fn pause(&self) {
        self.inner.paused.set(true);
    }

    /// Re-enable automatic executions.
    pub fn unpause(&self) {
        self.inner.paused.set(false);
    }

    /// Whether automatic executions are currently suppressed.
    pub fn paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Run `callback` once, after the next settlement. If the binding is
    /// idle and has already settled at least once, the callback runs on the
    /// next scheduling tick instead. This is the initial-load hook for
    /// `immediate` bindings.
    pub fn on_settled(&self, callback: impl FnOnce() + 'static) {
        if !self.inner.in_flight.get() && self.inner.settled_once.get() {
            defer_one_step(callback);
        } else {
            self.inner
                .settled_callbacks
                .borrow_mut()
                .push(Box::new(callback));
        }
    }

    /// Tear the binding down: stop watchers and cancel the in-flight token.
    pub fn dispose(&self) {
        if let Some(dispose) = self.dispose.borrow_mut().take() {
            dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedures::ProcedurePath;
    use crate::schedule::{reset_scheduler, run_until_idle, tick};
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use spark_signals::effect;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn binding_with(
        transport: Rc<MockTransport>,
        args: Trackable<Value>,
        options: ProcedureOptions,
    ) -> (ProcedureBinding, ExecutionRegistry) {
        let executions = ExecutionRegistry::new();
        let binding = ProcedureBinding::new(
            CallKind::Read,
            ProcedurePath::parse("greeting.hello").unwrap(),
            args,
            None,
            options,
            transport,
            executions.clone(),
            true,
        );
        (binding, executions)
    }

    #[test]
    fn test_synchronous_triggers_coalesce_into_one_call() {
        reset_scheduler();
        let transport = MockTransport::new();
        let (binding, executions) =
            binding_with(transport.clone(), Trackable::value(json!(null)), ProcedureOptions::default());

        // Track the high-water mark of concurrently active executions.
        let max_active = Rc::new(Cell::new(0usize));
        let max_for_effect = max_active.clone();
        let executions_for_effect = executions.clone();
        let _stop = effect(move || {
            let active = executions_for_effect.active_count();
            if active > max_for_effect.get() {
                max_for_effect.set(active);
            }
        });

        for _ in 0..10 {
            binding.execute();
        }
        assert!(binding.executing());

        run_until_idle();
        assert_eq!(transport.call_count(), 1);
        assert_eq!(max_active.get(), 1);
        assert!(!binding.executing());
        assert!(!executions.is_busy());
    }

    #[test]
    fn test_initial_value_until_first_success() {
        reset_scheduler();
        let transport = MockTransport::new();
        transport.respond_with(|_| Ok(json!("fresh")));
        let (binding, _) = binding_with(
            transport,
            Trackable::value(json!(null)),
            ProcedureOptions {
                initial_value: Some(json!("seed")),
                ..Default::default()
            },
        );

        assert_eq!(binding.data(), json!("seed"));
        binding.execute();
        assert_eq!(binding.data(), json!("seed"));
        run_until_idle();
        assert_eq!(binding.data(), json!("fresh"));
    }

    #[test]
    fn test_immediate_executes_and_settles() {
        reset_scheduler();
        let transport = MockTransport::new();
        transport.respond_with(|_| Ok(json!(123)));
        let (binding, _) = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            ProcedureOptions {
                immediate: true,
                ..Default::default()
            },
        );

        let settled = Rc::new(Cell::new(false));
        let settled_inner = settled.clone();
        binding.on_settled(move || settled_inner.set(true));

        assert!(binding.executing());
        run_until_idle();
        assert!(settled.get());
        assert_eq!(binding.data(), json!(123));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_on_settled_after_idle_settlement_fires_next_tick() {
        reset_scheduler();
        let transport = MockTransport::new();
        let (binding, _) = binding_with(
            transport,
            Trackable::value(json!(null)),
            ProcedureOptions::default(),
        );
        binding.execute();
        run_until_idle();

        let fired = Rc::new(Cell::new(false));
        let fired_inner = fired.clone();
        binding.on_settled(move || fired_inner.set(true));
        assert!(!fired.get());
        run_until_idle();
        assert!(fired.get());
    }

    #[test]
    fn test_failure_lands_in_error_and_releases_bookkeeping() {
        reset_scheduler();
        let transport = MockTransport::new();
        transport.respond_with(|_| Err(RpcError::Remote("boom".to_string())));
        let (binding, executions) = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            ProcedureOptions {
                initial_value: Some(json!("seed")),
                ..Default::default()
            },
        );

        binding.execute();
        run_until_idle();
        assert_eq!(binding.error(), Some(RpcError::Remote("boom".to_string())));
        assert_eq!(binding.data(), json!("seed"));
        assert!(!binding.executing());
        assert!(!executions.is_busy());

        // A later success clears the error slot.
        transport.respond_with(|_| Ok(json!("ok")));
        binding.execute();
        run_until_idle();
        assert_eq!(binding.error(), None);
        assert_eq!(binding.data(), json!("ok"));
    }

    #[test]
    fn test_reactive_args_retrigger_and_read_final_state() {
        reset_scheduler();
        let transport = MockTransport::new();
        transport.respond_with(|call| Ok(call.args.clone()));
        let args = spark_signals::signal(json!({"name": "Steve"}));
        let (binding, _) = binding_with(
            transport.clone(),
            Trackable::from_signal(args.clone()),
            ProcedureOptions::default(),
        );

        // Two synchronous changes: one execution, reading the final value.
        args.set(json!({"name": "interim"}));
        args.set(json!({"name": "Bob"}));
        run_until_idle();

        assert_eq!(transport.call_count(), 1);
        assert_eq!(binding.data(), json!({"name": "Bob"}));
    }

    #[test]
    fn test_pause_suppresses_watchers_not_manual_execute() {
        reset_scheduler();
        let transport = MockTransport::new();
        let args = spark_signals::signal(json!(1));
        let (binding, _) = binding_with(
            transport.clone(),
            Trackable::from_signal(args.clone()),
            ProcedureOptions::default(),
        );

        binding.pause();
        assert!(binding.paused());
        args.set(json!(2));
        run_until_idle();
        assert_eq!(transport.call_count(), 0);

        binding.execute();
        run_until_idle();
        assert_eq!(transport.call_count(), 1);

        binding.unpause();
        args.set(json!(3));
        run_until_idle();
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn test_sentinel_skips_call_but_completes_bookkeeping() {
        reset_scheduler();
        let transport = MockTransport::new();
        let (binding, executions) = binding_with(
            transport.clone(),
            Trackable::getter(|| None),
            ProcedureOptions::default(),
        );

        binding.execute();
        assert!(binding.executing());
        run_until_idle();
        assert_eq!(transport.call_count(), 0);
        assert!(!binding.executing());
        assert!(!executions.is_busy());
    }

    #[test]
    fn test_async_accessor_resolves_before_call() {
        reset_scheduler();
        let transport = MockTransport::new();
        transport.respond_with(|call| Ok(call.args.clone()));
        let source = Trackable::async_getter(|deliver| {
            defer_one_step(move || deliver(Some(json!("from-async"))));
        });
        let (binding, _) = binding_with(transport.clone(), source, ProcedureOptions::default());

        binding.execute();
        run_until_idle();
        assert_eq!(transport.call_count(), 1);
        assert_eq!(binding.data(), json!("from-async"));
    }

    #[test]
    fn test_disposed_binding_discards_late_response() {
        reset_scheduler();
        let transport = MockTransport::new();
        transport.respond_with(|_| Ok(json!("late")));
        let (binding, executions) = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            ProcedureOptions {
                initial_value: Some(json!("seed")),
                ..Default::default()
            },
        );

        binding.execute();
        tick(); // remote call issued; completion queued for the next tick
        assert_eq!(transport.call_count(), 1);

        binding.dispose();
        run_until_idle(); // completion arrives after cancellation

        assert_eq!(binding.data(), json!("seed"));
        // Bookkeeping is still released exactly once.
        assert!(!executions.is_busy());
        assert!(!binding.executing());
    }

    #[test]
    fn test_enclosing_scope_disposal_tears_binding_down() {
        reset_scheduler();
        let transport = MockTransport::new();

        // A binding built inside a scope is that scope's child; stopping the
        // parent cascades into the binding's teardown.
        let parent = spark_signals::effect_scope(false);
        let slot: Rc<RefCell<Option<ProcedureBinding>>> = Rc::new(RefCell::new(None));
        let slot_for_run = slot.clone();
        let transport_for_run = transport.clone();
        parent.run(move || {
            let (binding, _) = binding_with(
                transport_for_run,
                Trackable::value(json!(null)),
                ProcedureOptions::default(),
            );
            *slot_for_run.borrow_mut() = Some(binding);
        });
        parent.stop();

        let binding = slot.borrow_mut().take().unwrap();
        binding.execute();
        run_until_idle();
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_disposed_binding_ignores_execute() {
        reset_scheduler();
        let transport = MockTransport::new();
        let (binding, _) = binding_with(
            transport.clone(),
            Trackable::value(json!(null)),
            ProcedureOptions::default(),
        );
        binding.dispose();
        binding.execute();
        run_until_idle();
        assert_eq!(transport.call_count(), 0);
    }
}
