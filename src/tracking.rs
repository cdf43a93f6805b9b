//! Trackable inputs and the reactivity classifier.
//!
//! Binding inputs (arguments, headers) arrive in four shapes, made explicit
//! by the [`Trackable`] capability wrapper instead of duck-typing:
//!
//! - `Value` - a plain value, read once, never changes.
//! - `Signal` - a reactive container; changes propagate automatically.
//! - `Getter` - a synchronous accessor, invoked fresh on every read. May
//!   read signals internally, in which case watching it tracks those.
//! - `AsyncGetter` - a continuation-passing accessor whose value arrives
//!   later (e.g. it must consult another deferred source first).
//!
//! Getters return `Option<T>`: `None` is the explicit no-value sentinel that
//! tells the scheduler to skip the remote call for that invocation.
//!
//! The classifier decides whether a given input gets a watcher. Policy: an
//! asynchronous accessor is never watched - there is no synchronous value to
//! track - and requesting it anyway is a configuration misuse reported as a
//! warning, not an error.

use std::rc::Rc;

use spark_signals::{effect, Signal};
use tracing::warn;

/// Continuation used by [`Trackable::read`]. Receives `None` when the
/// source yields the no-value sentinel.
pub type ReadDelivery<T> = Box<dyn FnOnce(Option<T>)>;

/// Stop function for an installed watcher.
pub type StopWatch = Box<dyn FnOnce()>;

// =============================================================================
// Trackable
// =============================================================================

/// A binding input: plain value, signal, or (possibly asynchronous) accessor.
pub enum Trackable<T: Clone + PartialEq + 'static> {
    /// Static value (not reactive).
    Value(T),
    /// Reactive signal (changes propagate automatically).
    Signal(Signal<T>),
    /// Synchronous accessor, invoked fresh on every read.
    Getter(Rc<dyn Fn() -> Option<T>>),
    /// Asynchronous accessor; delivers its value through a continuation.
    AsyncGetter(Rc<dyn Fn(ReadDelivery<T>)>),
}

impl<T: Clone + PartialEq + 'static> Trackable<T> {
    /// Wrap a plain value.
    pub fn value(value: T) -> Self {
        Trackable::Value(value)
    }

    /// Wrap a signal.
    pub fn from_signal(signal: Signal<T>) -> Self {
        Trackable::Signal(signal)
    }

    /// Wrap a synchronous accessor. Returning `None` skips the remote call
    /// for that invocation.
    pub fn getter(getter: impl Fn() -> Option<T> + 'static) -> Self {
        Trackable::Getter(Rc::new(getter))
    }

    /// Wrap an asynchronous accessor.
    pub fn async_getter(getter: impl Fn(ReadDelivery<T>) + 'static) -> Self {
        Trackable::AsyncGetter(Rc::new(getter))
    }

    /// True for accessor variants (sync or async).
    pub fn is_accessor(&self) -> bool {
        matches!(self, Trackable::Getter(_) | Trackable::AsyncGetter(_))
    }

    /// True for the asynchronous accessor variant.
    pub fn is_async(&self) -> bool {
        matches!(self, Trackable::AsyncGetter(_))
    }

    /// True for the reactive container variant.
    pub fn is_reactive(&self) -> bool {
        matches!(self, Trackable::Signal(_))
    }

    /// Read the current value, delivering it through `deliver`.
    ///
    /// Synchronous sources deliver before returning; an async accessor
    /// delivers whenever it completes. Reads happen outside any effect, so
    /// they never establish reactive dependencies - tracking is exclusively
    /// [`watch`](Self::watch)'s job.
    pub fn read(&self, deliver: ReadDelivery<T>) {
        match self {
            Trackable::Value(value) => deliver(Some(value.clone())),
            Trackable::Signal(signal) => deliver(Some(signal.get())),
            Trackable::Getter(getter) => deliver(getter()),
            Trackable::AsyncGetter(getter) => getter(deliver),
        }
    }

    /// Install a change watcher, returning its stop function.
    ///
    /// The watcher fires `on_change` whenever the watched value settles to a
    /// different value; the initial read never fires. Plain values and async
    /// accessors have nothing to watch - the returned stop function is a
    /// no-op (the classifier refuses to track them upstream).
    pub fn watch(&self, on_change: impl Fn() + 'static) -> StopWatch {
        match self {
            Trackable::Value(_) | Trackable::AsyncGetter(_) => Box::new(|| {}),
            Trackable::Signal(signal) => {
                let signal = signal.clone();
                let mut previous: Option<T> = None;
                Box::new(effect(move || {
                    let current = signal.get();
                    match &previous {
                        // First run establishes the dependency only.
                        None => previous = Some(current),
                        Some(seen) if *seen == current => {}
                        _ => {
                            previous = Some(current);
                            on_change();
                        }
                    }
                }))
            }
            Trackable::Getter(getter) => {
                let getter = getter.clone();
                let mut previous: Option<Option<T>> = None;
                Box::new(effect(move || {
                    // The getter may read signals; running it inside the
                    // effect tracks them.
                    let current = getter();
                    match &previous {
                        None => previous = Some(current),
                        Some(seen) if *seen == current => {}
                        _ => {
                            previous = Some(current);
                            on_change();
                        }
                    }
                }))
            }
        }
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Trackable<T> {
    fn clone(&self) -> Self {
        match self {
            Trackable::Value(value) => Trackable::Value(value.clone()),
            Trackable::Signal(signal) => Trackable::Signal(signal.clone()),
            Trackable::Getter(getter) => Trackable::Getter(getter.clone()),
            Trackable::AsyncGetter(getter) => Trackable::AsyncGetter(getter.clone()),
        }
    }
}

impl<T: Clone + PartialEq + 'static> From<T> for Trackable<T> {
    fn from(value: T) -> Self {
        Trackable::Value(value)
    }
}

impl<T: Clone + PartialEq + 'static> From<Signal<T>> for Trackable<T> {
    fn from(signal: Signal<T>) -> Self {
        Trackable::Signal(signal)
    }
}

// =============================================================================
// Reactivity Classifier
// =============================================================================

/// What the classifier decided about one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether a watcher should be installed for this input.
    pub trackable: bool,
    /// The input is an accessor (sync or async).
    pub is_accessor: bool,
    /// The input is an asynchronous accessor.
    pub is_async_accessor: bool,
}

/// Decide whether an input should be watched.
///
/// The explicit per-call override wins when present; otherwise an input is
/// trackable iff it is a reactive container or an accessor and the client's
/// default reactivity flag is enabled. Asynchronous accessors are never
/// trackable: combining one with `override = true` is reported as a warning
/// and the watcher is simply not installed.
pub fn classify<T: Clone + PartialEq + 'static>(
    source: &Trackable<T>,
    user_override: Option<bool>,
    default_reactive: bool,
) -> Classification {
    let is_accessor = source.is_accessor();

    if source.is_async() {
        if user_override == Some(true) {
            warn!("asynchronous accessors cannot be watched; reactive override ignored");
        }
        return Classification {
            trackable: false,
            is_accessor,
            is_async_accessor: true,
        };
    }

    let trackable = match user_override {
        Some(explicit) => explicit,
        None => (source.is_reactive() || is_accessor) && default_reactive,
    };

    Classification {
        trackable,
        is_accessor,
        is_async_accessor: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{defer_one_step, reset_scheduler, run_until_idle};
    use spark_signals::signal;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_classify_plain_value() {
        let source: Trackable<i32> = Trackable::value(7);
        let decision = classify(&source, None, true);
        assert!(!decision.trackable);
        assert!(!decision.is_accessor);
        assert!(!decision.is_async_accessor);
    }

    #[test]
    fn test_classify_signal_follows_default() {
        let source = Trackable::from_signal(signal(7));
        assert!(classify(&source, None, true).trackable);
        assert!(!classify(&source, None, false).trackable);
    }

    #[test]
    fn test_classify_override_wins() {
        let source = Trackable::from_signal(signal(7));
        assert!(!classify(&source, Some(false), true).trackable);
        assert!(classify(&source, Some(true), false).trackable);
    }

    #[test]
    fn test_classify_getter() {
        let source: Trackable<i32> = Trackable::getter(|| Some(1));
        let decision = classify(&source, None, true);
        assert!(decision.trackable);
        assert!(decision.is_accessor);
        assert!(!decision.is_async_accessor);
    }

    #[test]
    fn test_classify_async_accessor_never_trackable() {
        let source: Trackable<i32> = Trackable::async_getter(|deliver| deliver(Some(1)));
        // Even with an explicit override the watcher must not be installed.
        let decision = classify(&source, Some(true), true);
        assert!(!decision.trackable);
        assert!(decision.is_accessor);
        assert!(decision.is_async_accessor);
    }

    #[test]
    fn test_read_synchronous_sources() {
        let seen: Rc<RefCell<Vec<Option<i32>>>> = Rc::new(RefCell::new(Vec::new()));

        for source in [
            Trackable::value(1),
            Trackable::from_signal(signal(2)),
            Trackable::getter(|| Some(3)),
            Trackable::getter(|| None),
        ] {
            let seen_inner = seen.clone();
            source.read(Box::new(move |value| seen_inner.borrow_mut().push(value)));
        }

        assert_eq!(*seen.borrow(), vec![Some(1), Some(2), Some(3), None]);
    }

    #[test]
    fn test_read_async_getter_delivers_later() {
        reset_scheduler();
        let source: Trackable<i32> = Trackable::async_getter(|deliver| {
            defer_one_step(move || deliver(Some(42)));
        });

        let seen = Rc::new(Cell::new(None));
        let seen_inner = seen.clone();
        source.read(Box::new(move |value| seen_inner.set(value)));

        assert_eq!(seen.get(), None);
        run_until_idle();
        assert_eq!(seen.get(), Some(42));
    }

    #[test]
    fn test_watch_signal_skips_initial_run() {
        let input = signal(1);
        let source = Trackable::from_signal(input.clone());

        let fires = Rc::new(Cell::new(0u32));
        let fires_inner = fires.clone();
        let stop = source.watch(move || fires_inner.set(fires_inner.get() + 1));

        assert_eq!(fires.get(), 0);
        input.set(2);
        assert_eq!(fires.get(), 1);
        input.set(2); // unchanged value, no fire
        assert_eq!(fires.get(), 1);
        input.set(3);
        assert_eq!(fires.get(), 2);

        stop();
        input.set(4);
        assert_eq!(fires.get(), 2);
    }

    #[test]
    fn test_watch_getter_tracks_inner_signals() {
        let name = signal("Steve".to_string());
        let name_for_getter = name.clone();
        let source = Trackable::getter(move || Some(format!("Hello, {}!", name_for_getter.get())));

        let fires = Rc::new(Cell::new(0u32));
        let fires_inner = fires.clone();
        let _stop = source.watch(move || fires_inner.set(fires_inner.get() + 1));

        assert_eq!(fires.get(), 0);
        name.set("Bob".to_string());
        assert_eq!(fires.get(), 1);
    }

    #[test]
    fn test_watch_plain_value_is_noop() {
        let source = Trackable::value(5);
        let stop = source.watch(|| panic!("plain values never fire"));
        stop();
    }
}
