//! Client façade - configuration, shared state, binding factories.
//!
//! One [`RpcClient`] owns the pieces every binding shares: the transport,
//! the execution registry, the connectivity signal, and the optional
//! reactive headers source. Binding factories validate procedure paths
//! against the configured [`ProcedureRegistry`] before constructing
//! anything, so misconfiguration surfaces at the call site as a `Result`,
//! never as a runtime fault mid-request.
//!
//! # Example
//!
//! ```ignore
//! use spark_rpc::{MethodKind, ProcedureOptions, ProcedureRegistry, RpcClient, RpcClientConfig};
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let client = RpcClient::new(RpcClientConfig {
//!     transport: Some(Rc::new(my_transport)),
//!     procedures: ProcedureRegistry::new()
//!         .with("greeting.hello", MethodKind::Query)
//!         .with("events.tail", MethodKind::Subscription),
//!     ..Default::default()
//! })?;
//!
//! let greeting = client.query(
//!     "greeting.hello",
//!     json!({"name": "Steve"}),
//!     ProcedureOptions { immediate: true, ..Default::default() },
//! )?;
//! ```

use std::rc::Rc;

use serde_json::Value;
use spark_signals::{signal, Signal};

use crate::error::RpcError;
use crate::executions::ExecutionRegistry;
use crate::procedure::{ProcedureBinding, ProcedureOptions};
use crate::procedures::{MethodKind, ProcedureRegistry};
use crate::subscription::{SubscriptionBinding, SubscriptionOptions};
use crate::tracking::Trackable;
use crate::transport::{CallKind, RpcTransport};

// =============================================================================
// Configuration
// =============================================================================

/// Client configuration.
///
/// `transport` is the only required field; omitting it is the single fatal
/// construction error.
#[derive(Default)]
pub struct RpcClientConfig {
    /// The wire client. Required.
    pub transport: Option<Rc<dyn RpcTransport>>,
    /// Every procedure this client may bind.
    pub procedures: ProcedureRegistry,
    /// Shared headers source. Changes re-trigger trackable bindings.
    pub headers: Option<Trackable<Value>>,
    /// Default answer of the reactivity classifier when a binding gives no
    /// explicit override. `None` means enabled.
    pub reactive: Option<bool>,
    /// Externally owned connectivity signal. When absent the client creates
    /// one (initially connected); transport glue writes it on open/close.
    pub connected: Option<Signal<bool>>,
}

// =============================================================================
// Client
// =============================================================================

/// The binding façade: shared state plus query/mutation/subscription
/// factories.
pub struct RpcClient {
    transport: Rc<dyn RpcTransport>,
    procedures: ProcedureRegistry,
    executions: ExecutionRegistry,
    connected: Signal<bool>,
    headers: Option<Trackable<Value>>,
    default_reactive: bool,
}

impl RpcClient {
    /// Build a client. Fails with [`RpcError::MissingTransport`] when no
    /// transport is configured.
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcError> {
        let transport = config.transport.ok_or(RpcError::MissingTransport)?;
        Ok(Self {
            transport,
            procedures: config.procedures,
            executions: ExecutionRegistry::new(),
            connected: config.connected.unwrap_or_else(|| signal(true)),
            headers: config.headers,
            default_reactive: config.reactive.unwrap_or(true),
        })
    }

    /// Bind a query.
    pub fn query(
        &self,
        path: &str,
        args: impl Into<Trackable<Value>>,
        options: ProcedureOptions,
    ) -> Result<ProcedureBinding, RpcError> {
        let path = self.procedures.resolve(path, MethodKind::Query)?;
        Ok(ProcedureBinding::new(
            CallKind::Read,
            path,
            args.into(),
            self.headers.clone(),
            options,
            self.transport.clone(),
            self.executions.clone(),
            self.default_reactive,
        ))
    }

    /// Bind a mutation.
    pub fn mutation(
        &self,
        path: &str,
        args: impl Into<Trackable<Value>>,
        options: ProcedureOptions,
    ) -> Result<ProcedureBinding, RpcError> {
        let path = self.procedures.resolve(path, MethodKind::Mutation)?;
        Ok(ProcedureBinding::new(
            CallKind::Write,
            path,
            args.into(),
            self.headers.clone(),
            options,
            self.transport.clone(),
            self.executions.clone(),
            self.default_reactive,
        ))
    }

    /// Bind a subscription.
    pub fn subscription(
        &self,
        path: &str,
        args: impl Into<Trackable<Value>>,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionBinding, RpcError> {
        let path = self.procedures.resolve(path, MethodKind::Subscription)?;
        Ok(SubscriptionBinding::new(
            path,
            args.into(),
            options,
            self.transport.clone(),
            self.connected.clone(),
            self.default_reactive,
        ))
    }

    /// True while any binding of this client has an execution in flight.
    /// Reactive read.
    pub fn is_executing(&self) -> bool {
        self.executions.is_busy()
    }

    /// Labels of in-flight executions, in start order. Reactive read.
    pub fn executions(&self) -> Vec<Option<String>> {
        self.executions.labels()
    }

    /// The shared execution registry.
    pub fn execution_registry(&self) -> ExecutionRegistry {
        self.executions.clone()
    }

    /// Current connectivity. Reactive read.
    pub fn connected(&self) -> bool {
        self.connected.get()
    }

    /// The connectivity signal; transport glue writes it on open/close.
    pub fn connected_signal(&self) -> Signal<bool> {
        self.connected.clone()
    }

    /// The underlying transport.
    pub fn transport(&self) -> Rc<dyn RpcTransport> {
        self.transport.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{reset_scheduler, run_until_idle};
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use spark_signals::effect;
    use std::cell::Cell;
    use std::rc::Rc;

    fn greeting_client(transport: Rc<MockTransport>) -> RpcClient {
        RpcClient::new(RpcClientConfig {
            transport: Some(transport),
            procedures: ProcedureRegistry::new()
                .with("greeting.hello", MethodKind::Query)
                .with("counter.increment", MethodKind::Mutation)
                .with("events.tail", MethodKind::Subscription),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_missing_transport_is_fatal() {
        let result = RpcClient::new(RpcClientConfig::default());
        assert!(matches!(result, Err(RpcError::MissingTransport)));
    }

    #[test]
    fn test_factories_validate_paths() {
        let client = greeting_client(MockTransport::new());

        assert!(matches!(
            client.query("nope.nothing", json!(null), ProcedureOptions::default()),
            Err(RpcError::UnknownProcedure(_))
        ));
        assert!(matches!(
            client.query("counter.increment", json!(null), ProcedureOptions::default()),
            Err(RpcError::KindMismatch { .. })
        ));
        assert!(matches!(
            client.subscription("greeting.hello", json!(null), SubscriptionOptions::default()),
            Err(RpcError::KindMismatch { .. })
        ));
        assert!(client
            .query("greeting.hello", json!(null), ProcedureOptions::default())
            .is_ok());
    }

    #[test]
    fn test_greeting_end_to_end() {
        reset_scheduler();
        let transport = MockTransport::new();
        transport.respond_with(|call| {
            let name = call.args["name"].as_str().unwrap_or("world");
            Ok(json!(format!("Hello, {name}!")))
        });
        let client = greeting_client(transport);

        let name = spark_signals::signal(json!({"name": "Steve"}));
        let greeting = client
            .query(
                "greeting.hello",
                name.clone(),
                ProcedureOptions {
                    immediate: true,
                    ..Default::default()
                },
            )
            .unwrap();

        run_until_idle();
        assert_eq!(greeting.data(), json!("Hello, Steve!"));

        name.set(json!({"name": "Bob"}));
        assert!(greeting.executing());
        run_until_idle();
        assert!(!greeting.executing());
        assert_eq!(greeting.data(), json!("Hello, Bob!"));
    }

    #[test]
    fn test_mutation_coalesces_to_one_registry_entry() {
        reset_scheduler();
        let client = greeting_client(MockTransport::new());
        let registry = client.execution_registry();

        // Count every record ever added to the active set.
        let additions = Rc::new(Cell::new(0usize));
        let mut last_active = 0usize;
        let additions_for_effect = additions.clone();
        let registry_for_effect = registry.clone();
        let _stop = effect(move || {
            let active = registry_for_effect.active_count();
            if active > last_active {
                additions_for_effect.set(additions_for_effect.get() + active - last_active);
            }
            last_active = active;
        });

        let increment = client
            .mutation(
                "counter.increment",
                json!(null),
                ProcedureOptions {
                    label: Some("increment".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        for _ in 0..10 {
            increment.execute();
        }
        assert!(client.is_executing());
        assert_eq!(client.executions(), vec![Some("increment".to_string())]);

        run_until_idle();
        assert_eq!(additions.get(), 1);
        assert!(!client.is_executing());
        assert!(client.executions().is_empty());
    }

    #[test]
    fn test_headers_retrigger_bindings() {
        reset_scheduler();
        let transport = MockTransport::new();
        let headers = spark_signals::signal(json!({"authorization": "a"}));
        let client = RpcClient::new(RpcClientConfig {
            transport: Some(transport.clone()),
            procedures: ProcedureRegistry::new().with("greeting.hello", MethodKind::Query),
            headers: Some(Trackable::from_signal(headers.clone())),
            ..Default::default()
        })
        .unwrap();

        let binding = client
            .query("greeting.hello", json!(null), ProcedureOptions::default())
            .unwrap();
        run_until_idle();
        assert_eq!(transport.call_count(), 0);

        headers.set(json!({"authorization": "b"}));
        run_until_idle();
        assert_eq!(transport.call_count(), 1);
        assert!(!binding.executing());
    }

    #[test]
    fn test_default_reactive_false_disables_watchers() {
        reset_scheduler();
        let transport = MockTransport::new();
        let args = spark_signals::signal(json!(1));
        let client = RpcClient::new(RpcClientConfig {
            transport: Some(transport.clone()),
            procedures: ProcedureRegistry::new().with("greeting.hello", MethodKind::Query),
            reactive: Some(false),
            ..Default::default()
        })
        .unwrap();

        let binding = client
            .query("greeting.hello", args.clone(), ProcedureOptions::default())
            .unwrap();
        args.set(json!(2));
        run_until_idle();
        assert_eq!(transport.call_count(), 0);

        // The per-call override re-enables tracking.
        let tracked = client
            .query(
                "greeting.hello",
                args.clone(),
                ProcedureOptions {
                    reactive: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        args.set(json!(3));
        run_until_idle();
        assert_eq!(transport.call_count(), 1);
        drop((binding, tracked));
    }

    #[test]
    fn test_connected_signal_shared_with_subscriptions() {
        reset_scheduler();
        let transport = MockTransport::new();
        let client = greeting_client(transport.clone());
        assert!(client.connected());

        let tail = client
            .subscription("events.tail", json!(null), SubscriptionOptions::default())
            .unwrap();
        tail.subscribe();
        assert_eq!(transport.subscription_count(), 1);

        client.connected_signal().set(false);
        assert!(!client.connected());
        assert!(!tail.subscribed());

        client.connected_signal().set(true);
        assert!(tail.subscribed());
        assert_eq!(transport.subscription_count(), 2);
    }
}
