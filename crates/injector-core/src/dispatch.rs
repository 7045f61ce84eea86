//! Typed dispatch table.
//!
//! Two mechanisms, built once at startup:
//! - notifications are broadcast to every registered handler; a failing or
//!   panicking handler is logged and reported without affecting the others
//! - requests are answered by exactly one handler; the builder refuses a table
//!   where that does not hold

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::error::CoreError;
use crate::merge::DeferredReaction;
use crate::readiness::ReadyInjector;
use crate::resources::ResourceIdentity;
use crate::state::StateModified;
use crate::telemetry::TelemetrySender;

/// Handler of a broadcast notification.
#[async_trait]
pub trait NotificationHandler<N>: Send + Sync
where
    N: Send + Sync + 'static,
{
    /// Name used in logs and telemetry
    fn name(&self) -> &'static str;

    /// Reacts to `notification`.
    async fn handle(&self, notification: &N) -> Result<(), CoreError>;
}

/// Handler answering a request.
#[async_trait]
pub trait RequestHandler<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    /// Response type
    type Response: Send;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Answers `request`.
    async fn handle(&self, request: &R) -> Result<Self::Response, CoreError>;
}

/// Asks which injector applies to a workload.
#[derive(Debug, Clone)]
pub struct ResolveInjection {
    /// Workload identity
    pub workload: ResourceIdentity,
}

/// Injector chosen for a workload, with its dependency hash.
#[derive(Debug, Clone)]
pub struct ResolvedInjection {
    /// Injector and its resolved dependencies
    pub ready: ReadyInjector,
    /// Dependency graph hash
    pub hash: String,
}

type ResolveInjectionHandler =
    dyn RequestHandler<ResolveInjection, Response = Option<ResolvedInjection>>;

/// Broadcast list for one notification type.
pub struct Notifications<N>
where
    N: Send + Sync + 'static,
{
    handlers: Vec<Arc<dyn NotificationHandler<N>>>,
    telemetry: Option<TelemetrySender>,
}

impl<N> fmt::Debug for Notifications<N>
where
    N: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifications")
            .field("handlers", &handler_names(&self.handlers))
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

fn handler_names<N>(handlers: &[Arc<dyn NotificationHandler<N>>]) -> Vec<&'static str>
where
    N: Send + Sync + 'static,
{
    handlers.iter().map(|handler| handler.name()).collect()
}

impl<N> Notifications<N>
where
    N: Send + Sync + 'static,
{
    fn new(
        handlers: Vec<Arc<dyn NotificationHandler<N>>>,
        telemetry: Option<TelemetrySender>,
    ) -> Self {
        Self { handlers, telemetry }
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Delivers `notification` to every handler in registration order.
    ///
    /// Returns the number of handlers that failed.
    pub async fn publish(&self, notification: &N) -> usize {
        let mut failures = 0;
        for handler in &self.handlers {
            let outcome = AssertUnwindSafe(handler.handle(notification))
                .catch_unwind()
                .await
                .unwrap_or(Err(CoreError::HandlerPanicked(handler.name())));

            if let Err(e) = outcome {
                failures += 1;
                error!("Handler {} failed: {}", handler.name(), e);
                if let Some(telemetry) = &self.telemetry {
                    telemetry.report_error(handler.name(), &e);
                }
            }
        }
        failures
    }
}

/// Dispatch table of the controller.
pub struct DispatchTable {
    state_modified: Notifications<StateModified>,
    deferred_reaction: Notifications<DeferredReaction>,
    resolve_injection: Arc<ResolveInjectionHandler>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("state_modified", &self.state_modified)
            .field("deferred_reaction", &self.deferred_reaction)
            .field("resolve_injection", &self.resolve_injection.name())
            .finish()
    }
}

impl DispatchTable {
    /// Starts a builder.
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// Broadcasts a state change.
    pub async fn publish_state_modified(&self, notification: &StateModified) -> usize {
        self.state_modified.publish(notification).await
    }

    /// Broadcasts a deferred reaction.
    pub async fn publish_deferred_reaction(&self, notification: &DeferredReaction) -> usize {
        self.deferred_reaction.publish(notification).await
    }

    /// Sends a `ResolveInjection` request to its handler.
    pub async fn resolve_injection(
        &self,
        request: &ResolveInjection,
    ) -> Result<Option<ResolvedInjection>, CoreError> {
        debug!(
            "Resolving injection for {} via {}",
            request.workload,
            self.resolve_injection.name()
        );
        self.resolve_injection.handle(request).await
    }
}

/// Collects handlers and validates request cardinality.
#[derive(Default)]
pub struct DispatchTableBuilder {
    state_modified: Vec<Arc<dyn NotificationHandler<StateModified>>>,
    deferred_reaction: Vec<Arc<dyn NotificationHandler<DeferredReaction>>>,
    resolve_injection: Vec<Arc<ResolveInjectionHandler>>,
    telemetry: Option<TelemetrySender>,
}

impl fmt::Debug for DispatchTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolvers: Vec<_> = self.resolve_injection.iter().map(|h| h.name()).collect();
        f.debug_struct("DispatchTableBuilder")
            .field("state_modified", &handler_names(&self.state_modified))
            .field("deferred_reaction", &handler_names(&self.deferred_reaction))
            .field("resolve_injection", &resolvers)
            .finish()
    }
}

impl DispatchTableBuilder {
    /// Registers a `StateModified` handler.
    pub fn on_state_modified(
        mut self,
        handler: Arc<dyn NotificationHandler<StateModified>>,
    ) -> Self {
        self.state_modified.push(handler);
        self
    }

    /// Registers a `DeferredReaction` handler.
    pub fn on_deferred_reaction(
        mut self,
        handler: Arc<dyn NotificationHandler<DeferredReaction>>,
    ) -> Self {
        self.deferred_reaction.push(handler);
        self
    }

    /// Registers the `ResolveInjection` handler.
    pub fn handle_resolve_injection(mut self, handler: Arc<ResolveInjectionHandler>) -> Self {
        self.resolve_injection.push(handler);
        self
    }

    /// Sends handler failures to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: TelemetrySender) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the table. Fails unless every request type has exactly one handler.
    pub fn build(mut self) -> Result<DispatchTable, CoreError> {
        if self.resolve_injection.len() != 1 {
            return Err(CoreError::Dispatch(format!(
                "ResolveInjection needs exactly one handler, found {}",
                self.resolve_injection.len()
            )));
        }
        let resolve_injection = self
            .resolve_injection
            .pop()
            .ok_or_else(|| CoreError::Dispatch("ResolveInjection handler missing".to_string()))?;

        Ok(DispatchTable {
            state_modified: Notifications::new(self.state_modified, self.telemetry.clone()),
            deferred_reaction: Notifications::new(self.deferred_reaction, self.telemetry),
            resolve_injection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::telemetry_channel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl NotificationHandler<DeferredReaction> for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _notification: &DeferredReaction) -> Result<(), CoreError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl NotificationHandler<DeferredReaction> for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _notification: &DeferredReaction) -> Result<(), CoreError> {
            Err(CoreError::Write("boom".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl NotificationHandler<DeferredReaction> for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn handle(&self, _notification: &DeferredReaction) -> Result<(), CoreError> {
            panic!("handler bug");
        }
    }

    struct NoInjection;

    #[async_trait]
    impl RequestHandler<ResolveInjection> for NoInjection {
        type Response = Option<ResolvedInjection>;

        fn name(&self) -> &'static str {
            "no-injection"
        }

        async fn handle(&self, _request: &ResolveInjection) -> Result<Self::Response, CoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_handlers() {
        let count = Arc::new(AtomicUsize::new(0));
        let (telemetry, mut reports) = telemetry_channel(8);
        let table = DispatchTable::builder()
            .on_deferred_reaction(Arc::new(Failing))
            .on_deferred_reaction(Arc::new(Panicking))
            .on_deferred_reaction(Arc::new(Counting(Arc::clone(&count))))
            .handle_resolve_injection(Arc::new(NoInjection))
            .with_telemetry(telemetry)
            .build()
            .unwrap();

        let failures = table
            .publish_deferred_reaction(&DeferredReaction { merged_count: 0 })
            .await;
        assert_eq!(failures, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(reports.recv().await.unwrap().source, "failing");
        assert_eq!(reports.recv().await.unwrap().source, "panicking");
    }

    #[test]
    fn test_request_needs_exactly_one_handler() {
        assert!(matches!(
            DispatchTable::builder().build(),
            Err(CoreError::Dispatch(_))
        ));
        assert!(matches!(
            DispatchTable::builder()
                .handle_resolve_injection(Arc::new(NoInjection))
                .handle_resolve_injection(Arc::new(NoInjection))
                .build(),
            Err(CoreError::Dispatch(_))
        ));
    }

    #[tokio::test]
    async fn test_request_reaches_its_handler() {
        let table = DispatchTable::builder()
            .handle_resolve_injection(Arc::new(NoInjection))
            .build()
            .unwrap();
        let request = ResolveInjection {
            workload: ResourceIdentity::namespaced(
                crate::ResourceKind::Deployment,
                "default",
                "web",
            ),
        };
        assert!(table.resolve_injection(&request).await.unwrap().is_none());
    }

    #[test]
    fn test_debug_lists_handler_names() {
        let table = DispatchTable::builder()
            .on_deferred_reaction(Arc::new(Failing))
            .handle_resolve_injection(Arc::new(NoInjection))
            .build()
            .unwrap();

        let rendered = format!("{:?}", table);
        assert!(rendered.contains("\"failing\""));
        assert!(rendered.contains("\"no-injection\""));
    }
}
