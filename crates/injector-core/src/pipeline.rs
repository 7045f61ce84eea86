//! Reaction pipeline loops.
//!
//! State changes flow from the state container channel through the dispatch
//! table into the merge engine, which emits deferred reactions; a tick loop
//! flushes merge windows, and a reaction loop broadcasts deferred reactions to
//! the reconcilers. Every loop stops when the shutdown signal flips.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::dispatch::{DispatchTable, NotificationHandler};
use crate::error::CoreError;
use crate::leader::LeaderSignal;
use crate::merge::{DeferredReaction, MergeEngine};
use crate::state::{StateContainer, StateModified};

/// Resolves once shutdown is requested or its sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Feeds state changes into the merge engine.
#[derive(Debug)]
pub struct StateModifiedMerger {
    merge: Arc<MergeEngine>,
    reactions: UnboundedSender<DeferredReaction>,
}

impl StateModifiedMerger {
    /// Creates a merger emitting on `reactions`.
    pub fn new(merge: Arc<MergeEngine>, reactions: UnboundedSender<DeferredReaction>) -> Self {
        Self { merge, reactions }
    }
}

#[async_trait]
impl NotificationHandler<StateModified> for StateModifiedMerger {
    fn name(&self) -> &'static str {
        "state-modified-merger"
    }

    async fn handle(&self, notification: &StateModified) -> Result<(), CoreError> {
        debug!("State modified: {}", notification.identity);
        if let Some(reaction) = self.merge.on_state_modified() {
            self.reactions
                .send(reaction)
                .map_err(|_| CoreError::Dispatch("reaction channel closed".to_string()))?;
        }
        Ok(())
    }
}

/// Publishes every state change until shutdown.
pub async fn run_state_events(
    mut events: UnboundedReceiver<StateModified>,
    dispatch: Arc<DispatchTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            event = events.recv() => match event {
                Some(event) => {
                    dispatch.publish_state_modified(&event).await;
                }
                None => break,
            },
        }
    }
    info!("State event loop stopped");
}

/// Ticks the merge engine and reacts to settling and leadership gains.
pub async fn run_ticks(
    merge: Arc<MergeEngine>,
    state: Arc<StateContainer>,
    mut leader: LeaderSignal,
    tick_interval: Duration,
    reactions: UnboundedSender<DeferredReaction>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut settled = state.has_settled();
    let mut leader_open = true;

    loop {
        let reaction = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                let flushed = merge.on_tick();
                if !settled && state.has_settled() {
                    settled = true;
                    info!("State settled, reconciling");
                    Some(flushed.unwrap_or(DeferredReaction { merged_count: 0 }))
                } else {
                    flushed
                }
            }
            change = leader.changed(), if leader_open => match change {
                Some(true) => {
                    info!("Became leader, reconciling");
                    Some(DeferredReaction { merged_count: 0 })
                }
                Some(false) => {
                    info!("Lost leadership");
                    None
                }
                None => {
                    leader_open = false;
                    None
                }
            },
        };

        if let Some(reaction) = reaction
            && reactions.send(reaction).is_err()
        {
            break;
        }
    }
    info!("Tick loop stopped");
}

/// Broadcasts deferred reactions until shutdown.
///
/// Reactions queued behind a running one are folded into a single pass.
pub async fn run_reactions(
    mut reactions: UnboundedReceiver<DeferredReaction>,
    dispatch: Arc<DispatchTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            reaction = reactions.recv() => match reaction {
                Some(mut reaction) => {
                    while let Ok(queued) = reactions.try_recv() {
                        reaction.merged_count += queued.merged_count + 1;
                    }
                    dispatch.publish_deferred_reaction(&reaction).await;
                }
                None => break,
            },
        }
    }
    info!("Reaction loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{RequestHandler, ResolveInjection, ResolvedInjection};
    use crate::resources::Resource;
    use crate::testing;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u32>>);

    #[async_trait]
    impl NotificationHandler<DeferredReaction> for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&self, notification: &DeferredReaction) -> Result<(), CoreError> {
            self.0.lock().unwrap().push(notification.merged_count);
            Ok(())
        }
    }

    struct Unused;

    #[async_trait]
    impl RequestHandler<ResolveInjection> for Unused {
        type Response = Option<ResolvedInjection>;

        fn name(&self) -> &'static str {
            "unused"
        }

        async fn handle(&self, _request: &ResolveInjection) -> Result<Self::Response, CoreError> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_reacts_twice() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reactions_tx, reactions_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = Arc::new(StateContainer::new(Duration::ZERO, Some(events_tx)));
        let merge = Arc::new(MergeEngine::new(Duration::from_secs(2)));
        let recorder = Arc::new(Recorder::default());
        let dispatch = Arc::new(
            DispatchTable::builder()
                .on_state_modified(Arc::new(StateModifiedMerger::new(
                    Arc::clone(&merge),
                    reactions_tx.clone(),
                )))
                .on_deferred_reaction(recorder.clone())
                .handle_resolve_injection(Arc::new(Unused))
                .build()
                .unwrap(),
        );

        let handles = vec![
            tokio::spawn(run_state_events(events_rx, Arc::clone(&dispatch), shutdown_rx.clone())),
            tokio::spawn(run_ticks(
                Arc::clone(&merge),
                Arc::clone(&state),
                LeaderSignal::fixed(true),
                Duration::from_secs(1),
                reactions_tx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_reactions(reactions_rx, Arc::clone(&dispatch), shutdown_rx)),
        ];

        testing::upsert(&state, Resource::Namespace(testing::namespace("a", &[])));
        sleep(Duration::from_millis(500)).await;
        testing::upsert(&state, Resource::Namespace(testing::namespace("b", &[])));
        sleep(Duration::from_millis(700)).await;
        testing::upsert(&state, Resource::Namespace(testing::namespace("c", &[])));
        sleep(Duration::from_millis(1500)).await;

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*recorder.0.lock().unwrap(), vec![0, 2]);
    }
}
