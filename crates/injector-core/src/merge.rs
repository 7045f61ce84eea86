//! Event merge (debounce) engine.
//!
//! Coalesces bursts of state changes into single deferred reactions. The
//! first change reacts immediately and opens a merge window; changes inside
//! the window are counted; the window is flushed by whichever comes first
//! after its deadline, a tick or another change.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Coalesced reaction signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredReaction {
    /// Number of changes absorbed by the window this reaction flushes
    pub merged_count: u32,
}

#[derive(Debug)]
struct MergeWindow {
    deadline: Instant,
    merged_count: u32,
}

/// Debounce state machine guarded by a single lock.
#[derive(Debug)]
pub struct MergeEngine {
    interval: Duration,
    window: Mutex<Option<MergeWindow>>,
}

impl MergeEngine {
    /// Creates an engine merging changes over `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window: Mutex::new(None),
        }
    }

    /// Records a state change.
    pub fn on_state_modified(&self) -> Option<DeferredReaction> {
        self.step(false)
    }

    /// Advances the clock without a change.
    pub fn on_tick(&self) -> Option<DeferredReaction> {
        self.step(true)
    }

    /// Whether a merge window is open
    pub fn has_open_window(&self) -> bool {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn step(&self, is_tick: bool) -> Option<DeferredReaction> {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);

        match window.as_mut() {
            None if is_tick => None,
            None => {
                *window = Some(MergeWindow {
                    deadline: now + self.interval,
                    merged_count: 0,
                });
                Some(DeferredReaction { merged_count: 0 })
            }
            Some(active) if now < active.deadline => {
                if !is_tick {
                    active.merged_count += 1;
                }
                None
            }
            Some(active) => {
                let merged_count = active.merged_count;
                if is_tick {
                    *window = None;
                    debug!("Merge window closed after {} merged changes", merged_count);
                    return (merged_count > 0).then_some(DeferredReaction { merged_count });
                }

                // a change after the deadline flushes the old window and opens the next
                *window = Some(MergeWindow {
                    deadline: now + self.interval,
                    merged_count: 0,
                });
                debug!("Merge window rolled over after {} merged changes", merged_count);
                Some(DeferredReaction { merged_count })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_burst_yields_single_flush() {
        let engine = MergeEngine::new(Duration::from_secs(2));

        // t=0: first change reacts immediately
        assert_eq!(
            engine.on_state_modified(),
            Some(DeferredReaction { merged_count: 0 })
        );

        advance(Duration::from_millis(500)).await;
        assert_eq!(engine.on_state_modified(), None);

        advance(Duration::from_millis(500)).await;
        assert_eq!(engine.on_tick(), None, "tick before deadline emits nothing");

        advance(Duration::from_millis(200)).await;
        assert_eq!(engine.on_state_modified(), None);

        advance(Duration::from_millis(800)).await;
        assert_eq!(engine.on_tick(), Some(DeferredReaction { merged_count: 2 }));

        advance(Duration::from_secs(1)).await;
        assert_eq!(engine.on_tick(), None);
        assert!(!engine.has_open_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_window_flushes_nothing() {
        let engine = MergeEngine::new(Duration::from_secs(2));
        assert!(engine.on_state_modified().is_some());

        advance(Duration::from_secs(3)).await;
        assert_eq!(engine.on_tick(), None);
        assert!(!engine.has_open_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_without_window_is_noop() {
        let engine = MergeEngine::new(Duration::from_secs(2));
        assert_eq!(engine.on_tick(), None);
        assert!(!engine.has_open_window());
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_after_deadline_rolls_window() {
        let engine = MergeEngine::new(Duration::from_secs(2));
        assert!(engine.on_state_modified().is_some());

        advance(Duration::from_secs(1)).await;
        assert_eq!(engine.on_state_modified(), None);

        advance(Duration::from_secs(2)).await;
        assert_eq!(
            engine.on_state_modified(),
            Some(DeferredReaction { merged_count: 1 })
        );
        assert!(engine.has_open_window());
    }
}
