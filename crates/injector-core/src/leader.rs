//! Leader signal and the outbound write gate.

use std::sync::Arc;

use tokio::sync::watch;

use crate::state::StateContainer;

/// Leader-election boolean consumed from an external elector.
#[derive(Debug, Clone)]
pub struct LeaderSignal {
    rx: watch::Receiver<bool>,
}

impl LeaderSignal {
    /// Wraps a receiver fed by the elector.
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Signal fixed at `leader`.
    pub fn fixed(leader: bool) -> Self {
        let (_tx, rx) = watch::channel(leader);
        Self { rx }
    }

    /// Current leadership
    pub fn is_leader(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the next leadership change and returns the new value.
    ///
    /// Returns `None` once the elector is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Creates a leader signal together with the sender driving it.
pub fn leader_channel(initial: bool) -> (watch::Sender<bool>, LeaderSignal) {
    let (tx, rx) = watch::channel(initial);
    (tx, LeaderSignal::new(rx))
}

/// Decides whether outbound mutating calls may be issued.
///
/// Writes require leadership and a settled state container.
#[derive(Debug, Clone)]
pub struct WriteGate {
    leader: LeaderSignal,
    state: Arc<StateContainer>,
}

impl WriteGate {
    /// Combines `leader` with the settling window of `state`.
    pub fn new(leader: LeaderSignal, state: Arc<StateContainer>) -> Self {
        Self { leader, state }
    }

    /// True when both leadership and settling allow writes
    pub fn allows_writes(&self) -> bool {
        self.leader.is_leader() && self.state.has_settled()
    }
}
