//! Sleep/cancellation: one root token per chorus, one child token per agent.
//! Cancelling the root puts every agent to sleep; cancelling a child puts one
//! agent to sleep. Cancellation is terminal and idempotent.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Hands out per-agent tokens derived from a single root.
pub struct SleepCoordinator {
    root: CancellationToken,
    asleep: AtomicU64,
}

impl SleepCoordinator {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            asleep: AtomicU64::new(0),
        }
    }

    /// Token for a newly created agent. Already cancelled if the chorus sleeps.
    pub fn agent_token(&self) -> SleepToken {
        SleepToken {
            token: self.root.child_token(),
        }
    }

    /// Put the whole chorus to sleep. Returns false if it already was.
    pub fn sleep_all(&self) -> bool {
        if self.root.is_cancelled() {
            return false;
        }
        self.root.cancel();
        self.asleep.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn is_asleep(&self) -> bool {
        self.root.is_cancelled()
    }

    /// How many times `sleep_all` took effect (0 or 1).
    pub fn sleep_count(&self) -> u64 {
        self.asleep.load(Ordering::SeqCst)
    }
}

impl Default for SleepCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One agent's view of the sleep signal.
#[derive(Clone)]
pub struct SleepToken {
    token: CancellationToken,
}

impl SleepToken {
    /// A token not tied to any chorus.
    pub fn standalone() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Cancel this agent. Safe to call any number of times.
    #[inline]
    pub fn sleep(&self) {
        self.token.cancel();
    }

    #[inline]
    pub fn is_asleep(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the agent is put to sleep.
    pub async fn asleep(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_sleep_reaches_every_agent() {
        let coordinator = SleepCoordinator::new();
        let a = coordinator.agent_token();
        let b = coordinator.agent_token();
        assert!(!a.is_asleep() && !b.is_asleep());
        assert!(coordinator.sleep_all());
        assert!(a.is_asleep() && b.is_asleep());
        assert!(!coordinator.sleep_all());
        assert_eq!(coordinator.sleep_count(), 1);
    }

    #[test]
    fn agent_sleep_is_local_and_idempotent() {
        let coordinator = SleepCoordinator::new();
        let a = coordinator.agent_token();
        let b = coordinator.agent_token();
        a.sleep();
        a.sleep();
        assert!(a.is_asleep());
        assert!(!b.is_asleep());
        assert!(!coordinator.is_asleep());
    }

    #[test]
    fn tokens_issued_after_sleep_start_asleep() {
        let coordinator = SleepCoordinator::new();
        coordinator.sleep_all();
        assert!(coordinator.agent_token().is_asleep());
    }
}
