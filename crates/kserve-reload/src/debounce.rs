//! Reload debouncing.
//!
//! Build tools often produce several filesystem events for one logical edit
//! (write, rename, metadata touch). The scheduler collapses such a burst into a
//! single reload once the files have been quiet for the cool-down period.

use std::time::Duration;

use tokio::time::Instant;

/// Default quiet period before a reload is broadcast.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(250);

/// Scheduled broadcast state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingReload {
    Idle,
    Armed { deadline: Instant },
}

/// Single-timer debounce state machine.
///
/// `notify_change` arms the timer or pushes its deadline back; [`fired`] resolves
/// once the deadline passes and returns the scheduler to idle. The owner runs
/// the broadcast when `fired` resolves.
///
/// [`fired`]: DebounceScheduler::fired
#[derive(Debug)]
pub struct DebounceScheduler {
    cooldown: Duration,
    state: PendingReload,
}

impl DebounceScheduler {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: PendingReload::Idle,
        }
    }

    /// Record a change, (re)starting the cool-down window from now.
    pub fn notify_change(&mut self) {
        self.state = PendingReload::Armed {
            deadline: Instant::now() + self.cooldown,
        };
    }

    /// Disarm without firing.
    pub fn cancel(&mut self) {
        self.state = PendingReload::Idle;
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, PendingReload::Armed { .. })
    }

    /// Deadline of the pending reload, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            PendingReload::Idle => None,
            PendingReload::Armed { deadline } => Some(deadline),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Wait until the armed deadline passes, then disarm.
    ///
    /// Never resolves while idle. Cancel safe: dropping the future before it
    /// completes leaves the scheduler untouched, so it can sit in a
    /// `tokio::select!` loop that re-polls it with the current deadline.
    pub async fn fired(&mut self) {
        match self.state {
            PendingReload::Idle => std::future::pending::<()>().await,
            PendingReload::Armed { deadline } => {
                tokio::time::sleep_until(deadline).await;
                self.state = PendingReload::Idle;
            }
        }
    }
}

impl Default for DebounceScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
