//! Rate gate shared by every call to the identity service.
//!
//! Callers pass through the gate one at a time, in ticket order. The gate
//! holds them back while a backoff window is open or while the rolling
//! request budget is spent; held callers sleep on the async timer and are
//! released FIFO once the window reopens. A caller that was rate limited
//! re-enters with its old ticket and goes ahead of later arrivals.

use std::collections::{BTreeSet, VecDeque};
use std::pin::pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

/// Rate gate settings.
#[derive(Debug, Clone)]
pub struct RateGateConfig {
    /// Requests allowed per rolling window.
    pub limit: usize,
    pub window: Duration,
    /// First backoff after a rate-limit signal.
    pub backoff_seed: Duration,
    /// Backoff ceiling.
    pub backoff_max: Duration,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            limit: 600,
            window: Duration::from_secs(600),
            backoff_seed: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

/// A caller's place in the gate queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
struct GateState {
    /// Start times of requests inside the rolling window.
    recent: VecDeque<Instant>,
    blocked_until: Option<Instant>,
    /// Current backoff step; `None` when not backing off.
    backoff: Option<Duration>,
    next_ticket: u64,
    /// Tickets of waiting callers; the smallest goes next.
    waiting: BTreeSet<u64>,
}

impl GateState {
    /// Either take a slot now (returns `None`) or report when to retry.
    fn try_take(&mut self, now: Instant, config: &RateGateConfig) -> Option<Instant> {
        if let Some(until) = self.blocked_until {
            if until > now {
                return Some(until);
            }
            self.blocked_until = None;
        }

        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) >= config.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        if self.recent.len() >= config.limit {
            return self.recent.front().map(|front| *front + config.window);
        }

        self.recent.push_back(now);
        None
    }
}

/// Removes a ticket from the queue when its caller passes or gives up.
struct Leave<'a> {
    gate: &'a RateGate,
    ticket: Ticket,
}

impl Drop for Leave<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().waiting.remove(&self.ticket.0);
        self.gate.changed.notify_waiters();
    }
}

/// FIFO rate gate with exponential backoff.
#[derive(Debug)]
pub struct RateGate {
    config: RateGateConfig,
    state: Mutex<GateState>,
    /// Signalled whenever the queue changes.
    changed: Notify,
}

impl RateGate {
    pub fn new(config: RateGateConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GateState::default()),
            changed: Notify::new(),
        }
    }

    /// Wait for permission to make one outbound request.
    ///
    /// The returned ticket can be handed to [`RateGate::reacquire`] if the
    /// request is rate limited.
    pub async fn acquire(&self) -> Ticket {
        let ticket = {
            let mut state = self.state.lock();
            let ticket = Ticket(state.next_ticket);
            state.next_ticket += 1;
            ticket
        };
        self.wait_turn(ticket).await;
        ticket
    }

    /// Wait again with an earlier ticket, ahead of everyone who arrived
    /// after it.
    pub async fn reacquire(&self, ticket: Ticket) {
        self.wait_turn(ticket).await;
    }

    async fn wait_turn(&self, ticket: Ticket) {
        self.state.lock().waiting.insert(ticket.0);
        self.changed.notify_waiters();
        let _leave = Leave { gate: self, ticket };

        loop {
            let mut changed = pin!(self.changed.notified());
            changed.as_mut().enable();

            let retry_at = {
                let mut state = self.state.lock();
                if state.waiting.first() != Some(&ticket.0) {
                    None
                } else {
                    match state.try_take(Instant::now(), &self.config) {
                        None => return,
                        Some(at) => Some(at),
                    }
                }
            };

            match retry_at {
                Some(at) => {
                    debug!("Rate gate closed, waiting {:?}", at.saturating_duration_since(Instant::now()));
                    tokio::select! {
                        _ = sleep_until(at) => {}
                        _ = changed.as_mut() => {}
                    }
                }
                None => changed.await,
            }
        }
    }

    /// Record a rate-limit signal from upstream and open a backoff window.
    ///
    /// Repeated signals while backing off double the window up to the ceiling.
    pub fn trip(&self) {
        let mut state = self.state.lock();
        let backoff = match state.backoff {
            None => self.config.backoff_seed,
            Some(current) => (current * 2).min(self.config.backoff_max),
        };
        state.backoff = Some(backoff);

        let until = Instant::now() + backoff;
        state.blocked_until = Some(state.blocked_until.map_or(until, |existing| existing.max(until)));

        warn!("Identity service rate limited us, backing off for {:?}", backoff);
    }

    /// Record a successful exchange; the next trip starts from the seed again.
    pub fn relax(&self) {
        self.state.lock().backoff = None;
    }

    /// Remaining backoff window, if any.
    pub fn blocked_for(&self) -> Option<Duration> {
        let state = self.state.lock();
        let now = Instant::now();
        state
            .blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.state.lock().waiting.len()
    }
}
