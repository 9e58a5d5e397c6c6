//! Per-requester accounting: search throttling and the concurrent task
//! ceiling. One instance is shared behind an `Arc` by the task registry and
//! the inbound handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::domain::chat::RequesterId;

/// Concurrent long-running operations allowed per requester.
pub const MAX_TASKS_PER_REQUESTER: usize = 3;

/// Recorded requests between sweeps of expired requester state.
const PRUNE_EVERY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatePolicy {
    pub short_window: Duration,
    pub short_limit: usize,
    pub short_ban: Duration,
    pub long_limit: usize,
    pub long_ban: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            short_window: Duration::from_secs(10),
            short_limit: 5,
            short_ban: Duration::from_secs(60),
            long_limit: 20,
            long_ban: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestVerdict {
    Allowed,
    Banned { retry_after: Duration },
}

#[derive(Debug, Default)]
struct RateState {
    recent: VecDeque<Instant>,
    ban_until: Option<Instant>,
    in_flight: usize,
}

impl RateState {
    fn is_idle(&self) -> bool {
        self.recent.is_empty() && self.ban_until.is_none() && self.in_flight == 0
    }

    /// Drops the history once its newest entry has left the short window.
    fn expire_window(&mut self, now: Instant, window: Duration) {
        let stale =
            self.recent.back().is_some_and(|last| now.saturating_duration_since(*last) > window);
        if stale {
            self.recent.clear();
        }
    }

    fn active_ban(&mut self, now: Instant) -> Option<Duration> {
        match self.ban_until {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                self.ban_until = None;
                None
            }
            None => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RequesterLimits {
    policy: RatePolicy,
    states: Mutex<HashMap<RequesterId, RateState>>,
    recorded: AtomicUsize,
}

impl RequesterLimits {
    pub fn new(policy: RatePolicy) -> Self {
        Self { policy, states: Mutex::new(HashMap::new()), recorded: AtomicUsize::new(0) }
    }

    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    pub fn record_request(&self, requester: &RequesterId) -> RequestVerdict {
        self.record_request_at(requester, Instant::now())
    }

    /// Records one request. A requester under an active ban is refused and the
    /// request is not counted. The request that trips a ban is still allowed.
    pub fn record_request_at(&self, requester: &RequesterId, now: Instant) -> RequestVerdict {
        let policy = self.policy;
        let mut states = self.states.lock();
        if (self.recorded.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            Self::retain_live(&mut states, now, policy.short_window);
        }
        let state = states.entry(requester.clone()).or_default();

        if let Some(retry_after) = state.active_ban(now) {
            return RequestVerdict::Banned { retry_after };
        }

        // A quiet gap resets the burst.
        state.expire_window(now, policy.short_window);
        state.recent.push_back(now);

        let in_short_window = state
            .recent
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= policy.short_window)
            .count();

        let ban = if in_short_window > policy.short_limit {
            Some(policy.short_ban)
        } else if state.recent.len() > policy.long_limit {
            Some(policy.long_ban)
        } else {
            None
        };

        if let Some(ban) = ban {
            state.recent.clear();
            state.ban_until = Some(now + ban);
            info!(
                event_name = "limits.requester.banned",
                correlation_id = %requester,
                requester_id = %requester,
                ban_secs = ban.as_secs(),
                "requester exceeded request rate"
            );
        }

        RequestVerdict::Allowed
    }

    pub fn ban_remaining(&self, requester: &RequesterId) -> Option<Duration> {
        self.ban_remaining_at(requester, Instant::now())
    }

    /// Remaining ban time. Expired bans are dropped on observation.
    pub fn ban_remaining_at(&self, requester: &RequesterId, now: Instant) -> Option<Duration> {
        let mut states = self.states.lock();
        let state = states.get_mut(requester)?;
        let remaining = state.active_ban(now);
        state.expire_window(now, self.policy.short_window);
        if state.is_idle() {
            states.remove(requester);
        }
        remaining
    }

    pub fn in_flight(&self, requester: &RequesterId) -> usize {
        self.states.lock().get(requester).map(|state| state.in_flight).unwrap_or_default()
    }

    pub fn hit_limits(&self, requester: &RequesterId) -> bool {
        self.in_flight(requester) >= MAX_TASKS_PER_REQUESTER
    }

    /// Removes every requester whose window and ban have both expired and
    /// who has no task in flight. Returns the number removed.
    pub fn prune_expired(&self, now: Instant) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        Self::retain_live(&mut states, now, self.policy.short_window);
        before - states.len()
    }

    fn retain_live(states: &mut HashMap<RequesterId, RateState>, now: Instant, window: Duration) {
        states.retain(|_, state| {
            state.active_ban(now);
            state.expire_window(now, window);
            !state.is_idle()
        });
    }

    /// Number of requesters with any live accounting state.
    pub fn tracked_requesters(&self) -> usize {
        self.states.lock().len()
    }

    pub(crate) fn try_acquire_task_slot(&self, requester: &RequesterId) -> bool {
        let mut states = self.states.lock();
        let state = states.entry(requester.clone()).or_default();
        if state.in_flight >= MAX_TASKS_PER_REQUESTER {
            return false;
        }
        state.in_flight += 1;
        true
    }

    pub(crate) fn release_task_slot(&self, requester: &RequesterId) {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(requester) else {
            return;
        };
        state.in_flight = state.in_flight.saturating_sub(1);
        let now = Instant::now();
        state.active_ban(now);
        state.expire_window(now, self.policy.short_window);
        if state.is_idle() {
            states.remove(requester);
        }
    }
}
