//! Composite request throttling
//!
//! A [`ThrottleComposer`] evaluates an ordered list of [`Throttle`]s. A request
//! is admitted only if every throttle admits it. Evaluation stops at the first
//! rejection, and counters are only consumed by requests that are admitted by
//! the whole set: limiters hand out a provisional [`Reservation`] which the
//! composer commits on full admission and which rolls back when dropped.

use crate::core::identity::{Caller, CallerKey};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Verdicts
// =============================================================================

/// Why a throttle rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// The working-hours gate is closed
    OutsideWorkingHours,

    /// The caller exhausted its request budget for the window
    RateExceeded,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionKind::OutsideWorkingHours => write!(f, "outside working hours"),
            RejectionKind::RateExceeded => write!(f, "rate exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleRejection {
    pub scope: String,
    pub kind: RejectionKind,
    pub retry_after: Option<Duration>,
}

/// Outcome of a single throttle check
#[derive(Debug)]
pub enum ThrottleVerdict {
    /// Admitted, possibly holding a provisional counter slot
    Admit(Option<Reservation>),
    Reject(ThrottleRejection),
}

type History = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// A provisional slot in a rate limiter's history.
///
/// Dropping an uncommitted reservation removes the slot again.
#[derive(Debug)]
pub struct Reservation {
    history: History,
    stamp: DateTime<Utc>,
    committed: bool,
}

impl Reservation {
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut history = lock(&self.history);
        if let Some(pos) = history.iter().rposition(|t| *t == self.stamp) {
            history.remove(pos);
        }
    }
}

/// A single limiter in a composed throttle set
pub trait Throttle: Send + Sync + fmt::Debug {
    /// Name reported in rejections
    fn scope(&self) -> &str;

    fn check(&self, caller: &Caller, now: DateTime<Utc>) -> ThrottleVerdict;
}

// =============================================================================
// Working-hours gate
// =============================================================================

/// Admits requests only while the local hour of day is inside the window
///
/// The window is `[open_from, open_until)` in hours, wrapping past midnight
/// when `open_from > open_until`. Equal bounds keep the gate always open.
#[derive(Debug, Clone)]
pub struct TimeWindowGate {
    open_from: u32,
    open_until: u32,
    offset: FixedOffset,
}

impl TimeWindowGate {
    pub const SCOPE: &'static str = "working_hours";

    pub fn new(open_from: u32, open_until: u32, offset: FixedOffset) -> Self {
        Self {
            open_from: open_from % 24,
            open_until: open_until % 24,
            offset,
        }
    }

    pub fn is_open_at_hour(&self, hour: u32) -> bool {
        if self.open_from == self.open_until {
            true
        } else if self.open_from < self.open_until {
            (self.open_from..self.open_until).contains(&hour)
        } else {
            hour >= self.open_from || hour < self.open_until
        }
    }
}

impl Throttle for TimeWindowGate {
    fn scope(&self) -> &str {
        Self::SCOPE
    }

    fn check(&self, _caller: &Caller, now: DateTime<Utc>) -> ThrottleVerdict {
        let hour = now.with_timezone(&self.offset).hour();
        if self.is_open_at_hour(hour) {
            ThrottleVerdict::Admit(None)
        } else {
            ThrottleVerdict::Reject(ThrottleRejection {
                scope: Self::SCOPE.to_string(),
                kind: RejectionKind::OutsideWorkingHours,
                retry_after: None,
            })
        }
    }
}

// =============================================================================
// Scoped rate limiter
// =============================================================================

/// Error parsing a `"<n>/<period>"` rate
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateParseError {
    #[error("rate '{0}' must look like '<requests>/<period>'")]
    Format(String),

    #[error("invalid request count in rate '{0}'")]
    Count(String),

    #[error("unknown period in rate '{0}' (expected s, m, h or d)")]
    Period(String),
}

/// Maximum number of requests per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub num_requests: usize,
    pub window: Duration,
}

impl Rate {
    pub fn new(num_requests: usize, window: Duration) -> Self {
        Self {
            num_requests,
            window,
        }
    }
}

impl FromStr for Rate {
    type Err = RateParseError;

    /// Parses `1/minute`, `10/s`, `1000/day`: only the first letter of the period counts
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s
            .split_once('/')
            .ok_or_else(|| RateParseError::Format(s.to_string()))?;
        let num_requests = count
            .trim()
            .parse::<usize>()
            .map_err(|_| RateParseError::Count(s.to_string()))?;
        let seconds = match period.trim().chars().next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 3_600,
            Some('d') => 86_400,
            _ => return Err(RateParseError::Period(s.to_string())),
        };
        Ok(Rate::new(num_requests, Duration::from_secs(seconds)))
    }
}

/// Which callers a rate limiter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    AnonymousOnly,
}

/// Number of tracked keys below which a store never prunes
const PRUNE_FLOOR: usize = 1024;

#[derive(Debug)]
struct Histories {
    by_key: HashMap<(String, CallerKey), History>,
    prune_at: usize,
}

impl Default for Histories {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            prune_at: PRUNE_FLOOR,
        }
    }
}

/// Shared request histories keyed by (scope, caller key)
///
/// Once the number of tracked keys reaches a threshold, adding a key first
/// prunes the keys of the same scope whose history has fully expired. The
/// threshold then doubles relative to the surviving keys.
#[derive(Debug, Clone, Default)]
pub struct RateStore {
    histories: Arc<Mutex<Histories>>,
}

impl RateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn history(&self, scope: &str, key: CallerKey, cutoff: Option<DateTime<Utc>>) -> History {
        let mut histories = lock(&self.histories);
        let entry = (scope.to_string(), key);
        if let Some(history) = histories.by_key.get(&entry) {
            return history.clone();
        }

        if histories.by_key.len() >= histories.prune_at {
            if let Some(cutoff) = cutoff {
                let removed = prune_scope(&mut histories.by_key, scope, cutoff);
                tracing::debug!(scope, removed, "pruned expired rate histories");
            }
            histories.prune_at = (histories.by_key.len() * 2).max(PRUNE_FLOOR);
        }

        histories.by_key.entry(entry).or_default().clone()
    }

    /// Drop every history of `scope` with no request after `cutoff`.
    ///
    /// Histories held by an in-flight check or reservation are kept. Returns
    /// the number of keys removed.
    pub fn prune_expired(&self, scope: &str, cutoff: DateTime<Utc>) -> usize {
        let mut histories = lock(&self.histories);
        prune_scope(&mut histories.by_key, scope, cutoff)
    }

    /// Number of (scope, caller key) histories currently tracked
    pub fn tracked(&self) -> usize {
        lock(&self.histories).by_key.len()
    }

    /// Number of requests currently counted for a key (expired entries included
    /// until the next check evicts them)
    pub fn recorded(&self, scope: &str, key: &CallerKey) -> usize {
        let histories = lock(&self.histories);
        histories
            .by_key
            .get(&(scope.to_string(), key.clone()))
            .map(|h| lock(h).len())
            .unwrap_or(0)
    }
}

fn prune_scope(
    by_key: &mut HashMap<(String, CallerKey), History>,
    scope: &str,
    cutoff: DateTime<Utc>,
) -> usize {
    let before = by_key.len();
    by_key.retain(|(entry_scope, _), history| {
        if entry_scope != scope || Arc::strong_count(history) > 1 {
            return true;
        }
        let mut log = lock(history);
        while log.front().is_some_and(|t| *t <= cutoff) {
            log.pop_front();
        }
        !log.is_empty()
    });
    before - by_key.len()
}

/// Sliding-log limiter allowing `rate.num_requests` per `rate.window` for each
/// (scope, caller key)
#[derive(Debug, Clone)]
pub struct ScopedRateLimiter {
    scope: String,
    rate: Rate,
    audience: Audience,
    store: RateStore,
}

impl ScopedRateLimiter {
    pub fn new(scope: impl Into<String>, rate: Rate, store: RateStore) -> Self {
        Self {
            scope: scope.into(),
            rate,
            audience: Audience::Everyone,
            store,
        }
    }

    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }
}

impl Throttle for ScopedRateLimiter {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn check(&self, caller: &Caller, now: DateTime<Utc>) -> ThrottleVerdict {
        if self.audience == Audience::AnonymousOnly && caller.identity.is_authenticated() {
            return ThrottleVerdict::Admit(None);
        }

        let window = ChronoDuration::from_std(self.rate.window).unwrap_or(ChronoDuration::MAX);
        let cutoff = now.checked_sub_signed(window);
        let history = self.store.history(&self.scope, caller.key(), cutoff);
        let mut log = lock(&history);

        if let Some(cutoff) = cutoff {
            while log.front().is_some_and(|t| *t <= cutoff) {
                log.pop_front();
            }
        }

        if log.len() >= self.rate.num_requests {
            let retry_after = log
                .front()
                .and_then(|oldest| oldest.checked_add_signed(window))
                .and_then(|free_at| (free_at - now).to_std().ok())
                .unwrap_or(self.rate.window);
            return ThrottleVerdict::Reject(ThrottleRejection {
                scope: self.scope.clone(),
                kind: RejectionKind::RateExceeded,
                retry_after: Some(retry_after),
            });
        }

        log.push_back(now);
        drop(log);

        ThrottleVerdict::Admit(Some(Reservation {
            history,
            stamp: now,
            committed: false,
        }))
    }
}

// =============================================================================
// Composer
// =============================================================================

/// Ordered, conjunctive, short-circuiting set of throttles
#[derive(Debug, Clone, Default)]
pub struct ThrottleComposer {
    throttles: Vec<Arc<dyn Throttle>>,
}

impl ThrottleComposer {
    pub fn new(throttles: Vec<Arc<dyn Throttle>>) -> Self {
        Self { throttles }
    }

    pub fn with(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttles.push(throttle);
        self
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.throttles.iter().map(|t| t.scope()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.throttles.is_empty()
    }

    /// Admit or reject a request.
    ///
    /// Throttles are consulted in order; the first rejection ends the
    /// evaluation and releases every reservation taken so far.
    pub fn check(&self, caller: &Caller, now: DateTime<Utc>) -> Result<(), ThrottleRejection> {
        let mut held = Vec::new();

        for throttle in &self.throttles {
            match throttle.check(caller, now) {
                ThrottleVerdict::Admit(reservation) => held.extend(reservation),
                ThrottleVerdict::Reject(rejection) => return Err(rejection),
            }
        }

        held.into_iter().for_each(Reservation::commit);
        Ok(())
    }
}
