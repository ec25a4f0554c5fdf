//! Daily quota accounting.
//!
//! YouTube charges every API call a fixed number of quota units against a
//! per-project daily budget that resets at midnight Pacific time. The ledger
//! tracks local usage so callers can back off before the server starts
//! rejecting requests.

use crate::config::QuotaConfig;
use crate::dispatch::Subscription;
use jiff::Timestamp;
use jiff::tz::TimeZone;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Quota units charged per API operation.
///
/// See: <https://developers.google.com/youtube/v3/determine_quota_cost>
pub fn cost_of(operation: &str) -> u64 {
    match operation {
        "liveChatMessages.list" | "liveChatMessages.streamList" => 5,
        "liveChatMessages.insert" | "liveChatMessages.delete" => 50,
        "liveChatBans.insert" | "liveChatBans.delete" => 50,
        "liveChatModerators.insert" | "liveChatModerators.delete" => 50,
        "liveChatModerators.list" => 50,
        _ => 1,
    }
}

/// Returns the current instant. Injected so tests can move time.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

type UsageListener = Arc<dyn Fn(QuotaUsage) + Send + Sync>;

/// A point-in-time view of the ledger, handed to usage listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u64,
    pub limit: u64,
    pub resets_at: Timestamp,
}

impl QuotaUsage {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

#[derive(Debug)]
struct LedgerState {
    used: u64,
    limit: u64,
    resets_at: Timestamp,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_id: BTreeMap<u64, UsageListener>,
}

/// Tracks quota units spent against a daily budget.
pub struct QuotaLedger {
    state: Mutex<LedgerState>,
    listeners: Arc<Mutex<Listeners>>,
    time_zone: TimeZone,
    clock: Clock,
}

impl fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("QuotaLedger")
            .field("used", &state.used)
            .field("limit", &state.limit)
            .field("resets_at", &state.resets_at)
            .field("time_zone", &self.time_zone.iana_name())
            .finish()
    }
}

impl QuotaLedger {
    /// Creates a ledger using the system clock.
    ///
    /// An unknown time zone name falls back to UTC.
    pub fn new(config: &QuotaConfig) -> Self {
        let time_zone = TimeZone::get(&config.reset_time_zone).unwrap_or_else(|e| {
            tracing::warn!(
                tz = %config.reset_time_zone,
                error = %e,
                "unknown quota reset time zone, using UTC"
            );
            TimeZone::UTC
        });
        Self::with_clock(config.daily_limit, time_zone, Arc::new(Timestamp::now))
    }

    pub fn with_clock(limit: u64, time_zone: TimeZone, clock: Clock) -> Self {
        let now = clock();
        let resets_at = next_midnight(now, &time_zone);
        Self {
            state: Mutex::new(LedgerState {
                used: 0,
                limit,
                resets_at,
            }),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            time_zone,
            clock,
        }
    }

    /// Records `cost` units of usage and returns the new total.
    pub fn add(&self, cost: u64) -> u64 {
        let snapshot = {
            let mut state = self.lock_state();
            self.roll_over(&mut state);
            state.used = state.used.saturating_add(cost);
            snapshot_of(&state)
        };
        tracing::trace!(cost, used = snapshot.used, limit = snapshot.limit, "quota charged");
        self.notify(snapshot);
        snapshot.used
    }

    /// Records the cost of `operation` per [`cost_of`].
    pub fn charge(&self, operation: &str) -> u64 {
        self.add(cost_of(operation))
    }

    pub fn remaining(&self) -> u64 {
        self.usage().remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        let usage = self.usage();
        usage.used >= usage.limit
    }

    /// Zeroes usage and schedules the next reset from now.
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            state.used = 0;
            state.resets_at = next_midnight((self.clock)(), &self.time_zone);
            snapshot_of(&state)
        };
        tracing::debug!(resets_at = %snapshot.resets_at, "quota reset");
        self.notify(snapshot);
    }

    /// Current usage, after applying any pending daily reset.
    pub fn usage(&self) -> QuotaUsage {
        let (snapshot, rolled) = {
            let mut state = self.lock_state();
            let rolled = self.roll_over(&mut state);
            (snapshot_of(&state), rolled)
        };
        if rolled {
            self.notify(snapshot);
        }
        snapshot
    }

    /// Registers a listener invoked after every change in usage.
    ///
    /// Listeners run on the mutating thread, after the ledger's lock has been
    /// released, so they may call back into the ledger.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(QuotaUsage) + Send + Sync + 'static,
    {
        let id = {
            let mut listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.by_id.insert(id, Arc::new(listener));
            id
        };

        let listeners: Weak<Mutex<Listeners>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .by_id
                    .remove(&id);
            }
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll_over(&self, state: &mut LedgerState) -> bool {
        let now = (self.clock)();
        if now < state.resets_at {
            return false;
        }
        tracing::debug!(
            used = state.used,
            resets_at = %state.resets_at,
            "daily quota window elapsed, resetting usage"
        );
        state.used = 0;
        state.resets_at = next_midnight(now, &self.time_zone);
        true
    }

    fn notify(&self, usage: QuotaUsage) {
        let listeners: Vec<UsageListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(usage);
        }
    }
}

fn snapshot_of(state: &LedgerState) -> QuotaUsage {
    QuotaUsage {
        used: state.used,
        limit: state.limit,
        resets_at: state.resets_at,
    }
}

/// The first midnight in `tz` strictly after `now`.
fn next_midnight(now: Timestamp, tz: &TimeZone) -> Timestamp {
    now.to_zoned(tz.clone())
        .tomorrow()
        .and_then(|tomorrow| tomorrow.start_of_day())
        .map(|midnight| midnight.timestamp())
        .unwrap_or(Timestamp::MAX)
}
