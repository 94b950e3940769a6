use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_DAYS: u32 = 30;
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub at: DateTime<Utc>,
    pub kind: String,
}

/// Owner activity: the most recent action plus a bounded history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactivityTracker {
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<ActivityRecord>,
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

fn default_history_days() -> u32 {
    DEFAULT_HISTORY_DAYS
}

impl InactivityTracker {
    pub fn new(now: DateTime<Utc>, history_days: u32) -> Self {
        Self {
            last_activity: now,
            history: Vec::new(),
            history_days: history_days.max(1),
        }
    }

    pub fn record(&mut self, now: DateTime<Utc>, kind: &str) {
        if now > self.last_activity {
            self.last_activity = now;
        }
        self.history.push(ActivityRecord {
            at: now,
            kind: kind.to_string(),
        });
        self.prune(now);
    }

    /// Forget all history and restart the idle clock at `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.history.clear();
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(i64::from(self.history_days));
        self.history.retain(|r| r.at >= cutoff);
    }

    /// Whole days since the last recorded activity. A clock that moved
    /// backwards counts as zero.
    pub fn days_inactive(&self, now: DateTime<Utc>) -> u32 {
        let secs = (now - self.last_activity).num_seconds();
        if secs <= 0 {
            return 0;
        }
        u32::try_from(secs / SECONDS_PER_DAY).unwrap_or(u32::MAX)
    }
}
