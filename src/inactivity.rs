// Vault Desktop - Inactivity Monitor
// Auto-lock after a configurable idle period

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Input signals that count as user activity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
}

/// Samples the activity clock against a threshold. Owned by the main window;
/// it fires at most once per arming.
#[derive(Debug)]
pub struct InactivityMonitor {
    threshold: Option<Duration>,
    last_activity: Instant,
    armed: bool,
}

impl InactivityMonitor {
    /// `threshold_secs == 0` disables the monitor
    pub fn new(threshold_secs: u64, now: Instant) -> Self {
        Self {
            threshold: threshold_from_secs(threshold_secs),
            last_activity: now,
            armed: false,
        }
    }

    pub fn threshold(&self) -> Option<Duration> {
        self.threshold
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Apply a new threshold; the idle period restarts from `now`
    pub fn configure(&mut self, threshold_secs: u64, now: Instant) {
        let threshold = threshold_from_secs(threshold_secs);
        if threshold != self.threshold {
            log::info!(
                "[Inactivity] Auto-lock {}",
                match threshold {
                    Some(t) => format!("after {}s", t.as_secs()),
                    None => "disabled".to_string(),
                }
            );
        }
        self.threshold = threshold;
        self.last_activity = now;
    }

    /// Start watching (session unlocked)
    pub fn arm(&mut self, now: Instant) {
        self.armed = true;
        self.last_activity = now;
    }

    /// Stop watching (session locked)
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn record(&mut self, _signal: ActivitySignal, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// One sample. Returns true exactly once when the idle time reaches the
    /// threshold, and disarms itself in the same step.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(threshold) = self.threshold else {
            return false;
        };
        if !self.armed || self.idle_for(now) < threshold {
            return false;
        }
        self.armed = false;
        log::info!(
            "[Inactivity] Idle for {}s, locking session",
            self.idle_for(now).as_secs()
        );
        true
    }
}

fn threshold_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
