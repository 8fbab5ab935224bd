//! Per-cluster alert debounce.

use crate::cluster::ObservationCluster;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Minimum time between two alerts for the same unknown cluster.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Whether an assigned observation escalates to an outbound alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum NotifyDecision {
    /// New cluster, or an observation that cannot be clustered.
    FirstSighting,
    /// Known cluster whose cooldown has elapsed.
    Repeat,
    /// Known cluster still inside its cooldown window.
    Suppressed { last_notified_at: DateTime<Utc> },
}

impl NotifyDecision {
    pub fn should_notify(&self) -> bool {
        !matches!(self, Self::Suppressed { .. })
    }
}

/// Decides, per cluster, whether a new member should trigger an alert.
#[derive(Debug, Clone, Copy)]
pub struct EscalationScheduler {
    cooldown: Duration,
}

impl Default for EscalationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl EscalationScheduler {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide for an observation just assigned to `cluster` at `now`.
    ///
    /// Stamps `last_notified_at = now` whenever the decision notifies.
    pub fn on_observation_assigned(
        &self,
        cluster: &mut ObservationCluster,
        is_new_cluster: bool,
        now: DateTime<Utc>,
    ) -> NotifyDecision {
        let decision = match (is_new_cluster, cluster.last_notified_at) {
            (true, _) | (false, None) => NotifyDecision::FirstSighting,
            (false, Some(last)) if self.cooldown_elapsed(last, now) => NotifyDecision::Repeat,
            (false, Some(last)) => NotifyDecision::Suppressed {
                last_notified_at: last,
            },
        };

        if decision.should_notify() {
            cluster.last_notified_at = Some(now);
        } else {
            tracing::debug!(cluster = %cluster.id(), size = cluster.len(), "alert suppressed by cooldown");
        }
        decision
    }

    fn cooldown_elapsed(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A clock that went backwards counts as still cooling down.
        now.signed_duration_since(last)
            .to_std()
            .map(|elapsed| elapsed > self.cooldown)
            .unwrap_or(false)
    }
}
