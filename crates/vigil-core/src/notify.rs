//! Alerts for unknown faces: message templates, the outbound transport
//! capability, and the in-app notification feed.

use crate::escalation::NotifyDecision;
use crate::types::{ClusterId, ObservationId, UnrecognizedObservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use uuid::Uuid;

/// A subject/body pair with `{{name}}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub id: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
}

pub const UNRECOGNIZED_FACE: Template = Template {
    id: "unrecognized_face",
    subject: "Security alert: unrecognized face",
    body: "An unrecognized face was detected by the access control system.\n\n\
           Location: {{location}}\n\
           Time: {{timestamp}}\n\
           Device: {{deviceId}}\n\
           Attempts: {{attempts}}\n\n\
           Review the captured image and manage this incident from the admin dashboard.",
};

pub const GROUPED_FACES: Template = Template {
    id: "grouped_faces",
    subject: "Repeated attempts by the same unrecognized person",
    body: "The same unrecognized person was detected {{attempts}} times.\n\n\
           Last location: {{location}}\n\
           Last attempt: {{timestamp}}\n\
           Device: {{deviceId}}\n\n\
           Review the admin dashboard for details.",
};

/// Substitute `{{name}}` placeholders. Unknown names and empty values are
/// left as written.
pub fn render(text: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        let is_word = !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_');
        match vars.iter().find(|(name, _)| is_word && *name == key) {
            Some((_, value)) if !value.is_empty() => out.push_str(value),
            _ => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FirstSighting,
    Repeat,
}

/// Outbound message describing an unknown-face escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub template: String,
    pub observation_id: ObservationId,
    pub cluster_id: Option<ClusterId>,
    /// Cluster size, or 1 for an unclustered observation.
    pub attempts: usize,
    pub location: String,
    pub device_id: String,
    pub captured_at: DateTime<Utc>,
    pub subject: String,
    pub body: String,
}

impl Alert {
    /// Build the alert for a notifying decision; `None` when suppressed.
    ///
    /// `latest` is the most recent member of the cluster (or the lone
    /// observation); `attempts` is the cluster size.
    pub fn for_decision(
        decision: NotifyDecision,
        latest: &UnrecognizedObservation,
        attempts: usize,
    ) -> Option<Self> {
        let (kind, template) = match decision {
            NotifyDecision::FirstSighting => (AlertKind::FirstSighting, UNRECOGNIZED_FACE),
            NotifyDecision::Repeat => (AlertKind::Repeat, GROUPED_FACES),
            NotifyDecision::Suppressed { .. } => return None,
        };
        let vars = [
            ("location", latest.location.clone()),
            ("timestamp", latest.captured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            ("deviceId", latest.device_id.clone()),
            ("attempts", attempts.to_string()),
        ];
        Some(Self {
            kind,
            template: template.id.to_string(),
            observation_id: latest.id,
            cluster_id: latest.cluster_id,
            attempts,
            location: latest.location.clone(),
            device_id: latest.device_id.clone(),
            captured_at: latest.captured_at,
            subject: render(template.subject, &vars),
            body: render(template.body, &vars),
        })
    }

    /// One-line summary used for the in-app feed.
    pub fn summary(&self) -> String {
        match self.kind {
            AlertKind::FirstSighting => format!("Unrecognized face detected at {}", self.location),
            AlertKind::Repeat => format!(
                "Unrecognized person detected {} times. Last location: {}",
                self.attempts, self.location
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport rejected alert: {0}")]
    Rejected(String),
    #[error("transport unreachable: {0}")]
    Unreachable(String),
}

/// Delivers alerts outside the process. Fire-and-forget for the pipeline.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert, recipients: &[String]) -> Result<(), TransportError>;
}

/// Writes alerts to the tracing log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert, recipients: &[String]) -> Result<(), TransportError> {
        tracing::info!(
            kind = ?alert.kind,
            cluster = ?alert.cluster_id,
            attempts = alert.attempts,
            location = %alert.location,
            recipients = ?recipients,
            subject = %alert.subject,
            "alert"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    UnauthorizedAccess,
}

/// An in-app notification shown on the admin dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

pub const DEFAULT_FEED_CAPACITY: usize = 500;

/// Bounded in-memory list of in-app notifications; the oldest are dropped
/// first, read or not.
#[derive(Debug, Clone)]
pub struct NotificationFeed {
    capacity: usize,
    items: VecDeque<Notification>,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, kind: NotificationKind, message: String, timestamp: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(Notification {
            id,
            kind,
            message,
            timestamp,
            read: false,
        });
        id
    }

    /// All notifications, newest first.
    pub fn all(&self) -> Vec<Notification> {
        let mut items: Vec<Notification> = self.items.iter().cloned().collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items
    }

    pub fn mark_read(&mut self, id: &Uuid) -> bool {
        match self.items.iter_mut().find(|n| n.id == *id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }
}
