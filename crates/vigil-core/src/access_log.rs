use crate::types::{ImageRef, MatchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

pub const DEFAULT_ACCESS_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Granted,
    Denied,
}

/// One access decision made at a terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub id: Uuid,
    pub identity_id: Option<String>,
    pub identity_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: AccessStatus,
    pub location: String,
    pub device_id: String,
    pub confidence: f32,
    pub image_ref: ImageRef,
}

impl AccessEvent {
    pub fn from_match(
        result: &MatchResult,
        timestamp: DateTime<Utc>,
        location: &str,
        device_id: &str,
        image_ref: &ImageRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id: result.identity_id.clone(),
            identity_name: result.identity_name.clone(),
            timestamp,
            status: if result.recognized {
                AccessStatus::Granted
            } else {
                AccessStatus::Denied
            },
            location: location.to_string(),
            device_id: device_id.to_string(),
            confidence: result.confidence,
            image_ref: image_ref.clone(),
        }
    }
}

/// Bounded in-memory access history; the oldest events are dropped first.
#[derive(Debug, Clone)]
pub struct AccessLog {
    capacity: usize,
    events: VecDeque<AccessEvent>,
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACCESS_LOG_CAPACITY)
    }
}

impl AccessLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::new(),
        }
    }

    pub fn record(&mut self, event: AccessEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AccessEvent> {
        let mut events: Vec<AccessEvent> = self.events.iter().cloned().collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events
    }

    pub fn for_identity(&self, identity_id: &str) -> Vec<AccessEvent> {
        self.events
            .iter()
            .filter(|e| e.identity_id.as_deref() == Some(identity_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
