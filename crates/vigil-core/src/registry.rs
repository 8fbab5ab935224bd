//! The single owner of recognition state.
//!
//! A [`Registry`] holds the identity store, the unknown pool, the escalation
//! scheduler, the access log and the notification feed. Every mutating
//! method takes `&mut self`, so a caller that owns the registry in one place
//! (a dedicated thread, or behind one lock) gets the match, cluster, decide
//! and append sequence for one observation as a single atomic step.

use crate::access_log::{AccessEvent, AccessLog, DEFAULT_ACCESS_LOG_CAPACITY};
use crate::cluster::{ClusterPolicy, ObservationCluster, UnknownPool, GROUPING_THRESHOLD};
use crate::enrollment::{self, EnrollError, EnrollSource, EnrollTarget};
use crate::escalation::{EscalationScheduler, NotifyDecision, DEFAULT_COOLDOWN};
use crate::matcher::{EuclideanMatcher, Matcher, ACCEPTANCE_THRESHOLD};
use crate::notify::{Alert, Notification, NotificationFeed, NotificationKind, DEFAULT_FEED_CAPACITY};
use crate::store::{IdentityStore, StoreError};
use crate::types::{
    CaptureContext, ClusterId, EnrolledIdentity, FaceDescriptor, ImageRef, MatchResult, ObservationId,
    UnrecognizedObservation,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Tunables for a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrySettings {
    pub acceptance_threshold: f32,
    pub grouping_threshold: f32,
    pub cooldown: Duration,
    pub cluster_policy: ClusterPolicy,
    pub access_log_capacity: usize,
    pub notification_capacity: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            acceptance_threshold: ACCEPTANCE_THRESHOLD,
            grouping_threshold: GROUPING_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            cluster_policy: ClusterPolicy::default(),
            access_log_capacity: DEFAULT_ACCESS_LOG_CAPACITY,
            notification_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl RegistrySettings {
    /// True when unknown faces would group at a similarity that would
    /// already count as a recognition.
    pub fn grouping_not_stricter(&self) -> bool {
        self.grouping_threshold <= self.acceptance_threshold
    }
}

/// Everything one observation produced inside the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    pub result: MatchResult,
    pub access_event_id: Uuid,
    /// Present when the face was not recognized.
    pub observation_id: Option<ObservationId>,
    pub cluster_id: Option<ClusterId>,
    pub is_new_cluster: bool,
    pub decision: Option<NotifyDecision>,
    /// Alert to dispatch; present only when the decision notifies.
    pub alert: Option<Alert>,
}

/// One unresolved observation as shown for admin review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationSummary {
    pub id: ObservationId,
    pub captured_at: DateTime<Utc>,
    pub location: String,
    pub device_id: String,
    pub confidence: f32,
    pub image_ref: ImageRef,
}

impl From<&UnrecognizedObservation> for ObservationSummary {
    fn from(o: &UnrecognizedObservation) -> Self {
        Self {
            id: o.id,
            captured_at: o.captured_at,
            location: o.location.clone(),
            device_id: o.device_id.clone(),
            confidence: o.descriptor.confidence,
            image_ref: o.image_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: ClusterId,
    pub members: Vec<ObservationSummary>,
    pub total_attempts: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Distinct locations in arrival order.
    pub locations: Vec<String>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl From<&ObservationCluster> for ClusterSummary {
    fn from(c: &ObservationCluster) -> Self {
        let members: Vec<ObservationSummary> = c.members().iter().map(ObservationSummary::from).collect();
        let mut seen = HashSet::new();
        let locations = c
            .members()
            .iter()
            .filter(|m| seen.insert(m.location.as_str()))
            .map(|m| m.location.clone())
            .collect();
        let first_seen = c.members().iter().map(|m| m.captured_at).min().unwrap_or(c.created_at());
        let last_seen = c.members().iter().map(|m| m.captured_at).max().unwrap_or(c.created_at());
        Self {
            cluster_id: c.id(),
            total_attempts: members.len(),
            members,
            first_seen,
            last_seen,
            locations,
            last_notified_at: c.last_notified_at(),
        }
    }
}

/// The admin review listing of the unknown pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedReport {
    /// Creation order.
    pub clusters: Vec<ClusterSummary>,
    /// Observations that could not be clustered.
    pub individual_observations: Vec<ObservationSummary>,
    pub total_unrecognized: usize,
    pub total_clusters: usize,
}

/// Counters for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub identities: usize,
    pub active_identities: usize,
    pub unresolved_observations: usize,
    pub open_clusters: usize,
    pub access_events: usize,
    pub unread_notifications: usize,
}

pub struct Registry {
    identities: Box<dyn IdentityStore>,
    matcher: Box<dyn Matcher>,
    pool: UnknownPool,
    scheduler: EscalationScheduler,
    access_log: AccessLog,
    feed: NotificationFeed,
    acceptance_threshold: f32,
}

impl Registry {
    pub fn new(identities: Box<dyn IdentityStore>, settings: RegistrySettings) -> Self {
        Self::with_matcher(identities, Box::new(EuclideanMatcher), settings)
    }

    pub fn with_matcher(
        identities: Box<dyn IdentityStore>,
        matcher: Box<dyn Matcher>,
        settings: RegistrySettings,
    ) -> Self {
        if settings.grouping_not_stricter() {
            tracing::warn!(
                grouping = settings.grouping_threshold,
                acceptance = settings.acceptance_threshold,
                "grouping threshold is not stricter than acceptance threshold"
            );
        }
        Self {
            identities,
            matcher,
            pool: UnknownPool::new(settings.grouping_threshold, settings.cluster_policy),
            scheduler: EscalationScheduler::new(settings.cooldown),
            access_log: AccessLog::new(settings.access_log_capacity),
            feed: NotificationFeed::new(settings.notification_capacity),
            acceptance_threshold: settings.acceptance_threshold,
        }
    }

    /// Pure query: match a descriptor against active identities.
    pub fn match_descriptor(&self, descriptor: &FaceDescriptor) -> Result<MatchResult, StoreError> {
        let candidates = self.identities.active_identities()?;
        Ok(self
            .matcher
            .best_match(descriptor, &candidates, self.acceptance_threshold))
    }

    /// Record one extracted descriptor: match it, and if unmatched cluster
    /// it, decide escalation, and queue the in-app notification.
    ///
    /// The only fallible step is the identity read, which happens before
    /// any mutation.
    pub fn observe(
        &mut self,
        descriptor: FaceDescriptor,
        context: CaptureContext,
    ) -> Result<DetectionOutcome, StoreError> {
        let result = self.match_descriptor(&descriptor)?;

        let event = AccessEvent::from_match(
            &result,
            context.captured_at,
            &context.location,
            &context.device_id,
            &context.image_ref,
        );
        let access_event_id = event.id;

        if result.recognized {
            self.access_log.record(event);
            tracing::info!(
                identity = ?result.identity_id,
                confidence = result.confidence,
                location = %context.location,
                "access granted"
            );
            return Ok(DetectionOutcome {
                result,
                access_event_id,
                observation_id: None,
                cluster_id: None,
                is_new_cluster: false,
                decision: None,
                alert: None,
            });
        }

        let now = context.captured_at;
        let observation = UnrecognizedObservation {
            id: Uuid::new_v4(),
            descriptor,
            image_ref: context.image_ref,
            captured_at: now,
            location: context.location,
            device_id: context.device_id,
            cluster_id: None,
        };
        let assignment = self.pool.assign(observation);

        let (decision, alert) = match assignment.cluster_id.and_then(|id| self.pool.cluster_mut(&id)) {
            Some(cluster) => {
                let decision = self
                    .scheduler
                    .on_observation_assigned(cluster, assignment.is_new_cluster, now);
                let alert = cluster
                    .latest_member()
                    .and_then(|latest| Alert::for_decision(decision, latest, cluster.len()));
                (decision, alert)
            }
            None => {
                let decision = NotifyDecision::FirstSighting;
                let alert = self
                    .pool
                    .observation(&assignment.observation_id)
                    .and_then(|o| Alert::for_decision(decision, o, 1));
                (decision, alert)
            }
        };

        if let Some(alert) = &alert {
            self.feed
                .push(NotificationKind::UnauthorizedAccess, alert.summary(), now);
        }
        self.access_log.record(event);

        tracing::info!(
            observation = %assignment.observation_id,
            cluster = ?assignment.cluster_id,
            new_cluster = assignment.is_new_cluster,
            notify = decision.should_notify(),
            best = result.confidence,
            "unrecognized face"
        );

        Ok(DetectionOutcome {
            result,
            access_event_id,
            observation_id: Some(assignment.observation_id),
            cluster_id: assignment.cluster_id,
            is_new_cluster: assignment.is_new_cluster,
            decision: Some(decision),
            alert,
        })
    }

    pub fn enroll(
        &mut self,
        source: EnrollSource,
        target: EnrollTarget,
    ) -> Result<EnrolledIdentity, EnrollError> {
        enrollment::enroll(self.identities.as_mut(), &mut self.pool, source, target)
    }

    pub fn list_unresolved(&self) -> UnresolvedReport {
        UnresolvedReport {
            clusters: self.pool.clusters().iter().map(ClusterSummary::from).collect(),
            individual_observations: self
                .pool
                .individuals()
                .iter()
                .map(ObservationSummary::from)
                .collect(),
            total_unrecognized: self.pool.len(),
            total_clusters: self.pool.clusters().len(),
        }
    }

    pub fn pool(&self) -> &UnknownPool {
        &self.pool
    }

    pub fn identities(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        self.identities.list()
    }

    /// Reflect an external user-status change.
    pub fn set_identity_active(&mut self, id: &str, active: bool) -> Result<bool, StoreError> {
        self.identities.set_active(id, active)
    }

    pub fn access_events(&self, limit: usize, identity_id: Option<&str>) -> Vec<AccessEvent> {
        match identity_id {
            Some(id) => {
                let mut events = self.access_log.for_identity(id);
                events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                events.truncate(limit);
                events
            }
            None => self.access_log.recent(limit),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.feed.all()
    }

    pub fn mark_notification_read(&mut self, id: &Uuid) -> bool {
        self.feed.mark_read(id)
    }

    pub fn stats(&self) -> Result<RegistryStats, StoreError> {
        let identities = self.identities.list()?;
        Ok(RegistryStats {
            identities: identities.len(),
            active_identities: identities.iter().filter(|i| i.active).count(),
            unresolved_observations: self.pool.len(),
            open_clusters: self.pool.clusters().len(),
            access_events: self.access_log.len(),
            unread_notifications: self.feed.unread_count(),
        })
    }
}
