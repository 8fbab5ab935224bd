//! Online clustering of unrecognized observations.
//!
//! The [`UnknownPool`] owns every observation that failed to match an
//! enrolled identity. Observations with a comparable encoding are grouped
//! into [`ObservationCluster`]s by similarity to each cluster's
//! representative encoding; observations without one are kept individually.

use crate::similarity::similarity_or_zero;
use crate::types::{ClusterId, ObservationId, UnrecognizedObservation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Minimum similarity for an observation to join an existing cluster.
///
/// Stricter than the acceptance threshold: merging two strangers into one
/// alert is worse than a slightly fragmented unknown pool.
pub const GROUPING_THRESHOLD: f32 = 0.85;

/// How an observation picks among several clusters above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterPolicy {
    /// Join the earliest-created qualifying cluster.
    #[default]
    FirstMatch,
    /// Join the most similar qualifying cluster; ties keep the earliest.
    BestMatch,
}

impl FromStr for ClusterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first_match" => Ok(Self::FirstMatch),
            "best" | "best_match" => Ok(Self::BestMatch),
            other => Err(format!("unknown cluster policy: {other}")),
        }
    }
}

/// A group of observations believed to be the same unidentified person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationCluster {
    id: ClusterId,
    /// Arrival order.
    members: Vec<UnrecognizedObservation>,
    /// Encoding of the first member; fixed for the cluster's lifetime.
    representative: Vec<f32>,
    created_at: DateTime<Utc>,
    pub(crate) last_notified_at: Option<DateTime<Utc>>,
}

impl ObservationCluster {
    fn new(first: UnrecognizedObservation) -> Self {
        Self {
            id: Uuid::new_v4(),
            representative: first.descriptor.encoding.clone(),
            created_at: first.captured_at,
            members: vec![first],
            last_notified_at: None,
        }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn members(&self) -> &[UnrecognizedObservation] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn representative_encoding(&self) -> &[f32] {
        &self.representative
    }

    /// The first member, whose encoding is the representative.
    pub fn representative_member(&self) -> Option<&UnrecognizedObservation> {
        self.members.first()
    }

    pub fn latest_member(&self) -> Option<&UnrecognizedObservation> {
        self.members.last()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_notified_at(&self) -> Option<DateTime<Utc>> {
        self.last_notified_at
    }
}

/// Outcome of placing an observation in the unknown pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub observation_id: ObservationId,
    /// `None` when the observation has no comparable encoding.
    pub cluster_id: Option<ClusterId>,
    pub is_new_cluster: bool,
}

/// An observation taken out of the pool by enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedObservation {
    pub observation: UnrecognizedObservation,
    /// True when removal emptied and deleted the observation's cluster.
    pub cluster_deleted: bool,
}

/// Owned store of unresolved observations and their clusters.
#[derive(Debug, Clone)]
pub struct UnknownPool {
    /// Creation order.
    clusters: Vec<ObservationCluster>,
    individuals: Vec<UnrecognizedObservation>,
    index: HashMap<ObservationId, Option<ClusterId>>,
    threshold: f32,
    policy: ClusterPolicy,
}

impl Default for UnknownPool {
    fn default() -> Self {
        Self::new(GROUPING_THRESHOLD, ClusterPolicy::default())
    }
}

impl UnknownPool {
    pub fn new(threshold: f32, policy: ClusterPolicy) -> Self {
        Self {
            clusters: Vec::new(),
            individuals: Vec::new(),
            index: HashMap::new(),
            threshold,
            policy,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn policy(&self) -> ClusterPolicy {
        self.policy
    }

    /// Index of the cluster an encoding would join under the pool's policy.
    fn find_cluster(&self, encoding: &[f32]) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, cluster) in self.clusters.iter().enumerate() {
            let sim = similarity_or_zero(encoding, &cluster.representative, &cluster.id);
            if sim <= self.threshold {
                continue;
            }
            match self.policy {
                ClusterPolicy::FirstMatch => return Some(i),
                ClusterPolicy::BestMatch => {
                    if best.map_or(true, |(_, b)| sim > b) {
                        best = Some((i, sim));
                    }
                }
            }
        }
        best.map(|(i, _)| i)
    }

    /// Place an observation: join a qualifying cluster, start a new one, or
    /// keep it individually when it has no comparable encoding.
    ///
    /// Any `cluster_id` on the incoming observation is overwritten.
    pub fn assign(&mut self, mut observation: UnrecognizedObservation) -> Assignment {
        let observation_id = observation.id;

        if !observation.descriptor.is_comparable() {
            observation.cluster_id = None;
            self.index.insert(observation_id, None);
            self.individuals.push(observation);
            return Assignment {
                observation_id,
                cluster_id: None,
                is_new_cluster: false,
            };
        }

        if let Some(idx) = self.find_cluster(&observation.descriptor.encoding) {
            let cluster = &mut self.clusters[idx];
            observation.cluster_id = Some(cluster.id);
            cluster.members.push(observation);
            self.index.insert(observation_id, Some(cluster.id));
            tracing::debug!(cluster = %cluster.id, size = cluster.len(), "observation joined cluster");
            return Assignment {
                observation_id,
                cluster_id: Some(cluster.id),
                is_new_cluster: false,
            };
        }

        let mut cluster = ObservationCluster::new(observation);
        let cluster_id = cluster.id;
        cluster.members[0].cluster_id = Some(cluster_id);
        self.clusters.push(cluster);
        self.index.insert(observation_id, Some(cluster_id));
        tracing::info!(cluster = %cluster_id, "new unknown-face cluster");
        Assignment {
            observation_id,
            cluster_id: Some(cluster_id),
            is_new_cluster: true,
        }
    }

    pub fn contains(&self, id: &ObservationId) -> bool {
        self.index.contains_key(id)
    }

    pub fn observation(&self, id: &ObservationId) -> Option<&UnrecognizedObservation> {
        match self.index.get(id)? {
            Some(cluster_id) => self
                .cluster(cluster_id)?
                .members
                .iter()
                .find(|m| m.id == *id),
            None => self.individuals.iter().find(|o| o.id == *id),
        }
    }

    pub fn cluster(&self, id: &ClusterId) -> Option<&ObservationCluster> {
        self.clusters.iter().find(|c| c.id == *id)
    }

    pub(crate) fn cluster_mut(&mut self, id: &ClusterId) -> Option<&mut ObservationCluster> {
        self.clusters.iter_mut().find(|c| c.id == *id)
    }

    /// Remove one observation; deletes its cluster if it becomes empty.
    ///
    /// Sibling members of the same cluster stay unresolved.
    pub fn remove_observation(&mut self, id: &ObservationId) -> Option<RemovedObservation> {
        let cluster_id = self.index.remove(id)?;
        match cluster_id {
            None => {
                let pos = self.individuals.iter().position(|o| o.id == *id)?;
                Some(RemovedObservation {
                    observation: self.individuals.remove(pos),
                    cluster_deleted: false,
                })
            }
            Some(cluster_id) => {
                let cluster_pos = self.clusters.iter().position(|c| c.id == cluster_id)?;
                let cluster = &mut self.clusters[cluster_pos];
                let member_pos = cluster.members.iter().position(|m| m.id == *id)?;
                let observation = cluster.members.remove(member_pos);
                let cluster_deleted = cluster.members.is_empty();
                if cluster_deleted {
                    self.clusters.remove(cluster_pos);
                    tracing::info!(cluster = %cluster_id, "cluster emptied and removed");
                }
                Some(RemovedObservation {
                    observation,
                    cluster_deleted,
                })
            }
        }
    }

    pub fn clusters(&self) -> &[ObservationCluster] {
        &self.clusters
    }

    pub fn individuals(&self) -> &[UnrecognizedObservation] {
        &self.individuals
    }

    /// Total number of unresolved observations.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
