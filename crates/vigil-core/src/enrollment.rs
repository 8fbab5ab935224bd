//! Promotion of an unrecognized observation into an enrolled identity.

use crate::cluster::UnknownPool;
use crate::store::{IdentityStore, StoreError};
use crate::types::{ClusterId, EnrolledIdentity, NewIdentity, ObservationId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("not in the unknown pool: {0}")]
    NotFound(String),
    #[error("invalid enrollment target: {0}")]
    InvalidTarget(String),
    #[error("identity store: {0}")]
    Store(#[from] StoreError),
}

/// Which unresolved face to enroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EnrollSource {
    Observation(ObservationId),
    /// The cluster's representative (first) member.
    Cluster(ClusterId),
}

/// Identity the face is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollTarget {
    Existing(String),
    New(NewIdentity),
}

impl EnrollTarget {
    /// Build a target from optional caller inputs; an existing id wins.
    pub fn from_parts(
        identity_id: Option<String>,
        new_identity: Option<NewIdentity>,
    ) -> Result<Self, EnrollError> {
        match (identity_id.filter(|id| !id.trim().is_empty()), new_identity) {
            (Some(id), _) => Ok(Self::Existing(id)),
            (None, Some(new)) => Ok(Self::New(new)),
            (None, None) => Err(EnrollError::InvalidTarget(
                "an existing identity id or new identity data is required".into(),
            )),
        }
    }
}

/// Bind an unresolved observation to an identity and retire it from the pool.
///
/// Nothing is mutated unless the observation and target both resolve. The
/// observation's cluster siblings are left unresolved; the cluster is
/// deleted only when this was its last member.
pub fn enroll(
    store: &mut dyn IdentityStore,
    pool: &mut UnknownPool,
    source: EnrollSource,
    target: EnrollTarget,
) -> Result<EnrolledIdentity, EnrollError> {
    let observation_id = match source {
        EnrollSource::Observation(id) => id,
        EnrollSource::Cluster(cluster_id) => pool
            .cluster(&cluster_id)
            .and_then(|c| c.representative_member())
            .map(|m| m.id)
            .ok_or_else(|| EnrollError::NotFound(format!("cluster {cluster_id}")))?,
    };

    let encoding = pool
        .observation(&observation_id)
        .map(|o| o.descriptor.encoding.clone())
        .ok_or_else(|| EnrollError::NotFound(format!("observation {observation_id}")))?;

    if encoding.is_empty() {
        tracing::warn!(observation = %observation_id, "enrolling an observation without an encoding; identity will not match locally");
    }

    let identity = match target {
        EnrollTarget::Existing(id) => {
            if store.get(&id)?.is_none() {
                return Err(EnrollError::InvalidTarget(format!("unknown identity {id}")));
            }
            store.set_encoding(&id, &encoding)?
        }
        EnrollTarget::New(new_identity) => {
            if new_identity.name.trim().is_empty() {
                return Err(EnrollError::InvalidTarget("new identity requires a name".into()));
            }
            store.create(&new_identity, &encoding)?
        }
    };

    let removed = pool
        .remove_observation(&observation_id)
        .ok_or_else(|| EnrollError::NotFound(format!("observation {observation_id}")))?;

    tracing::info!(
        observation = %observation_id,
        identity = %identity.id,
        name = %identity.name,
        cluster = ?removed.observation.cluster_id,
        cluster_deleted = removed.cluster_deleted,
        "face enrolled"
    );

    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Assignment;
    use crate::store::failing::FailingStore;
    use crate::store::MemoryIdentityStore;
    use crate::types::{FaceDescriptor, ImageRef, UnrecognizedObservation};
    use chrono::Utc;
    use uuid::Uuid;

    fn add(pool: &mut UnknownPool, encoding: Vec<f32>) -> Assignment {
        pool.assign(UnrecognizedObservation {
            id: Uuid::new_v4(),
            descriptor: FaceDescriptor::from_encoding(encoding),
            image_ref: ImageRef("img".into()),
            captured_at: Utc::now(),
            location: "Lobby".into(),
            device_id: "Terminal-001".into(),
            cluster_id: None,
        })
    }

    #[test]
    fn test_enroll_new_identity_deletes_singleton_cluster() {
        let mut store = MemoryIdentityStore::new();
        let mut pool = UnknownPool::default();
        let a = add(&mut pool, vec![0.3, 0.3]);

        let identity = enroll(
            &mut store,
            &mut pool,
            EnrollSource::Observation(a.observation_id),
            EnrollTarget::New(NewIdentity::named("Jane")),
        )
        .unwrap();

        assert_eq!(identity.name, "Jane");
        assert_eq!(identity.encoding, vec![0.3, 0.3]);
        assert!(pool.cluster(&a.cluster_id.unwrap()).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_enroll_twice_is_not_found() {
        let mut store = MemoryIdentityStore::new();
        let mut pool = UnknownPool::default();
        let a = add(&mut pool, vec![0.3]);
        let source = EnrollSource::Observation(a.observation_id);

        enroll(&mut store, &mut pool, source, EnrollTarget::New(NewIdentity::named("Jane"))).unwrap();
        let err = enroll(&mut store, &mut pool, source, EnrollTarget::New(NewIdentity::named("Jane")))
            .unwrap_err();
        assert!(matches!(err, EnrollError::NotFound(_)));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_enroll_existing_overwrites_encoding() {
        let mut store = MemoryIdentityStore::with_identities(vec![EnrolledIdentity::new("2", "Carlos", vec![9.0, 9.0])]);
        let mut pool = UnknownPool::default();
        let a = add(&mut pool, vec![0.1, 0.2]);

        let identity = enroll(
            &mut store,
            &mut pool,
            EnrollSource::Observation(a.observation_id),
            EnrollTarget::Existing("2".into()),
        )
        .unwrap();
        assert_eq!(identity.id, "2");
        assert_eq!(store.get("2").unwrap().unwrap().encoding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_unknown_existing_identity_leaves_pool_untouched() {
        let mut store = MemoryIdentityStore::new();
        let mut pool = UnknownPool::default();
        let a = add(&mut pool, vec![0.1]);

        let err = enroll(
            &mut store,
            &mut pool,
            EnrollSource::Observation(a.observation_id),
            EnrollTarget::Existing("ghost".into()),
        )
        .unwrap_err();
        assert!(matches!(err, EnrollError::InvalidTarget(_)));
        assert!(pool.contains(&a.observation_id));
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut store = MemoryIdentityStore::new();
        let mut pool = UnknownPool::default();
        let a = add(&mut pool, vec![0.1]);
        let err = enroll(
            &mut store,
            &mut pool,
            EnrollSource::Observation(a.observation_id),
            EnrollTarget::New(NewIdentity::named("  ")),
        )
        .unwrap_err();
        assert!(matches!(err, EnrollError::InvalidTarget(_)));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_enroll_by_cluster_uses_representative_and_keeps_siblings() {
        let mut store = MemoryIdentityStore::new();
        let mut pool = UnknownPool::default();
        let first = add(&mut pool, vec![0.0, 0.0]);
        let second = add(&mut pool, vec![0.0, 0.1]);
        let cluster_id = first.cluster_id.unwrap();

        let identity = enroll(
            &mut store,
            &mut pool,
            EnrollSource::Cluster(cluster_id),
            EnrollTarget::New(NewIdentity::named("Jane")),
        )
        .unwrap();

        assert_eq!(identity.encoding, vec![0.0, 0.0]);
        let cluster = pool.cluster(&cluster_id).unwrap();
        assert_eq!(cluster.len(), 1);
        assert_eq!(cluster.members()[0].id, second.observation_id);
    }

    #[test]
    fn test_unknown_cluster_not_found() {
        let mut store = MemoryIdentityStore::new();
        let mut pool = UnknownPool::default();
        let err = enroll(
            &mut store,
            &mut pool,
            EnrollSource::Cluster(Uuid::new_v4()),
            EnrollTarget::New(NewIdentity::named("Jane")),
        )
        .unwrap_err();
        assert!(matches!(err, EnrollError::NotFound(_)));
    }

    #[test]
    fn test_target_from_parts() {
        assert_eq!(
            EnrollTarget::from_parts(Some("7".into()), Some(NewIdentity::named("x"))).unwrap(),
            EnrollTarget::Existing("7".into())
        );
        assert_eq!(
            EnrollTarget::from_parts(Some(" ".into()), Some(NewIdentity::named("x"))).unwrap(),
            EnrollTarget::New(NewIdentity::named("x"))
        );
        assert!(matches!(
            EnrollTarget::from_parts(None, None),
            Err(EnrollError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_store_failure_leaves_cluster_in_place() {
        let (mut store, faults) = FailingStore::new(vec![]);
        let mut pool = UnknownPool::default();
        let a = add(&mut pool, vec![0.3, 0.3]);
        let b = add(&mut pool, vec![0.3, 0.35]);
        let cluster_id = a.cluster_id.unwrap();
        assert_eq!(b.cluster_id, Some(cluster_id));

        faults.fail_writes(true);
        let err = enroll(
            &mut store,
            &mut pool,
            EnrollSource::Cluster(cluster_id),
            EnrollTarget::New(NewIdentity::named("Jane")),
        )
        .unwrap_err();

        assert!(matches!(err, EnrollError::Store(StoreError::Backend(_))));
        assert_eq!(pool.cluster(&cluster_id).unwrap().len(), 2);
        assert!(pool.contains(&a.observation_id));
        assert!(store.inner.list().unwrap().is_empty());
    }
}
