use crate::types::{EnrolledIdentity, NewIdentity};
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("corrupt identity record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Read/write access to enrolled identities.
pub trait IdentityStore: Send {
    /// Every identity, active or not, in creation order.
    fn list(&self) -> Result<Vec<EnrolledIdentity>, StoreError>;

    /// Identities eligible for matching.
    fn active_identities(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        Ok(self.list()?.into_iter().filter(|i| i.active).collect())
    }

    fn get(&self, id: &str) -> Result<Option<EnrolledIdentity>, StoreError>;

    /// Create an active identity holding `encoding`.
    fn create(
        &mut self,
        identity: &NewIdentity,
        encoding: &[f32],
    ) -> Result<EnrolledIdentity, StoreError>;

    /// Overwrite an identity's representative encoding.
    fn set_encoding(&mut self, id: &str, encoding: &[f32]) -> Result<EnrolledIdentity, StoreError>;

    /// Activate or deactivate an identity. Returns false if it does not exist.
    fn set_active(&mut self, id: &str, active: bool) -> Result<bool, StoreError>;
}

/// In-process identity store.
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityStore {
    identities: Vec<EnrolledIdentity>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identities(identities: Vec<EnrolledIdentity>) -> Self {
        Self { identities }
    }

    /// Insert or replace an identity by id.
    pub fn insert(&mut self, identity: EnrolledIdentity) {
        match self.identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity,
            None => self.identities.push(identity),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn list(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        Ok(self.identities.clone())
    }

    fn get(&self, id: &str) -> Result<Option<EnrolledIdentity>, StoreError> {
        Ok(self.identities.iter().find(|i| i.id == id).cloned())
    }

    fn create(
        &mut self,
        identity: &NewIdentity,
        encoding: &[f32],
    ) -> Result<EnrolledIdentity, StoreError> {
        let mut created = EnrolledIdentity::new(Uuid::new_v4().to_string(), &identity.name, encoding.to_vec());
        created.email = identity.email.clone();
        created.department = identity.department.clone();
        self.identities.push(created.clone());
        Ok(created)
    }

    fn set_encoding(&mut self, id: &str, encoding: &[f32]) -> Result<EnrolledIdentity, StoreError> {
        let identity = self
            .identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        identity.encoding = encoding.to_vec();
        identity.updated_at = Utc::now();
        Ok(identity.clone())
    }

    fn set_active(&mut self, id: &str, active: bool) -> Result<bool, StoreError> {
        match self.identities.iter_mut().find(|i| i.id == id) {
            Some(identity) => {
                identity.active = active;
                identity.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
