use crate::engine::{DetectError, EngineError, EngineHandle};
use serde::Serialize;
use uuid::Uuid;
use vigil_core::{EnrollError, EnrollSource, EnrollTarget, NewIdentity, ProviderError, StoreError};
use zbus::interface;

/// D-Bus interface for the Vigil access-control daemon.
///
/// Bus name: org.vigil.Access1
/// Object path: /org/vigil/Access1
///
/// Structured results are returned as JSON strings.
pub struct VigilService {
    engine: EngineHandle,
}

impl VigilService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("encode result: {e}")))
}

fn engine_error(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn store_error(err: StoreError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn detect_error(err: DetectError) -> zbus::fdo::Error {
    match err {
        DetectError::Provider(ProviderError::InvalidImage(msg)) => zbus::fdo::Error::InvalidArgs(msg),
        DetectError::Timeout(_) => zbus::fdo::Error::TimedOut(err.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn enroll_error(err: EnrollError) -> zbus::fdo::Error {
    match err {
        EnrollError::NotFound(_) => zbus::fdo::Error::FileNotFound(err.to_string()),
        EnrollError::InvalidTarget(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        EnrollError::Store(_) => zbus::fdo::Error::Failed(err.to_string()),
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, zbus::fdo::Error> {
    Uuid::parse_str(raw.trim()).map_err(|e| zbus::fdo::Error::InvalidArgs(format!("{what}: {e}")))
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Build enrollment arguments from flat D-Bus strings; empty means absent.
fn parse_enroll_request(
    source_kind: &str,
    source_id: &str,
    identity_id: &str,
    name: &str,
    email: &str,
    department: &str,
) -> Result<(EnrollSource, EnrollTarget), zbus::fdo::Error> {
    let source = match source_kind.trim() {
        "observation" => EnrollSource::Observation(parse_uuid(source_id, "observation id")?),
        "cluster" => EnrollSource::Cluster(parse_uuid(source_id, "cluster id")?),
        other => {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "source kind must be 'observation' or 'cluster', got '{other}'"
            )))
        }
    };
    let new_identity = non_empty(name).map(|name| NewIdentity {
        name,
        email: non_empty(email),
        department: non_empty(department),
    });
    let target = EnrollTarget::from_parts(non_empty(identity_id), new_identity).map_err(enroll_error)?;
    Ok((source, target))
}

#[interface(name = "org.vigil.Access1")]
impl VigilService {
    /// Run one captured image through recognition and escalation.
    async fn detect(&self, image: Vec<u8>, location: &str, device_id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(location, device_id, bytes = image.len(), "detect requested");
        let report = self
            .engine
            .detect(&image, location, device_id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, location, device_id, "detect failed");
                detect_error(e)
            })?;
        to_json(&report)
    }

    /// Clusters and individual observations awaiting review.
    async fn list_unresolved(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.list_unresolved().await.map_err(engine_error)?;
        to_json(&report)
    }

    /// Enroll an unresolved observation or cluster.
    ///
    /// `source_kind` is "observation" or "cluster". A non-empty
    /// `identity_id` targets an existing identity; otherwise `name` creates
    /// a new one.
    async fn enroll(
        &self,
        source_kind: &str,
        source_id: &str,
        identity_id: &str,
        name: &str,
        email: &str,
        department: &str,
    ) -> zbus::fdo::Result<String> {
        let (source, target) =
            parse_enroll_request(source_kind, source_id, identity_id, name, email, department)?;
        tracing::info!(?source, "enroll requested");
        let identity = self
            .engine
            .enroll(source, target)
            .await
            .map_err(engine_error)?
            .map_err(enroll_error)?;
        to_json(&identity)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self
            .engine
            .identities()
            .await
            .map_err(engine_error)?
            .map_err(store_error)?;
        to_json(&identities)
    }

    /// Recent access events, newest first. An empty `identity_id` means all.
    async fn access_logs(&self, limit: u32, identity_id: &str) -> zbus::fdo::Result<String> {
        let events = self
            .engine
            .access_events(limit as usize, non_empty(identity_id))
            .await
            .map_err(engine_error)?;
        to_json(&events)
    }

    async fn notifications(&self) -> zbus::fdo::Result<String> {
        let notifications = self.engine.notifications().await.map_err(engine_error)?;
        to_json(&notifications)
    }

    async fn mark_notification_read(&self, id: &str) -> zbus::fdo::Result<bool> {
        let id = parse_uuid(id, "notification id")?;
        self.engine.mark_notification_read(id).await.map_err(engine_error)
    }

    async fn set_identity_active(&self, id: &str, active: bool) -> zbus::fdo::Result<bool> {
        tracing::info!(id, active, "set_identity_active requested");
        self.engine
            .set_identity_active(id, active)
            .await
            .map_err(engine_error)?
            .map_err(store_error)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self
            .engine
            .status()
            .await
            .map_err(engine_error)?
            .map_err(store_error)?;
        to_json(&status)
    }
}
