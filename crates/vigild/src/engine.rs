use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use vigil_core::registry::RegistryStats;
use vigil_core::{
    decode_image_payload, AccessEvent, Alert, CaptureContext, ClusterId, DescriptorProvider,
    DetectionOutcome, EnrollError, EnrollSource, EnrollTarget, EnrolledIdentity, FaceDescriptor,
    ImageStore, ImageStoreError, Notification, NotificationTransport, NotifyDecision, ObservationId,
    ProviderError, Registry, StoreError, UnresolvedReport,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine must be spawned from within a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("descriptor provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("storing capture failed: {0}")]
    ImageStore(#[from] ImageStoreError),
    #[error("identity store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What `detect` reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub recognized: bool,
    pub identity_id: Option<String>,
    pub identity_name: Option<String>,
    pub confidence: f32,
    pub access_granted: bool,
    pub access_event_id: Uuid,
    pub observation_id: Option<ObservationId>,
    pub cluster_id: Option<ClusterId>,
    pub is_new_cluster: bool,
    pub notified: bool,
    pub provider: String,
}

impl DetectionReport {
    fn new(outcome: &DetectionOutcome, provider: &str) -> Self {
        Self {
            recognized: outcome.result.recognized,
            identity_id: outcome.result.identity_id.clone(),
            identity_name: outcome.result.identity_name.clone(),
            confidence: outcome.result.confidence,
            access_granted: outcome.result.recognized,
            access_event_id: outcome.access_event_id,
            observation_id: outcome.observation_id,
            cluster_id: outcome.cluster_id,
            is_new_cluster: outcome.is_new_cluster,
            notified: outcome.decision.as_ref().is_some_and(NotifyDecision::should_notify),
            provider: provider.to_string(),
        }
    }
}

/// Daemon status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub provider: String,
    pub transport: String,
    #[serde(flatten)]
    pub stats: RegistryStats,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Observe {
        descriptor: FaceDescriptor,
        context: CaptureContext,
        reply: oneshot::Sender<Result<DetectionOutcome, StoreError>>,
    },
    Enroll {
        source: EnrollSource,
        target: EnrollTarget,
        reply: oneshot::Sender<Result<EnrolledIdentity, EnrollError>>,
    },
    ListUnresolved {
        reply: oneshot::Sender<UnresolvedReport>,
    },
    Identities {
        reply: oneshot::Sender<Result<Vec<EnrolledIdentity>, StoreError>>,
    },
    SetIdentityActive {
        id: String,
        active: bool,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    AccessEvents {
        limit: usize,
        identity_id: Option<String>,
        reply: oneshot::Sender<Vec<AccessEvent>>,
    },
    Notifications {
        reply: oneshot::Sender<Vec<Notification>>,
    },
    MarkNotificationRead {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<Result<RegistryStats, StoreError>>,
    },
}

/// Collaborators the engine calls outside the registry thread.
pub struct EngineDeps {
    pub provider: Arc<dyn DescriptorProvider>,
    pub images: Arc<dyn ImageStore>,
    pub transport: Arc<dyn NotificationTransport>,
    pub recipients: Vec<String>,
    pub extract_timeout: Duration,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    provider: Arc<dyn DescriptorProvider>,
    images: Arc<dyn ImageStore>,
    transport_name: Arc<str>,
    extract_timeout: Duration,
}

/// Sends alerts from the engine thread onto the async runtime.
struct AlertDispatcher {
    runtime: tokio::runtime::Handle,
    transport: Arc<dyn NotificationTransport>,
    recipients: Arc<[String]>,
}

impl AlertDispatcher {
    fn dispatch(&self, alert: Alert) {
        let transport = Arc::clone(&self.transport);
        let recipients = Arc::clone(&self.recipients);
        self.runtime.spawn(async move {
            if let Err(err) = transport.send(&alert, &recipients).await {
                tracing::warn!(
                    transport = transport.name(),
                    error = %err,
                    cluster = ?alert.cluster_id,
                    "alert delivery failed"
                );
            }
        });
    }
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Extract, match, cluster and escalate one captured image.
    ///
    /// Extraction and image storage happen before the registry is touched;
    /// a failure or timeout there leaves all shared state unchanged. Once the
    /// observation is queued, its alert is sent by the engine even if this
    /// future is dropped, and delivery failures never fail the detection.
    pub async fn detect(
        &self,
        image: &[u8],
        location: &str,
        device_id: &str,
    ) -> Result<DetectionReport, DetectError> {
        let payload = decode_image_payload(image)?;

        let descriptor = tokio::time::timeout(self.extract_timeout, self.provider.extract(&payload.bytes))
            .await
            .map_err(|_| DetectError::Timeout(self.extract_timeout))??;
        tracing::debug!(
            provider = self.provider.name(),
            dims = descriptor.encoding.len(),
            confidence = descriptor.confidence,
            "descriptor extracted"
        );

        let image_ref = self.images.put(&payload).await?;
        let context = CaptureContext {
            image_ref,
            location: location.to_string(),
            device_id: device_id.to_string(),
            captured_at: Utc::now(),
        };

        let outcome = self
            .request(|reply| EngineRequest::Observe {
                descriptor,
                context,
                reply,
            })
            .await??;

        Ok(DetectionReport::new(&outcome, self.provider.name()))
    }

    pub async fn enroll(
        &self,
        source: EnrollSource,
        target: EnrollTarget,
    ) -> Result<Result<EnrolledIdentity, EnrollError>, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            source,
            target,
            reply,
        })
        .await
    }

    pub async fn list_unresolved(&self) -> Result<UnresolvedReport, EngineError> {
        self.request(|reply| EngineRequest::ListUnresolved { reply }).await
    }

    pub async fn identities(&self) -> Result<Result<Vec<EnrolledIdentity>, StoreError>, EngineError> {
        self.request(|reply| EngineRequest::Identities { reply }).await
    }

    pub async fn set_identity_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Result<bool, StoreError>, EngineError> {
        let id = id.to_string();
        self.request(|reply| EngineRequest::SetIdentityActive { id, active, reply })
            .await
    }

    pub async fn access_events(
        &self,
        limit: usize,
        identity_id: Option<String>,
    ) -> Result<Vec<AccessEvent>, EngineError> {
        self.request(|reply| EngineRequest::AccessEvents {
            limit,
            identity_id,
            reply,
        })
        .await
    }

    pub async fn notifications(&self) -> Result<Vec<Notification>, EngineError> {
        self.request(|reply| EngineRequest::Notifications { reply }).await
    }

    pub async fn mark_notification_read(&self, id: Uuid) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::MarkNotificationRead { id, reply })
            .await
    }

    pub async fn status(&self) -> Result<Result<EngineStatus, StoreError>, EngineError> {
        let stats = self.request(|reply| EngineRequest::Stats { reply }).await?;
        Ok(stats.map(|stats| EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            provider: self.provider.name().to_string(),
            transport: self.transport_name.to_string(),
            stats,
        }))
    }
}

/// Spawn the engine on a dedicated OS thread that owns the registry.
///
/// Requests are handled one at a time, so each observation's match,
/// cluster and escalation step is atomic with respect to every other
/// observation and to enrollment. Must be called from within a tokio
/// runtime; alerts are sent on that runtime.
pub fn spawn_engine(registry: Registry, deps: EngineDeps) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let transport_name: Arc<str> = deps.transport.name().into();
    let dispatcher = AlertDispatcher {
        runtime: tokio::runtime::Handle::try_current()?,
        transport: deps.transport,
        recipients: deps.recipients.into(),
    };

    std::thread::Builder::new()
        .name("vigil-engine".into())
        .spawn(move || {
            let mut registry = registry;
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut registry, &dispatcher, req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        provider: deps.provider,
        images: deps.images,
        transport_name,
        extract_timeout: deps.extract_timeout,
    })
}

/// Callers may have given up on a reply; a dropped receiver is not an error.
fn handle_request(registry: &mut Registry, dispatcher: &AlertDispatcher, req: EngineRequest) {
    match req {
        EngineRequest::Observe {
            descriptor,
            context,
            reply,
        } => {
            let outcome = registry.observe(descriptor, context);
            if let Some(alert) = outcome.as_ref().ok().and_then(|o| o.alert.clone()) {
                dispatcher.dispatch(alert);
            }
            let _ = reply.send(outcome);
        }
        EngineRequest::Enroll {
            source,
            target,
            reply,
        } => {
            let _ = reply.send(registry.enroll(source, target));
        }
        EngineRequest::ListUnresolved { reply } => {
            let _ = reply.send(registry.list_unresolved());
        }
        EngineRequest::Identities { reply } => {
            let _ = reply.send(registry.identities());
        }
        EngineRequest::SetIdentityActive { id, active, reply } => {
            let _ = reply.send(registry.set_identity_active(&id, active));
        }
        EngineRequest::AccessEvents {
            limit,
            identity_id,
            reply,
        } => {
            let _ = reply.send(registry.access_events(limit, identity_id.as_deref()));
        }
        EngineRequest::Notifications { reply } => {
            let _ = reply.send(registry.notifications());
        }
        EngineRequest::MarkNotificationRead { id, reply } => {
            let _ = reply.send(registry.mark_notification_read(&id));
        }
        EngineRequest::Stats { reply } => {
            let _ = reply.send(registry.stats());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use vigil_core::{
        IdentityStore, MemoryIdentityStore, MemoryImageStore, NewIdentity,
        RegistrySettings, TransportError,
    };

    const IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nframe";

    /// Hands out a scripted sequence of descriptors.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<FaceDescriptor, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<FaceDescriptor, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl DescriptorProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn extract(&self, _image: &[u8]) -> Result<FaceDescriptor, ProviderError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::NoFaceDetected))
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl DescriptorProvider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn extract(&self, _image: &[u8]) -> Result<FaceDescriptor, ProviderError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct CountingTransport {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NotificationTransport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _alert: &Alert, _recipients: &[String]) -> Result<(), TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TransportError::Unreachable("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Identity store whose reads block the engine thread for a while.
    struct SlowStore {
        inner: MemoryIdentityStore,
        delay: Duration,
    }

    impl IdentityStore for SlowStore {
        fn list(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.list()
        }

        fn get(&self, id: &str) -> Result<Option<EnrolledIdentity>, StoreError> {
            self.inner.get(id)
        }

        fn create(
            &mut self,
            identity: &NewIdentity,
            encoding: &[f32],
        ) -> Result<EnrolledIdentity, StoreError> {
            self.inner.create(identity, encoding)
        }

        fn set_encoding(&mut self, id: &str, encoding: &[f32]) -> Result<EnrolledIdentity, StoreError> {
            self.inner.set_encoding(id, encoding)
        }

        fn set_active(&mut self, id: &str, active: bool) -> Result<bool, StoreError> {
            self.inner.set_active(id, active)
        }
    }

    fn engine(
        provider: Arc<dyn DescriptorProvider>,
        transport: Arc<dyn NotificationTransport>,
        identities: Vec<EnrolledIdentity>,
    ) -> EngineHandle {
        engine_with_store(
            provider,
            transport,
            Box::new(MemoryIdentityStore::with_identities(identities)),
        )
    }

    fn engine_with_store(
        provider: Arc<dyn DescriptorProvider>,
        transport: Arc<dyn NotificationTransport>,
        store: Box<dyn IdentityStore>,
    ) -> EngineHandle {
        let registry = Registry::new(store, RegistrySettings::default());
        spawn_engine(
            registry,
            EngineDeps {
                provider,
                images: Arc::new(MemoryImageStore::new()),
                transport,
                recipients: vec!["admin@company.com".into()],
                extract_timeout: Duration::from_millis(200),
            },
        )
        .unwrap()
    }

    fn d(encoding: Vec<f32>) -> Result<FaceDescriptor, ProviderError> {
        Ok(FaceDescriptor::from_encoding(encoding))
    }

    async fn wait_for_sends(transport: &CountingTransport, expected: usize) {
        for _ in 0..50 {
            if transport.sent.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_detect_recognizes_enrolled_identity() {
        let provider = Arc::new(ScriptedProvider::new(vec![d(vec![0.0, 0.0, 0.0, 0.1])]));
        let handle = engine(
            provider,
            Arc::new(CountingTransport::default()),
            vec![EnrolledIdentity::new("1", "Ana", vec![0.0, 0.0, 0.0, 0.0])],
        );

        let report = handle.detect(IMAGE, "Main Entrance", "Terminal-001").await.unwrap();
        assert!(report.recognized);
        assert!(report.access_granted);
        assert_eq!(report.identity_id.as_deref(), Some("1"));
        assert!(report.cluster_id.is_none());
        assert_eq!(report.provider, "scripted");
    }

    #[tokio::test]
    async fn test_detect_stranger_twice_notifies_once() {
        let transport = Arc::new(CountingTransport::default());
        let provider = Arc::new(ScriptedProvider::new(vec![d(vec![1.0, 1.0]), d(vec![1.0, 1.2])]));
        let handle = engine(provider, transport.clone(), vec![]);

        let first = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap();
        let second = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap();

        assert!(first.is_new_cluster && first.notified);
        assert_eq!(second.cluster_id, first.cluster_id);
        assert!(!second.is_new_cluster);
        assert!(!second.notified);

        wait_for_sends(&transport, 1).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
        assert_eq!(handle.notifications().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_detect_still_sends_alert() {
        let transport = Arc::new(CountingTransport::default());
        let provider = Arc::new(ScriptedProvider::new(vec![d(vec![5.0, 5.0]), d(vec![5.0, 5.1])]));
        let store = SlowStore {
            inner: MemoryIdentityStore::new(),
            delay: Duration::from_millis(200),
        };
        let handle = engine_with_store(provider, transport.clone(), Box::new(store));

        let dropped = tokio::time::timeout(
            Duration::from_millis(50),
            handle.detect(IMAGE, "Lobby", "Terminal-001"),
        )
        .await;
        assert!(dropped.is_err());

        wait_for_sends(&transport, 1).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);

        let second = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap();
        assert!(!second.is_new_cluster);
        assert!(!second.notified);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_outside_runtime_is_rejected() {
        let registry = Registry::new(Box::new(MemoryIdentityStore::new()), RegistrySettings::default());
        let result = spawn_engine(
            registry,
            EngineDeps {
                provider: Arc::new(StalledProvider),
                images: Arc::new(MemoryImageStore::new()),
                transport: Arc::new(CountingTransport::default()),
                recipients: vec![],
                extract_timeout: Duration::from_millis(200),
            },
        );
        assert!(matches!(result, Err(EngineError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_state() {
        let transport = Arc::new(CountingTransport {
            sent: AtomicUsize::new(0),
            fail: true,
        });
        let provider = Arc::new(ScriptedProvider::new(vec![d(vec![3.0, 3.0])]));
        let handle = engine(provider, transport.clone(), vec![]);

        let report = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap();
        assert!(report.notified);
        wait_for_sends(&transport, 1).await;

        let unresolved = handle.list_unresolved().await.unwrap();
        assert_eq!(unresolved.total_clusters, 1);
        assert_eq!(unresolved.total_unrecognized, 1);
    }

    #[tokio::test]
    async fn test_no_face_leaves_state_untouched() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::NoFaceDetected)]));
        let handle = engine(provider, Arc::new(CountingTransport::default()), vec![]);

        let err = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap_err();
        assert!(matches!(err, DetectError::Provider(ProviderError::NoFaceDetected)));
        assert_eq!(handle.list_unresolved().await.unwrap().total_unrecognized, 0);
        assert!(handle.access_events(10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_timeout_leaves_state_untouched() {
        let handle = engine(Arc::new(StalledProvider), Arc::new(CountingTransport::default()), vec![]);

        let err = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap_err();
        assert!(matches!(err, DetectError::Timeout(_)));
        assert_eq!(handle.list_unresolved().await.unwrap().total_unrecognized, 0);
    }

    #[tokio::test]
    async fn test_invalid_image_rejected_before_extraction() {
        let provider = Arc::new(ScriptedProvider::new(vec![d(vec![0.0])]));
        let handle = engine(provider, Arc::new(CountingTransport::default()), vec![]);
        let err = handle.detect(b"", "Lobby", "Terminal-001").await.unwrap_err();
        assert!(matches!(err, DetectError::Provider(ProviderError::InvalidImage(_))));
    }

    #[tokio::test]
    async fn test_enroll_then_detect_recognizes() {
        let provider = Arc::new(ScriptedProvider::new(vec![d(vec![0.4, 0.4]), d(vec![0.4, 0.8])]));
        let handle = engine(provider, Arc::new(CountingTransport::default()), vec![]);

        let first = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap();
        let observation = EnrollSource::Observation(first.observation_id.unwrap());
        let jane = handle
            .enroll(observation, EnrollTarget::New(NewIdentity::named("Jane")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.list_unresolved().await.unwrap().total_clusters, 0);

        let again = handle
            .enroll(observation, EnrollTarget::New(NewIdentity::named("Jane")))
            .await
            .unwrap();
        assert!(matches!(again, Err(EnrollError::NotFound(_))));

        let second = handle.detect(IMAGE, "Lobby", "Terminal-001").await.unwrap();
        assert!(second.recognized);
        assert_eq!(second.identity_id, Some(jane.id));
    }

    #[tokio::test]
    async fn test_concurrent_sightings_share_one_cluster() {
        let script = (0..8).map(|i| d(vec![2.0, 2.0 + i as f32 * 0.01])).collect();
        let provider = Arc::new(ScriptedProvider::new(script));
        let handle = engine(provider, Arc::new(CountingTransport::default()), vec![]);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                tokio::spawn(async move { h.detect(IMAGE, "Lobby", "Terminal-001").await })
            })
            .collect();
        let mut notified = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().notified {
                notified += 1;
            }
        }

        let unresolved = handle.list_unresolved().await.unwrap();
        assert_eq!(unresolved.total_clusters, 1);
        assert_eq!(unresolved.clusters[0].total_attempts, 8);
        assert_eq!(notified, 1);
    }

    #[tokio::test]
    async fn test_status_and_identity_toggle() {
        let handle = engine(
            Arc::new(ScriptedProvider::new(vec![])),
            Arc::new(CountingTransport::default()),
            vec![EnrolledIdentity::new("1", "Ana", vec![0.0])],
        );
        assert!(handle.set_identity_active("1", false).await.unwrap().unwrap());
        let status = handle.status().await.unwrap().unwrap();
        assert_eq!(status.stats.identities, 1);
        assert_eq!(status.stats.active_identities, 0);
        assert_eq!(status.provider, "scripted");
        assert_eq!(status.transport, "counting");
    }
}
