//! vigil-core: face matching and unknown-face escalation for access control.
//!
//! Matches query descriptors against enrolled identities, groups repeated
//! unrecognized faces into clusters, and rate-limits the alerts they raise.
//! Descriptor extraction, identity persistence, image storage and alert
//! delivery are capabilities supplied by the caller.

pub mod access_log;
pub mod cluster;
pub mod enrollment;
pub mod escalation;
pub mod image_store;
pub mod matcher;
pub mod notify;
pub mod provider;
pub mod registry;
pub mod similarity;
pub mod store;
pub mod types;

pub use access_log::{AccessEvent, AccessLog, AccessStatus};
pub use cluster::{Assignment, ClusterPolicy, ObservationCluster, UnknownPool, GROUPING_THRESHOLD};
pub use enrollment::{EnrollError, EnrollSource, EnrollTarget};
pub use escalation::{EscalationScheduler, NotifyDecision, DEFAULT_COOLDOWN};
pub use image_store::{ImageStore, ImageStoreError, MemoryImageStore};
pub use matcher::{EuclideanMatcher, Matcher, ACCEPTANCE_THRESHOLD};
pub use notify::{Alert, AlertKind, LogTransport, Notification, NotificationTransport, TransportError};
pub use provider::{decode_image_payload, DescriptorProvider, ImagePayload, MockMode, MockProvider, ProviderError};
pub use registry::{DetectionOutcome, Registry, RegistrySettings, RegistryStats, UnresolvedReport};
pub use similarity::{similarity, SimilarityError};
pub use store::{IdentityStore, MemoryIdentityStore, StoreError};
pub use types::{
    BoundingBox, CaptureContext, ClusterId, EnrolledIdentity, FaceDescriptor, ImageRef, MatchResult,
    NewIdentity, ObservationId, UnrecognizedObservation,
};
