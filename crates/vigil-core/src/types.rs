use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an unrecognized observation in the unknown pool.
pub type ObservationId = Uuid;

/// Identifier of an unknown-person cluster.
pub type ClusterId = Uuid;

/// Bounding box of a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A face descriptor produced once per image by a descriptor provider.
///
/// `encoding` is empty when the provider matches server-side and exposes no
/// embedding; such descriptors never match and never cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub encoding: Vec<f32>,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl FaceDescriptor {
    pub fn new(encoding: Vec<f32>, confidence: f32, bounding_box: BoundingBox) -> Self {
        Self {
            encoding,
            confidence: if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) },
            bounding_box,
        }
    }

    /// Descriptor with only an encoding; used by tests and demo fixtures.
    pub fn from_encoding(encoding: Vec<f32>) -> Self {
        Self::new(encoding, 1.0, BoundingBox::default())
    }

    /// Whether the descriptor carries an embedding usable for local comparison.
    pub fn is_comparable(&self) -> bool {
        !self.encoding.is_empty()
    }
}

/// Opaque handle to a captured image held by an [`ImageStore`](crate::ImageStore).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A known person's representative embedding plus profile data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    /// One representative embedding; re-enrollment overwrites it.
    pub encoding: Vec<f32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrolledIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, encoding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            department: None,
            encoding,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_encoding(&self) -> bool {
        !self.encoding.is_empty()
    }
}

/// Profile data for an identity created during enrollment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewIdentity {
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
}

impl NewIdentity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One failed-match event held in the unknown pool until enrolled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnrecognizedObservation {
    pub id: ObservationId,
    pub descriptor: FaceDescriptor,
    pub image_ref: ImageRef,
    pub captured_at: DateTime<Utc>,
    pub location: String,
    pub device_id: String,
    /// Back-reference to the owning cluster, if any.
    pub cluster_id: Option<ClusterId>,
}

/// Where and when a query image was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureContext {
    pub image_ref: ImageRef,
    pub location: String,
    pub device_id: String,
    pub captured_at: DateTime<Utc>,
}

/// Result of matching a query descriptor against enrolled identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub recognized: bool,
    pub identity_id: Option<String>,
    pub identity_name: Option<String>,
    /// Best similarity found in [0, 1], whether or not it was accepted.
    pub confidence: f32,
}

impl MatchResult {
    pub fn unrecognized(confidence: f32) -> Self {
        Self {
            recognized: false,
            identity_id: None,
            identity_name: None,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_confidence_clamped() {
        let d = FaceDescriptor::new(vec![0.0], 1.7, BoundingBox::default());
        assert_eq!(d.confidence, 1.0);
        let d = FaceDescriptor::new(vec![0.0], -0.2, BoundingBox::default());
        assert_eq!(d.confidence, 0.0);
        let d = FaceDescriptor::new(vec![0.0], f32::NAN, BoundingBox::default());
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn test_empty_encoding_not_comparable() {
        assert!(!FaceDescriptor::from_encoding(vec![]).is_comparable());
        assert!(FaceDescriptor::from_encoding(vec![0.1]).is_comparable());
    }

    #[test]
    fn test_image_ref_serializes_as_string() {
        let r = ImageRef("abc.png".into());
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"abc.png\"");
    }
}
