//! Descriptor provider capability and the mock backend.
//!
//! A provider turns one captured image into a [`FaceDescriptor`]. Backends
//! are selected by configuration; the pipeline only sees the trait.

use crate::types::{BoundingBox, FaceDescriptor};
use async_trait::async_trait;
use base64::Engine as _;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use thiserror::Error;

/// Dimensionality of mock encodings.
pub const MOCK_ENCODING_DIM: usize = 128;
const MOCK_CONFIDENCE: f32 = 0.95;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("descriptor provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid image payload: {0}")]
    InvalidImage(String),
    #[error("descriptor provider misconfigured: {0}")]
    Misconfigured(String),
}

/// Extracts a face descriptor from an image.
///
/// Extraction may be slow (network or inference) and must complete before
/// any shared recognition state is touched.
#[async_trait]
pub trait DescriptorProvider: Send + Sync {
    /// Short backend name for logs and status output.
    fn name(&self) -> &str;

    async fn extract(&self, image: &[u8]) -> Result<FaceDescriptor, ProviderError>;
}

/// A decoded query image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    /// Detected container format, if recognizable.
    pub format: Option<image::ImageFormat>,
}

impl ImagePayload {
    /// File extension for stored copies of this image.
    pub fn extension(&self) -> &'static str {
        self.format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("img")
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Accept raw image bytes or a `data:<mime>;base64,<payload>` URL.
pub fn decode_image_payload(raw: &[u8]) -> Result<ImagePayload, ProviderError> {
    let bytes = if raw.starts_with(b"data:") {
        let comma = raw
            .iter()
            .position(|&b| b == b',')
            .ok_or_else(|| ProviderError::InvalidImage("data URL without payload".into()))?;
        let header = &raw[..comma];
        if !header.ends_with(b";base64") {
            return Err(ProviderError::InvalidImage("data URL is not base64-encoded".into()));
        }
        let body: Vec<u8> = raw[comma + 1..]
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| ProviderError::InvalidImage(format!("base64: {e}")))?
    } else {
        raw.to_vec()
    };

    if bytes.is_empty() {
        return Err(ProviderError::InvalidImage("empty image".into()));
    }

    let format = image::guess_format(&bytes).ok();
    Ok(ImagePayload { bytes, format })
}

/// How the mock provider draws encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// A fresh random encoding for every call.
    #[default]
    Random,
    /// Encoding seeded from the image content, so the same image always
    /// yields the same descriptor.
    ContentSeeded,
}

/// Generates plausible random descriptors without any model.
pub struct MockProvider {
    mode: MockMode,
    rng: Mutex<StdRng>,
}

impl MockProvider {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Random mode with a fixed seed, for reproducible tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            mode: MockMode::Random,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn generate(rng: &mut StdRng) -> FaceDescriptor {
        let encoding = (0..MOCK_ENCODING_DIM)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        let bounding_box = BoundingBox {
            x: 100.0 + rng.gen_range(0.0f32..200.0),
            y: 80.0 + rng.gen_range(0.0f32..150.0),
            width: 150.0 + rng.gen_range(0.0f32..100.0),
            height: 180.0 + rng.gen_range(0.0f32..120.0),
        };
        FaceDescriptor::new(encoding, MOCK_CONFIDENCE, bounding_box)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(MockMode::default())
    }
}

#[async_trait]
impl DescriptorProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn extract(&self, image: &[u8]) -> Result<FaceDescriptor, ProviderError> {
        if image.is_empty() {
            return Err(ProviderError::InvalidImage("empty image".into()));
        }
        match self.mode {
            MockMode::Random => {
                let mut rng = self
                    .rng
                    .lock()
                    .map_err(|e| ProviderError::Unavailable(format!("rng lock poisoned: {e}")))?;
                Ok(Self::generate(&mut rng))
            }
            MockMode::ContentSeeded => {
                let digest = Sha256::digest(image);
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&digest);
                Ok(Self::generate(&mut StdRng::from_seed(seed)))
            }
        }
    }
}
