use crate::provider::ImagePayload;
use crate::types::ImageRef;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("image store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image store: {0}")]
    Other(String),
}

/// Opaque storage for captured query images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, image: &ImagePayload) -> Result<ImageRef, ImageStoreError>;
}

/// Content-addressed reference: hex SHA-256 of the bytes plus extension.
pub fn content_ref(image: &ImagePayload) -> ImageRef {
    let digest = Sha256::digest(&image.bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    ImageRef(format!("{hex}.{}", image.extension()))
}

/// Keeps images in memory; used in tests and the demo setup.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<ImageRef, Vec<u8>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, image_ref: &ImageRef) -> Option<Vec<u8>> {
        self.images.lock().ok()?.get(image_ref).cloned()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put(&self, image: &ImagePayload) -> Result<ImageRef, ImageStoreError> {
        let image_ref = content_ref(image);
        self.images
            .lock()
            .map_err(|e| ImageStoreError::Other(format!("lock poisoned: {e}")))?
            .insert(image_ref.clone(), image.bytes.clone());
        Ok(image_ref)
    }
}
