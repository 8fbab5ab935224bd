use async_trait::async_trait;
use std::path::PathBuf;
use vigil_core::image_store::content_ref;
use vigil_core::{ImagePayload, ImageRef, ImageStore, ImageStoreError};

/// Writes captured images into a directory, one file per distinct content.
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, image_ref: &ImageRef) -> PathBuf {
        self.dir.join(&image_ref.0)
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn put(&self, image: &ImagePayload) -> Result<ImageRef, ImageStoreError> {
        let image_ref = content_ref(image);
        let path = self.path_of(&image_ref);
        if tokio::fs::try_exists(&path).await? {
            return Ok(image_ref);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &image.bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(path = %path.display(), bytes = image.bytes.len(), "capture stored");
        Ok(image_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::decode_image_payload;

    #[tokio::test]
    async fn test_put_writes_content_addressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path().join("captures"));
        let payload = decode_image_payload(b"\xff\xd8\xff\xe0jpegdata").unwrap();

        let image_ref = store.put(&payload).await.unwrap();
        assert!(image_ref.0.ends_with(".jpg"));
        let written = tokio::fs::read(store.path_of(&image_ref)).await.unwrap();
        assert_eq!(written, payload.bytes);

        let again = store.put(&payload).await.unwrap();
        assert_eq!(again, image_ref);
    }

    #[tokio::test]
    async fn test_distinct_images_get_distinct_refs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        let a = store.put(&decode_image_payload(b"one").unwrap()).await.unwrap();
        let b = store.put(&decode_image_payload(b"two").unwrap()).await.unwrap();
        assert_ne!(a, b);
        assert!(a.0.ends_with(".img"));
    }
}
