use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::backend::{BackendError, BlobStorage};

/// Blob store writing objects to `<root>/<bucket>/<key>`.
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BackendError> {
        for part in [bucket, key] {
            let relative = Path::new(part);
            let escapes = part.is_empty()
                || relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)));
            if escapes {
                return Err(BackendError::Unsupported(format!(
                    "object path '{}' is not a plain relative name",
                    part
                )));
            }
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        let absolute = tokio::fs::canonicalize(&path).await?;
        let url = url::Url::from_file_path(&absolute).map_err(|_| {
            BackendError::Decode(format!("no file URL for {}", absolute.display()))
        })?;
        log::debug!("Stored {} bytes at {}", bytes.len(), url);
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_writes_object_and_returns_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBlobStorage::new(dir.path().to_path_buf());
        let url = storage
            .upload("lead-images", "u1/photo.jpg", vec![1, 2, 3])
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("lead-images/u1/photo.jpg"));
        let written = std::fs::read(dir.path().join("lead-images/u1/photo.jpg")).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBlobStorage::new(dir.path().to_path_buf());
        let err = storage
            .upload("lead-images", "../escape.jpg", vec![0])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }
}
