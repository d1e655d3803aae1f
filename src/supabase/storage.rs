//! Supabase Storage uploads.

use async_trait::async_trait;

use super::SupabaseClient;
use crate::backend::{BackendError, BlobStorage};

/// Content type from the key's extension; storage serves it back verbatim.
pub(crate) fn content_type_for(key: &str) -> &'static str {
    match crate::helpers::file_extension(key).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl BlobStorage for SupabaseClient {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<String, BackendError> {
        let object = format!("{}/{}", bucket, key.trim_start_matches('/'));
        let url = self.endpoint(&format!("storage/v1/object/{}", object))?;
        let size = bytes.len();
        self.send(
            self.http
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, content_type_for(key))
                .header("x-upsert", "false")
                .body(bytes),
        )
        .await?;

        let public = self.endpoint(&format!("storage/v1/object/public/{}", object))?;
        log::debug!("Uploaded {} bytes to {}", size, object);
        Ok(public.to_string())
    }
}
