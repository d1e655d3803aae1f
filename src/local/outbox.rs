use std::path::PathBuf;

use async_trait::async_trait;

use crate::backend::{BackendError, InvitationEmail, InviteDispatcher};

/// Dispatcher that drops each invitation into a directory as a JSON file
/// for a mail relay (or a human) to pick up.
pub struct OutboxDispatcher {
    dir: PathBuf,
}

impl OutboxDispatcher {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl InviteDispatcher for OutboxDispatcher {
    async fn send(&self, invitation: &InvitationEmail) -> Result<(), BackendError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!(
            "{}-{}.json",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            uuid::Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        let payload = serde_json::to_string_pretty(invitation)?;
        tokio::fs::write(&path, payload).await?;
        log::info!("Queued invitation to {} at {}", invitation.to, path.display());
        Ok(())
    }
}
