//! Invitation mail through an Edge Function.

use async_trait::async_trait;

use super::SupabaseClient;
use crate::backend::{BackendError, InvitationEmail, InviteDispatcher};

#[async_trait]
impl InviteDispatcher for SupabaseClient {
    async fn send(&self, invitation: &InvitationEmail) -> Result<(), BackendError> {
        let url = self.endpoint(&format!("functions/v1/{}", self.invite_function))?;
        SupabaseClient::send(self, self.http.post(url).json(invitation)).await?;
        log::info!("Invitation mail queued for {}", invitation.to);
        Ok(())
    }
}
