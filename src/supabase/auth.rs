//! GoTrue identity service.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::SupabaseClient;
use crate::backend::{BackendError, IdentityService, Session, SessionEvent, SignUpOutcome};
use crate::types::Role;

/// Refresh this many seconds before the access token expires.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

impl TokenResponse {
    fn into_session(self, fallback_email: &str) -> Session {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs)
        });
        Session {
            user_id: self.user.id,
            email: self
                .user
                .email
                .unwrap_or_else(|| fallback_email.to_string()),
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

/// Sign-up answers with a token pair when confirmation is off, or just the
/// user when a verification mail went out.
fn parse_sign_up(body: Value, email: &str) -> Result<SignUpOutcome, BackendError> {
    if body.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(body)?;
        Ok(SignUpOutcome::SignedIn(token.into_session(email)))
    } else {
        Ok(SignUpOutcome::ConfirmationSent {
            email: email.to_string(),
        })
    }
}

fn needs_refresh(session: &Session, now: i64) -> bool {
    match session.expires_at {
        Some(expires_at) => expires_at - REFRESH_MARGIN_SECS <= now,
        None => false,
    }
}

impl SupabaseClient {
    async fn token_grant(&self, grant: &str, body: Value) -> Result<TokenResponse, BackendError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant);
        let response = self
            .send(self.http.post(url).json(&body))
            .await
            .map_err(|e| match e {
                BackendError::Status { status: 400, message } => {
                    BackendError::InvalidCredentials(message)
                }
                other => other,
            })?;
        Ok(response.json().await?)
    }

    async fn refresh(&self, session: &Session) -> Result<Session, BackendError> {
        let refresh_token = session
            .refresh_token
            .clone()
            .ok_or_else(|| BackendError::InvalidCredentials("no refresh token".to_string()))?;
        let token = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        Ok(token.into_session(&session.email))
    }
}

#[async_trait]
impl IdentityService for SupabaseClient {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let session = self.session.lock().clone();
        let Some(session) = session else {
            return Ok(None);
        };
        if !needs_refresh(&session, chrono::Utc::now().timestamp()) {
            return Ok(Some(session));
        }
        match self.refresh(&session).await {
            Ok(fresh) => {
                self.install_session(fresh.clone(), SessionEvent::TokenRefreshed);
                Ok(Some(fresh))
            }
            Err(BackendError::InvalidCredentials(msg)) => {
                log::warn!("Session for {} expired: {}", session.email, msg);
                self.drop_session();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        role_hint: Role,
    ) -> Result<SignUpOutcome, BackendError> {
        let body = json!({
            "email": email,
            "password": password,
            "data": { "role": role_hint.as_str() },
        });
        let response = self
            .send(self.http.post(self.endpoint("auth/v1/signup")?).json(&body))
            .await
            .map_err(|e| match e {
                BackendError::Status { status: 400 | 422, message }
                    if message.to_lowercase().contains("already") =>
                {
                    BackendError::Conflict(message)
                }
                other => other,
            })?;
        let outcome = parse_sign_up(response.json().await?, email)?;
        if let SignUpOutcome::SignedIn(session) = &outcome {
            self.install_session(session.clone(), SessionEvent::SignedIn);
        }
        Ok(outcome)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let token = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        let session = token.into_session(email);
        self.install_session(session.clone(), SessionEvent::SignedIn);
        Ok(session)
    }

    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
    ) -> Result<String, BackendError> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to);
        Ok(url.to_string())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let signed_in = self.session.lock().is_some();
        if signed_in {
            let url = self.endpoint("auth/v1/logout")?;
            // The local session ends regardless of what the server says.
            if let Err(e) = self.send(self.http.post(url)).await {
                log::warn!("Server-side logout failed: {}", e);
            }
        }
        self.drop_session();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sign_up_with_session() {
        let body = json!({
            "access_token": "jwt",
            "refresh_token": "rt",
            "expires_at": 1_900_000_000,
            "user": { "id": "u1", "email": "a@x.com" }
        });
        let SignUpOutcome::SignedIn(session) = parse_sign_up(body, "a@x.com").unwrap() else {
            panic!("expected a session");
        };
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.access_token.as_deref(), Some("jwt"));
        assert_eq!(session.expires_at, Some(1_900_000_000));
    }

    #[test]
    fn test_parse_sign_up_pending_confirmation() {
        let body = json!({ "id": "u1", "email": "a@x.com", "confirmation_sent_at": "2026-01-01" });
        assert_eq!(
            parse_sign_up(body, "a@x.com").unwrap(),
            SignUpOutcome::ConfirmationSent {
                email: "a@x.com".into()
            }
        );
    }

    #[test]
    fn test_expires_in_becomes_absolute() {
        let token: TokenResponse = serde_json::from_value(json!({
            "access_token": "jwt",
            "expires_in": 3600,
            "user": { "id": "u1" }
        }))
        .unwrap();
        let session = token.into_session("fallback@x.com");
        assert_eq!(session.email, "fallback@x.com");
        let now = chrono::Utc::now().timestamp();
        assert!(session.expires_at.unwrap() > now + 3000);
    }

    #[test]
    fn test_needs_refresh_margin() {
        let mut session = Session {
            user_id: "u1".into(),
            email: "a@x.com".into(),
            access_token: Some("jwt".into()),
            refresh_token: Some("rt".into()),
            expires_at: None,
        };
        assert!(!needs_refresh(&session, 1_000));
        session.expires_at = Some(1_030);
        assert!(needs_refresh(&session, 1_000));
        session.expires_at = Some(2_000);
        assert!(!needs_refresh(&session, 1_000));
    }

    #[tokio::test]
    async fn test_oauth_url() {
        let client = SupabaseClient::new(
            &crate::types::SupabaseConfig {
                url: "https://abc.supabase.co".into(),
                anon_key: "anon".into(),
                invite_function: "send-invitation".into(),
            },
            None,
        )
        .unwrap();
        let url = client
            .sign_in_with_oauth("google", "http://localhost:3000/")
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://abc.supabase.co/auth/v1/authorize?provider=google&redirect_to=http%3A%2F%2Flocalhost%3A3000%2F"
        );
    }
}
