//! Hosted backend over Supabase HTTP APIs.
//!
//! One client implements all four collaborator traits:
//! - PostgREST (`/rest/v1`) for the directory store
//! - GoTrue (`/auth/v1`) for identity
//! - Storage (`/storage/v1`) for lead images
//! - Edge Functions (`/functions/v1`) for invitation mail
//!
//! Requests carry the project's anon key as `apikey` and the session access
//! token (or the anon key when signed out) as the bearer.

mod auth;
mod functions;
mod rest;
mod storage;
pub mod transport;

use std::path::PathBuf;

use parking_lot::Mutex;
use reqwest::RequestBuilder;
use tokio::sync::broadcast;
use url::Url;

use crate::backend::{BackendError, Session, SessionEvent};
use crate::retry::RetryPolicy;
use crate::session_store;
use crate::types::SupabaseConfig;

const EVENT_CAPACITY: usize = 16;

pub struct SupabaseClient {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    invite_function: String,
    retry: RetryPolicy,
    session: Mutex<Option<Session>>,
    session_path: Option<PathBuf>,
    events: broadcast::Sender<SessionEvent>,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig, session_path: Option<PathBuf>) -> Result<Self, BackendError> {
        let mut base = Url::parse(config.url.trim())
            .map_err(|e| BackendError::Decode(format!("supabase url '{}': {}", config.url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        if config.anon_key.trim().is_empty() {
            return Err(BackendError::Decode("supabase anonKey is empty".to_string()));
        }

        let restored = match &session_path {
            Some(path) => session_store::load_session(path).unwrap_or_else(|e| {
                log::warn!("Could not restore session from {}: {}", path.display(), e);
                None
            }),
            None => None,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            base,
            anon_key: config.anon_key.trim().to_string(),
            invite_function: config.invite_function.clone(),
            retry: RetryPolicy::transport(),
            session: Mutex::new(restored),
            session_path,
            events,
        })
    }

    /// Absolute URL for an API path such as `rest/v1/leads`.
    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| BackendError::Decode(format!("bad endpoint {}: {}", path, e)))
    }

    fn bearer(&self) -> String {
        self.session
            .lock()
            .as_ref()
            .and_then(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    /// Attach `apikey` and bearer headers.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        transport::send_with_retry(self.authorize(request), &self.retry).await
    }

    /// Store and announce a new session.
    fn install_session(&self, session: Session, event: fn(Session) -> SessionEvent) {
        if let Some(path) = &self.session_path {
            if let Err(e) = session_store::save_session(path, &session) {
                log::warn!("Failed to persist session: {}", e);
            }
        }
        *self.session.lock() = Some(session.clone());
        let _ = self.events.send(event(session));
    }

    fn drop_session(&self) {
        *self.session.lock() = None;
        if let Some(path) = &self.session_path {
            if let Err(e) = session_store::delete_session(path) {
                log::warn!("Failed to delete session file: {}", e);
            }
        }
        let _ = self.events.send(SessionEvent::SignedOut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> SupabaseConfig {
        SupabaseConfig {
            url: url.to_string(),
            anon_key: "anon".to_string(),
            invite_function: "send-invitation".to_string(),
        }
    }

    #[test]
    fn test_endpoint_joins_under_project_path() {
        let client = SupabaseClient::new(&config("https://abc.supabase.co"), None).unwrap();
        assert_eq!(
            client.endpoint("rest/v1/leads").unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/leads"
        );
        let proxied = SupabaseClient::new(&config("https://proxy.example.com/sb"), None).unwrap();
        assert_eq!(
            proxied.endpoint("/auth/v1/signup").unwrap().as_str(),
            "https://proxy.example.com/sb/auth/v1/signup"
        );
    }

    #[test]
    fn test_bearer_falls_back_to_anon_key() {
        let client = SupabaseClient::new(&config("https://abc.supabase.co"), None).unwrap();
        assert_eq!(client.bearer(), "anon");
        *client.session.lock() = Some(Session {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            access_token: Some("jwt".into()),
            refresh_token: None,
            expires_at: None,
        });
        assert_eq!(client.bearer(), "jwt");
    }

    #[test]
    fn test_rejects_missing_key() {
        let mut cfg = config("https://abc.supabase.co");
        cfg.anon_key = " ".into();
        assert!(SupabaseClient::new(&cfg, None).is_err());
    }
}
