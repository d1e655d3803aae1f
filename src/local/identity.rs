//! Local accounts: salted SHA-256 digests in the `identities` table.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;

use crate::backend::{
    BackendError, IdentityService, Session, SessionEvent, SignUpOutcome,
};
use crate::db::identities::DbIdentity;
use crate::db::LocalDirectory;
use crate::session_store;
use crate::types::Role;

const EVENT_CAPACITY: usize = 16;

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn password_matches(identity: &DbIdentity, password: &str) -> bool {
    let candidate = digest_password(&identity.salt, password);
    bool::from(candidate.as_bytes().ct_eq(identity.password_digest.as_bytes()))
}

pub struct LocalIdentity {
    directory: Arc<LocalDirectory>,
    /// Where the session survives between CLI invocations; `None` keeps it
    /// in memory only.
    session_path: Option<PathBuf>,
    current: Mutex<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl LocalIdentity {
    pub fn new(directory: Arc<LocalDirectory>, session_path: Option<PathBuf>) -> Self {
        let restored = match &session_path {
            Some(path) => session_store::load_session(path).unwrap_or_else(|e| {
                log::warn!("Could not restore session from {}: {}", path.display(), e);
                None
            }),
            None => None,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            directory,
            session_path,
            current: Mutex::new(restored),
            events,
        }
    }

    pub fn in_memory(directory: Arc<LocalDirectory>) -> Self {
        Self::new(directory, None)
    }

    fn issue_session(&self, user_id: &str, email: &str) -> Result<Session, BackendError> {
        let session = Session {
            user_id: user_id.to_string(),
            email: email.to_string(),
            access_token: Some(uuid::Uuid::new_v4().simple().to_string()),
            refresh_token: None,
            expires_at: None,
        };
        if let Some(path) = &self.session_path {
            session_store::save_session(path, &session)?;
        }
        *self.current.lock() = Some(session.clone());
        // No subscribers is fine: the event is simply unobserved.
        let _ = self.events.send(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityService for LocalIdentity {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let session = self.current.lock().clone();
        let Some(session) = session else {
            return Ok(None);
        };
        // A session for an account that no longer exists is stale.
        let exists = self
            .directory
            .with_db(|db| db.get_identity(&session.user_id))?
            .is_some();
        if !exists {
            log::warn!("Dropping session for unknown identity {}", session.user_id);
            *self.current.lock() = None;
            if let Some(path) = &self.session_path {
                session_store::delete_session(path)?;
            }
            return Ok(None);
        }
        Ok(Some(session))
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
        let email = email.trim().to_lowercase();
        if self
            .directory
            .with_db(|db| db.get_identity_by_email(&email))?
            .is_some()
        {
            return Err(BackendError::Conflict("User already registered".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let digest = digest_password(&salt, password);
        let identity = self.directory.with_db(|db| {
            db.insert_identity(&id, &email, &digest, &salt, role_hint.as_str())
        })?;
        log::info!("Registered local identity {} ({})", identity.id, role_hint);

        let session = self.issue_session(&identity.id, &identity.email)?;
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let identity = self
            .directory
            .with_db(|db| db.get_identity_by_email(email))?
            .filter(|identity| password_matches(identity, password))
            .ok_or_else(|| BackendError::InvalidCredentials("Invalid login credentials".into()))?;
        self.issue_session(&identity.id, &identity.email)
    }

    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        _redirect_to: &str,
    ) -> Result<String, BackendError> {
        Err(BackendError::Unsupported(format!(
            "OAuth sign-in with {} needs the hosted backend",
            provider
        )))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        *self.current.lock() = None;
        if let Some(path) = &self.session_path {
            session_store::delete_session(path)?;
        }
        let _ = self.events.send(SessionEvent::SignedOut);
        Ok(())
    }
}
