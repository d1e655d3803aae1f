//! External collaborator boundary.
//!
//! The core only ever talks to the identity provider, the directory store, the
//! blob store and the invitation dispatcher through these traits. Two
//! implementations ship: a local SQLite/filesystem backend (`crate::local`,
//! `crate::db`) and the hosted Supabase backend (`crate::supabase`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::db::DbError;
use crate::types::Role;

mod connect;
pub use connect::{connect, connect_in_memory, connect_local, LocalPaths};

/// One record as exchanged with the directory store, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Errors from any external collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP transport: {0}")]
    Http(String),
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Not supported by this backend: {0}")]
    Unsupported(String),
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => BackendError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => BackendError::Http(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

// =============================================================================
// Directory store
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Projects,
    Leads,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Projects => "projects",
            Table::Leads => "leads",
        }
    }
}

/// Row predicate understood by every directory backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    In(&'static str, Vec<Value>),
    IsNull(&'static str),
    /// Array column contains the given element.
    Contains(&'static str, Value),
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    pub fn is_in<I, V>(column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column, values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &'static str {
        match self {
            Filter::Eq(c, _) | Filter::In(c, _) | Filter::IsNull(c) | Filter::Contains(c, _) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Row>, BackendError>;

    /// Insert and return the stored row (with generated id / timestamps).
    async fn insert(&self, table: Table, record: Row) -> Result<Row, BackendError>;

    /// Update the row `id` only if every filter in `predicate` also holds,
    /// evaluated atomically by the store. `Ok(None)` means no row matched.
    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Row,
        predicate: &[Filter],
    ) -> Result<Option<Row>, BackendError>;
}

// =============================================================================
// Identity service
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

impl SessionEvent {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionEvent::SignedIn(s) | SessionEvent::TokenRefreshed(s) => Some(s),
            SessionEvent::SignedOut => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Signed in immediately; a `SignedIn` event has been emitted.
    SignedIn(Session),
    /// The provider sent a verification mail; no session yet.
    ConfirmationSent { email: String },
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Every login, logout and token refresh is published here.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        role_hint: Role,
    ) -> Result<SignUpOutcome, BackendError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;

    /// Returns the provider URL the user must visit to continue.
    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &str,
    ) -> Result<String, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

// =============================================================================
// Blob storage and invitation dispatch
// =============================================================================

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` and return a URL the object can be fetched from.
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>)
        -> Result<String, BackendError>;
}

/// Payload handed to the dispatcher; field names match the mail function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationEmail {
    pub to: String,
    pub project_name: String,
    pub invite_link: String,
    pub inviter_email: String,
}

#[async_trait]
pub trait InviteDispatcher: Send + Sync {
    async fn send(&self, invitation: &InvitationEmail) -> Result<(), BackendError>;
}

/// The four collaborators bundled for `AppState`.
#[derive(Clone)]
pub struct Backends {
    pub identity: Arc<dyn IdentityService>,
    pub directory: Arc<dyn DirectoryStore>,
    pub storage: Arc<dyn BlobStorage>,
    pub dispatcher: Arc<dyn InviteDispatcher>,
}
