//! Error types for lead desk operations
//!
//! Errors are classified by how the caller should react:
//! - TransientLag: the profile row has not been provisioned yet; retried locally
//! - Validation: bad input or missing permission; shown to the user, never retried
//! - Rejected: the directory refused a write; the local copy is left as it was
//! - Dependency: an external collaborator failed (upload, network, store)
//! - Internal: configuration or local storage problems

use thiserror::Error;

use crate::backend::BackendError;
use crate::db::DbError;

/// Error types surfaced at the operation boundary
#[derive(Debug, Error)]
pub enum LeadDeskError {
    // Transient lag
    #[error("Profile {0} has not been provisioned yet")]
    ProfileNotProvisioned(String),

    // Validation / authorization
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Only administrators can {0}")]
    AdminRequired(&'static str),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("A lead with contact {contact} already exists in this project")]
    DuplicateLead { contact: String, project_id: String },

    #[error("Lead not found: {0}")]
    LeadNotFound(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    // Write refused by the store
    #[error("Update rejected by the directory: {0}")]
    Rejected(String),

    // Dependent services
    #[error("Image upload failed: {0}")]
    UploadFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Directory store error: {0}")]
    Store(String),

    // Internal
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Local database error: {0}")]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, LeadDeskError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    TransientLag,
    Validation,
    Rejected,
    Dependency,
    Internal,
}

impl LeadDeskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeadDeskError::ProfileNotProvisioned(_) => ErrorKind::TransientLag,
            LeadDeskError::NotAuthenticated
            | LeadDeskError::AdminRequired(_)
            | LeadDeskError::PermissionDenied(_)
            | LeadDeskError::MissingField(_)
            | LeadDeskError::Invalid { .. }
            | LeadDeskError::DuplicateLead { .. }
            | LeadDeskError::LeadNotFound(_)
            | LeadDeskError::ProfileNotFound(_)
            | LeadDeskError::ProjectNotFound(_)
            | LeadDeskError::AuthFailed(_) => ErrorKind::Validation,
            LeadDeskError::Rejected(_) => ErrorKind::Rejected,
            LeadDeskError::UploadFailed(_)
            | LeadDeskError::Network(_)
            | LeadDeskError::Store(_) => ErrorKind::Dependency,
            LeadDeskError::Configuration(_) | LeadDeskError::Db(_) | LeadDeskError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns true if the core itself retries this error.
    ///
    /// Only profile provisioning lag is retried; everything else surfaces once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LeadDeskError::ProfileNotProvisioned(_))
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            LeadDeskError::ProfileNotProvisioned(_) => {
                "Your account is still being set up. Sign in again in a moment."
            }
            LeadDeskError::NotAuthenticated => "Sign in and try again.",
            LeadDeskError::AdminRequired(_) => "Ask a workspace administrator to do this.",
            LeadDeskError::PermissionDenied(_) => {
                "You may not have permission to modify this entry."
            }
            LeadDeskError::MissingField(_) | LeadDeskError::Invalid { .. } => {
                "Correct the highlighted field and submit again."
            }
            LeadDeskError::DuplicateLead { .. } => {
                "This prospect is already registered in the project. Change the contact or project."
            }
            LeadDeskError::LeadNotFound(_) => "Reload the lead list and try again.",
            LeadDeskError::ProfileNotFound(_) => "Reload the team roster and try again.",
            LeadDeskError::ProjectNotFound(_) => "Reload the project list and try again.",
            LeadDeskError::AuthFailed(_) => "Check your email and password.",
            LeadDeskError::Rejected(_) => {
                "The directory refused this change. Reload the entry and try again."
            }
            LeadDeskError::UploadFailed(_) => {
                "The photo could not be uploaded. Try again or submit without it."
            }
            LeadDeskError::Network(_) => "Check your internet connection and try again.",
            LeadDeskError::Store(_) => "The directory is unavailable. Try again later.",
            LeadDeskError::Configuration(_) => "Check your configuration in ~/.leaddesk/config.json",
            LeadDeskError::Db(_) => "Check the local database file and disk space.",
            LeadDeskError::Io(_) => "Check file permissions and disk space.",
        }
    }
}

impl From<std::io::Error> for LeadDeskError {
    fn from(err: std::io::Error) -> Self {
        LeadDeskError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LeadDeskError {
    fn from(err: serde_json::Error) -> Self {
        LeadDeskError::Store(format!("malformed row: {}", err))
    }
}

impl From<BackendError> for LeadDeskError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Http(msg) => LeadDeskError::Network(msg),
            BackendError::Status { status, message } if status == 401 || status == 403 => {
                LeadDeskError::PermissionDenied(message)
            }
            BackendError::Status { status, message } => {
                LeadDeskError::Store(format!("{}: {}", status, message))
            }
            BackendError::Decode(msg) => LeadDeskError::Store(msg),
            BackendError::Unsupported(msg) => LeadDeskError::Invalid {
                field: "operation",
                reason: msg,
            },
            BackendError::InvalidCredentials(msg) => LeadDeskError::AuthFailed(msg),
            BackendError::Conflict(msg) => LeadDeskError::Invalid {
                field: "account",
                reason: msg,
            },
            BackendError::Io(e) => LeadDeskError::Io(e.to_string()),
            BackendError::Db(e) => LeadDeskError::Db(e),
        }
    }
}

/// Serializable error representation for the CLI and any embedding UI
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotice {
    pub message: String,
    pub kind: ErrorKind,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

impl From<&LeadDeskError> for UserNotice {
    fn from(err: &LeadDeskError) -> Self {
        UserNotice {
            message: err.to_string(),
            kind: err.kind(),
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
