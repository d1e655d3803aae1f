use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Configuration stored in ~/.leaddesk/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Origin + path that invitation links are built on.
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_db_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase: Option<SupabaseConfig>,
    #[serde(default = "default_image_bucket")]
    pub image_bucket: String,
    /// Country calling code prefixed onto national contact numbers.
    #[serde(default = "default_country_code")]
    pub country_code: String,
    /// Number of national digits in a complete contact number.
    #[serde(default = "default_contact_digits")]
    pub contact_digits: usize,
    #[serde(default = "RetryPolicy::profile_resolution")]
    pub profile_retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_base_url: default_app_base_url(),
            backend: BackendKind::default(),
            local_db_path: None,
            blob_dir: None,
            outbox_dir: None,
            supabase: None,
            image_bucket: default_image_bucket(),
            country_code: default_country_code(),
            contact_digits: default_contact_digits(),
            profile_retry: RetryPolicy::profile_resolution(),
        }
    }
}

fn default_app_base_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_image_bucket() -> String {
    "lead-images".to_string()
}

fn default_country_code() -> String {
    "91".to_string()
}

fn default_contact_digits() -> usize {
    10
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Supabase,
}

/// Hosted backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_invite_function")]
    pub invite_function: String,
}

fn default_invite_function() -> String {
    "send-invitation".to_string()
}

// =============================================================================
// Directory records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `profiles`: an authenticated identity and its project assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub assigned_project_ids: Vec<String>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_assigned(&self, project_id: &str) -> bool {
        self.assigned_project_ids.iter().any(|id| id == project_id)
    }

    /// Assigned set with `project_id` added. Existing order is kept and the id
    /// is never duplicated.
    pub fn assignments_with(&self, project_id: &str) -> Vec<String> {
        let mut ids = self.assignments_deduped();
        if !ids.iter().any(|id| id == project_id) {
            ids.push(project_id.to_string());
        }
        ids
    }

    /// Assigned set with `project_id` added if absent, removed if present.
    pub fn assignments_toggled(&self, project_id: &str) -> Vec<String> {
        if self.is_assigned(project_id) {
            self.assignments_deduped()
                .into_iter()
                .filter(|id| id != project_id)
                .collect()
        } else {
            self.assignments_with(project_id)
        }
    }

    fn assignments_deduped(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.assigned_project_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

/// One row of `projects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub admin_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    #[default]
    New,
    Interested,
    #[serde(rename = "Following Up")]
    FollowingUp,
    Booked,
    Closed,
    Dead,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::New,
        LeadStatus::Interested,
        LeadStatus::FollowingUp,
        LeadStatus::Booked,
        LeadStatus::Closed,
        LeadStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "New",
            LeadStatus::Interested => "Interested",
            LeadStatus::FollowingUp => "Following Up",
            LeadStatus::Booked => "Booked",
            LeadStatus::Closed => "Closed",
            LeadStatus::Dead => "Dead",
        }
    }

    pub fn is_won(&self) -> bool {
        matches!(self, LeadStatus::Booked | LeadStatus::Closed)
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    /// Accepts the display label or a loose form ("following-up", "booked").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str().replace(' ', "").to_lowercase() == key)
            .ok_or_else(|| format!("unknown lead status '{}'", s))
    }
}

/// One row of `leads`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub client_name: String,
    /// Canonical country-prefixed digits, e.g. `911234567890`.
    pub client_contact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pref_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_source: Option<String>,
    #[serde(default)]
    pub status: LeadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop_pref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_image_url: Option<String>,
    /// Owning profile; `None` means the lead sits in the unassigned pool.
    pub user_id: Option<String>,
    pub project_id: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Lead {
    pub fn is_unassigned(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn is_owned_by(&self, profile_id: &str) -> bool {
        self.user_id.as_deref() == Some(profile_id)
    }
}

/// Intake payload for a new lead. `client_contact` is raw operator input.
#[derive(Debug, Clone, Default)]
pub struct NewLead {
    pub client_name: String,
    pub client_contact: String,
    pub email: Option<String>,
    pub city: Option<String>,
    pub profession: Option<String>,
    pub budget: Option<String>,
    pub pref_location: Option<String>,
    pub lead_source: Option<String>,
    pub status: LeadStatus,
    pub prop_pref: Option<String>,
    pub notes: Option<String>,
    pub project_id: String,
    pub image: Option<LeadImage>,
}

/// Photo attached at intake; uploaded before the lead row is inserted.
#[derive(Debug, Clone)]
pub struct LeadImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Partial edit of a lead. Only the fields an editor may change.
///
/// `user_id: Some(None)` moves the lead back to the unassigned pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadPatch {
    pub status: Option<LeadStatus>,
    pub user_id: Option<Option<String>>,
    pub client_name: Option<String>,
    pub notes: Option<String>,
    pub budget: Option<String>,
}

impl LeadPatch {
    pub fn is_empty(&self) -> bool {
        self == &LeadPatch::default()
    }

    /// Store fields for this patch, keyed by `leads` column name.
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        if let Some(status) = self.status {
            fields.insert("status".into(), status.as_str().into());
        }
        if let Some(owner) = &self.user_id {
            fields.insert(
                "user_id".into(),
                owner
                    .clone()
                    .map(serde_json::Value::String)
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        if let Some(name) = &self.client_name {
            fields.insert("client_name".into(), name.clone().into());
        }
        if let Some(notes) = &self.notes {
            fields.insert("notes".into(), notes.clone().into());
        }
        if let Some(budget) = &self.budget {
            fields.insert("budget".into(), budget.clone().into());
        }
        fields
    }
}

/// Sentinel accepted anywhere a project filter is parsed from user input.
pub const ALL_PROJECTS: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProjectFilter {
    #[default]
    All,
    Only(String),
}

impl ProjectFilter {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") | Some(ALL_PROJECTS) => ProjectFilter::All,
            Some(id) => ProjectFilter::Only(id.to_string()),
        }
    }
}
