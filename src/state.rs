use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::Backends;
use crate::error::{LeadDeskError, Result};
use crate::invite::PendingInviteStore;
use crate::types::{Config, Lead, Profile, Project};

/// Env var overriding the config file location.
pub const CONFIG_ENV: &str = "LEADDESK_CONFIG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Loading,
    Unauthenticated,
    Authenticated,
}

/// Everything derived from the active session. Owned by that session alone
/// and discarded on sign-out.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityScope {
    pub phase: Phase,
    pub profile: Option<Profile>,
    pub projects: Vec<Project>,
    /// Admin team roster, ordered by email. Empty for non-admins.
    pub team: Vec<Profile>,
    pub leads: Vec<Lead>,
    /// Bumped on every session transition; results computed under an older
    /// epoch are dropped.
    #[serde(skip)]
    pub epoch: u64,
    /// Project preselected in the invite form.
    pub invite_target: Option<String>,
}

impl VisibilityScope {
    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == project_id)
    }

    pub fn lead(&self, lead_id: &str) -> Option<&Lead> {
        self.leads.iter().find(|l| l.id == lead_id)
    }

    /// Replace a lead in the local view with the store-confirmed row.
    pub fn merge_lead(&mut self, confirmed: Lead) {
        match self.leads.iter_mut().find(|l| l.id == confirmed.id) {
            Some(slot) => *slot = confirmed,
            None => self.leads.insert(0, confirmed),
        }
    }
}

/// Client session state shared by the controller and the services.
pub struct AppState {
    pub config: Config,
    pub backends: Backends,
    pub pending_invite: Arc<dyn PendingInviteStore>,
    scope: Mutex<VisibilityScope>,
}

impl AppState {
    pub fn new(
        config: Config,
        backends: Backends,
        pending_invite: Arc<dyn PendingInviteStore>,
    ) -> Self {
        Self {
            config,
            backends,
            pending_invite,
            scope: Mutex::new(VisibilityScope::default()),
        }
    }

    /// Clone of the current scope.
    pub fn snapshot(&self) -> VisibilityScope {
        self.scope.lock().clone()
    }

    pub fn phase(&self) -> Phase {
        self.scope.lock().phase
    }

    pub fn epoch(&self) -> u64 {
        self.scope.lock().epoch
    }

    /// The resolved profile of the signed-in identity.
    pub fn current_profile(&self) -> Result<Profile> {
        let guard = self.scope.lock();
        match (&guard.phase, &guard.profile) {
            (Phase::Authenticated, Some(profile)) => Ok(profile.clone()),
            _ => Err(LeadDeskError::NotAuthenticated),
        }
    }

    /// Start a session transition: clear derived state, enter `phase`, and
    /// return the new epoch.
    pub fn begin_transition(&self, phase: Phase) -> u64 {
        let mut guard = self.scope.lock();
        let epoch = guard.epoch.wrapping_add(1);
        *guard = VisibilityScope {
            phase,
            epoch,
            ..VisibilityScope::default()
        };
        epoch
    }

    /// Apply `f` only if no transition happened since `epoch` was read.
    pub fn apply_if_current(&self, epoch: u64, f: impl FnOnce(&mut VisibilityScope)) -> bool {
        let mut guard = self.scope.lock();
        if guard.epoch != epoch {
            log::debug!(
                "Dropping late result from epoch {} (now {})",
                epoch,
                guard.epoch
            );
            return false;
        }
        f(&mut guard);
        true
    }
}

/// Config file path: `$LEADDESK_CONFIG` or `~/.leaddesk/config.json`.
pub fn config_path() -> std::result::Result<PathBuf, String> {
    if let Ok(custom) = std::env::var(CONFIG_ENV) {
        if !custom.trim().is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }
    Ok(crate::util::state_dir()?.join("config.json"))
}

/// Load configuration. A missing file yields the defaults.
pub fn load_config(path: &std::path::Path) -> std::result::Result<Config, String> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;

    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> std::result::Result<(), String> {
    if url::Url::parse(&config.app_base_url).is_err() {
        return Err(format!("appBaseUrl is not a URL: {}", config.app_base_url));
    }
    if config.country_code.is_empty() || !config.country_code.chars().all(|c| c.is_ascii_digit())
    {
        return Err(format!("countryCode must be digits: {:?}", config.country_code));
    }
    if config.contact_digits == 0 {
        return Err("contactDigits must be positive".to_string());
    }
    if config.backend == crate::types::BackendKind::Supabase && config.supabase.is_none() {
        return Err("backend is \"supabase\" but no supabase section is configured".to_string());
    }
    Ok(())
}

pub fn save_config(path: &std::path::Path, config: &Config) -> std::result::Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    crate::util::atomic_write_str(path, &content)
        .map_err(|e| format!("Failed to write config: {}", e))
}

/// Create or update the config file.
///
/// Loads the existing file (or defaults on first run), applies the mutator,
/// and writes the result back atomically.
pub fn create_or_update_config(
    path: &std::path::Path,
    mutator: impl FnOnce(&mut Config),
) -> std::result::Result<Config, String> {
    let mut config = load_config(path)?;
    mutator(&mut config);
    validate_config(&config)?;
    save_config(path, &config)?;
    Ok(config)
}

/// Resolve a configured path, falling back to `~/.leaddesk/<default_name>`.
pub fn resolve_state_path(
    configured: Option<&str>,
    default_name: &str,
) -> std::result::Result<PathBuf, String> {
    match configured {
        Some(p) if !p.trim().is_empty() => Ok(expand_home(p)),
        _ => Ok(crate::util::state_dir()?.join(default_name)),
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
