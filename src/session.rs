//! Session/profile controller.
//!
//! Consumes identity events and keeps the visibility scope in step:
//!
//! ```text
//! Loading --session created--> resolve profile --ok--> Authenticated
//!                                             \--gave up--> Unauthenticated
//! any     --session destroyed-----------------------------> Unauthenticated
//! ```
//!
//! Profile resolution tolerates the directory's provisioning lag with the
//! configured bounded retry. A pending invitation is applied as a set union
//! and cleared only after the store confirms the write; sign-out leaves it
//! in place.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::backend::{Session, SessionEvent, Table};
use crate::error::{LeadDeskError, Result};
use crate::retry::retry_transient;
use crate::services::projects::{fetch_profile, fetch_team, fetch_visible_projects};
use crate::services::{decode, leads::fetch_leads, row};
use crate::state::{AppState, Phase, VisibilityScope};
use crate::types::{Lead, Profile, Project, ProjectFilter};

/// Fetch the profile for `user_id`, retrying while it has not been
/// provisioned yet.
pub async fn resolve_profile(state: &AppState, user_id: &str) -> Result<Profile> {
    retry_transient(
        &state.config.profile_retry,
        "profile resolution",
        |e: &LeadDeskError| e.is_retryable(),
        |attempt| {
            let directory = state.backends.directory.clone();
            let user_id = user_id.to_string();
            async move {
                log::debug!("Resolving profile {} (attempt {})", user_id, attempt);
                fetch_profile(directory.as_ref(), &user_id)
                    .await?
                    .ok_or_else(|| LeadDeskError::ProfileNotProvisioned(user_id.clone()))
            }
        },
    )
    .await
}

/// Join the pending invitation's project, if any. Never fails: on a store
/// error the invitation stays pending for the next resolution.
pub async fn apply_pending_invite(state: &AppState, profile: Profile) -> Profile {
    let Some(project_id) = state.pending_invite.get() else {
        return profile;
    };

    if profile.is_assigned(&project_id) {
        clear_pending(state, &project_id);
        return profile;
    }

    let fields = row([(
        "assigned_project_ids",
        serde_json::json!(profile.assignments_with(&project_id)),
    )]);
    match state
        .backends
        .directory
        .update(Table::Profiles, &profile.id, fields, &[])
        .await
    {
        Ok(Some(stored)) => match decode::<Profile>(stored) {
            Ok(updated) => {
                log::info!("{} joined project {} by invitation", updated.email, project_id);
                clear_pending(state, &project_id);
                updated
            }
            Err(e) => {
                log::warn!("Joined project {} but could not read profile back: {}", project_id, e);
                profile
            }
        },
        Ok(None) => {
            log::warn!(
                "Profile {} missing while applying invitation {}; keeping it pending",
                profile.id,
                project_id
            );
            profile
        }
        Err(e) => {
            log::warn!(
                "Could not apply invitation {} for {}; keeping it pending: {}",
                project_id,
                profile.id,
                e
            );
            profile
        }
    }
}

fn clear_pending(state: &AppState, project_id: &str) {
    if let Err(e) = state.pending_invite.clear() {
        log::warn!("Failed to clear pending invitation {}: {}", project_id, e);
    }
}

struct LoadedScope {
    projects: Vec<Project>,
    team: Vec<Profile>,
    leads: Vec<Lead>,
}

/// Load everything the profile may see. Each part degrades to empty on error.
async fn load_scope(state: &AppState, profile: &Profile) -> LoadedScope {
    let directory = state.backends.directory.as_ref();
    let projects = fetch_visible_projects(directory, profile)
        .await
        .unwrap_or_else(|e| {
            log::warn!("Failed to load projects for {}: {}", profile.id, e);
            Vec::new()
        });
    let team = if profile.is_admin() {
        fetch_team(directory).await.unwrap_or_else(|e| {
            log::warn!("Failed to load team roster: {}", e);
            Vec::new()
        })
    } else {
        Vec::new()
    };
    let leads = fetch_leads(directory, profile, &ProjectFilter::All)
        .await
        .unwrap_or_else(|e| {
            log::warn!("Failed to load leads for {}: {}", profile.id, e);
            Vec::new()
        });
    LoadedScope {
        projects,
        team,
        leads,
    }
}

async fn resolve_into(state: &AppState, epoch: u64, user_id: &str) -> Result<Phase> {
    let profile = match resolve_profile(state, user_id).await {
        Ok(profile) => profile,
        Err(e) => {
            log::warn!("Profile resolution for {} failed: {}", user_id, e);
            state.apply_if_current(epoch, |scope| {
                *scope = VisibilityScope {
                    phase: Phase::Unauthenticated,
                    epoch,
                    ..VisibilityScope::default()
                };
            });
            return Err(e);
        }
    };
    let profile = apply_pending_invite(state, profile).await;
    let loaded = load_scope(state, &profile).await;

    state.apply_if_current(epoch, |scope| {
        let target = scope
            .invite_target
            .take()
            .filter(|id| loaded.projects.iter().any(|p| &p.id == id))
            .or_else(|| loaded.projects.first().map(|p| p.id.clone()));
        *scope = VisibilityScope {
            phase: Phase::Authenticated,
            profile: Some(profile),
            projects: loaded.projects,
            team: loaded.team,
            leads: loaded.leads,
            epoch,
            invite_target: target,
        };
    });
    Ok(state.phase())
}

pub async fn on_session_created(state: &AppState, session: &Session) -> Result<Phase> {
    let epoch = state.begin_transition(Phase::Loading);
    log::info!("Session for {} ({})", session.email, session.user_id);
    resolve_into(state, epoch, &session.user_id).await
}

/// Drop all session-derived state. The pending invitation survives.
pub fn on_session_destroyed(state: &AppState) -> Phase {
    state.begin_transition(Phase::Unauthenticated);
    log::info!("Signed out");
    Phase::Unauthenticated
}

/// Re-resolve the signed-in profile and reload its scope in place.
pub async fn refresh_scope(state: &AppState) -> Result<Phase> {
    let epoch = state.epoch();
    let profile = state.current_profile()?;
    resolve_into(state, epoch, &profile.id).await
}

pub async fn handle_event(state: &AppState, event: SessionEvent) -> Result<Phase> {
    match event {
        SessionEvent::SignedIn(session) => on_session_created(state, &session).await,
        SessionEvent::TokenRefreshed(session) => {
            let same_user = state
                .current_profile()
                .map(|p| p.id == session.user_id)
                .unwrap_or(false);
            if same_user {
                Ok(Phase::Authenticated)
            } else {
                on_session_created(state, &session).await
            }
        }
        SessionEvent::SignedOut => Ok(on_session_destroyed(state)),
    }
}

/// Resolve whatever session the identity service currently holds.
pub async fn bootstrap(state: &AppState) -> Result<Phase> {
    match state.backends.identity.current_session().await {
        Ok(Some(session)) => on_session_created(state, &session).await,
        Ok(None) => Ok(on_session_destroyed(state)),
        Err(e) => {
            log::warn!("Could not read current session: {}", e);
            on_session_destroyed(state);
            Err(e.into())
        }
    }
}

/// Process every queued event without waiting. Returns the phase after the
/// last event, or the error that event produced.
pub async fn pump(
    state: &AppState,
    events: &mut broadcast::Receiver<SessionEvent>,
) -> Result<Phase> {
    let mut last = Ok(state.phase());
    loop {
        match events.try_recv() {
            Ok(event) => last = handle_event(state, event).await,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(skipped)) => {
                log::warn!("Missed {} session events; resynchronizing", skipped);
                last = bootstrap(state).await;
            }
        }
    }
    last
}

/// Long-lived listener for embedders: handles events until the identity
/// service goes away.
pub async fn run(state: Arc<AppState>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = handle_event(&state, event).await {
                    log::warn!("Session transition failed: {}", e);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Missed {} session events; resynchronizing", skipped);
                if let Err(e) = bootstrap(&state).await {
                    log::warn!("Resynchronization failed: {}", e);
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}
