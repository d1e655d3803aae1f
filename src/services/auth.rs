// Auth service
// Thin validation layer over the identity service. Session changes reach the
// controller through the identity event stream, never from here.

use crate::backend::{Session, SignUpOutcome};
use crate::error::{LeadDeskError, Result};
use crate::helpers::is_plausible_email;
use crate::invite::capture_invite;
use crate::state::{AppState, Phase};
use crate::types::Role;

pub const MIN_PASSWORD_LEN: usize = 6;

fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(LeadDeskError::MissingField("email"));
    }
    if !is_plausible_email(email) {
        return Err(LeadDeskError::Invalid {
            field: "email",
            reason: format!("'{}' is not an email address", email.trim()),
        });
    }
    if password.is_empty() {
        return Err(LeadDeskError::MissingField("password"));
    }
    Ok(())
}

/// Role requested at sign-up: joining through an invitation makes staff,
/// otherwise the new account owns a fresh workspace.
pub fn role_hint(state: &AppState) -> Role {
    if state.pending_invite.get().is_some() {
        Role::User
    } else {
        Role::Admin
    }
}

pub async fn sign_up(state: &AppState, email: &str, password: &str) -> Result<SignUpOutcome> {
    validate_credentials(email, password)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(LeadDeskError::Invalid {
            field: "password",
            reason: format!("use at least {} characters", MIN_PASSWORD_LEN),
        });
    }
    let role = role_hint(state);
    let outcome = state
        .backends
        .identity
        .sign_up(email.trim(), password, role)
        .await
        .map_err(|e| {
            log::warn!("Sign-up failed: {}", e);
            LeadDeskError::from(e)
        })?;
    log::info!("Signed up {} as {}", email.trim(), role);
    Ok(outcome)
}

pub async fn sign_in(state: &AppState, email: &str, password: &str) -> Result<Session> {
    validate_credentials(email, password)?;
    state
        .backends
        .identity
        .sign_in_with_password(email.trim(), password)
        .await
        .map_err(|e| {
            log::warn!("Sign-in failed: {}", e);
            LeadDeskError::from(e)
        })
}

/// Provider URL to visit; the provider redirects back to the app base URL.
pub async fn sign_in_with_oauth(state: &AppState, provider: &str) -> Result<String> {
    let provider = provider.trim();
    if provider.is_empty() {
        return Err(LeadDeskError::MissingField("provider"));
    }
    Ok(state
        .backends
        .identity
        .sign_in_with_oauth(provider, &state.config.app_base_url)
        .await?)
}

/// Sign out. The pending invitation, if any, is kept.
pub async fn sign_out(state: &AppState) -> Result<()> {
    state.backends.identity.sign_out().await?;
    Ok(())
}

/// Handle an opened app URL: capture any invitation, and apply it right away
/// if a session is already active. Returns the URL to display.
pub async fn open_link(state: &AppState, url: &str) -> Result<(String, Option<String>)> {
    let (visible, captured) = capture_invite(url, state.pending_invite.as_ref())?;
    if captured.is_some() && state.phase() == Phase::Authenticated {
        crate::session::refresh_scope(state).await?;
    }
    Ok((visible, captured))
}
