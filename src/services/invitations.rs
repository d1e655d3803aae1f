// Invitations service
// Invite links and invitation email, with a mailto fallback when the
// dispatcher is unavailable.

use serde::Serialize;

use crate::backend::InvitationEmail;
use crate::error::{LeadDeskError, Result};
use crate::helpers::is_plausible_email;
use crate::invite::encode_invite_link;
use crate::policy;
use crate::state::AppState;

/// Used in the email when the project is not in the local view.
pub const GENERIC_PROJECT_LABEL: &str = "our lead management workspace";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum InviteOutcome {
    Dispatched { to: String, invite_link: String },
    /// The dispatcher failed; hand `mailto` to the local mail client.
    Fallback {
        to: String,
        invite_link: String,
        mailto: String,
    },
}

/// Shareable join link for a project.
pub fn invite_link(state: &AppState, project_id: &str) -> Result<String> {
    let actor = state.current_profile()?;
    if !policy::can_manage_membership(&actor) {
        return Err(LeadDeskError::AdminRequired("invite staff"));
    }
    encode_invite_link(&state.config.app_base_url, project_id)
}

/// Percent-encode for a mailto header value (spaces as `%20`).
fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// `mailto:` URL carrying a prefilled subject and body.
pub fn mailto_link(to: &str, project_name: &str, invite_link: &str) -> String {
    let subject = format!("Invitation to join project: {}", project_name);
    let body = format!(
        "Hello,\n\nYou have been invited to join the \"{}\" project on LeadDesk.\n\nAccess link: {}\n",
        project_name, invite_link
    );
    format!(
        "mailto:{}?subject={}&body={}",
        to,
        encode_component(&subject),
        encode_component(&body)
    )
}

/// Email an invitation for `project_id` (or the default invite target).
pub async fn send_invite(
    state: &AppState,
    email: &str,
    project_id: Option<&str>,
) -> Result<InviteOutcome> {
    let actor = state.current_profile()?;
    if !policy::can_manage_membership(&actor) {
        return Err(LeadDeskError::AdminRequired("invite staff"));
    }
    let to = email.trim();
    if to.is_empty() {
        return Err(LeadDeskError::MissingField("email"));
    }
    if !is_plausible_email(to) {
        return Err(LeadDeskError::Invalid {
            field: "email",
            reason: format!("'{}' is not an email address", to),
        });
    }

    let scope = state.snapshot();
    let project_id = project_id
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or(scope.invite_target.clone())
        .ok_or(LeadDeskError::MissingField("project"))?;
    let project_name = scope
        .project(&project_id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| GENERIC_PROJECT_LABEL.to_string());
    let link = encode_invite_link(&state.config.app_base_url, &project_id)?;

    let invitation = InvitationEmail {
        to: to.to_string(),
        project_name: project_name.clone(),
        invite_link: link.clone(),
        inviter_email: actor.email.clone(),
    };
    match state.backends.dispatcher.send(&invitation).await {
        Ok(()) => {
            log::info!("Invitation for {} sent to {}", project_id, to);
            Ok(InviteOutcome::Dispatched {
                to: to.to_string(),
                invite_link: link,
            })
        }
        Err(e) => {
            log::warn!("Invitation dispatch failed, falling back to mailto: {}", e);
            Ok(InviteOutcome::Fallback {
                to: to.to_string(),
                mailto: mailto_link(to, &project_name, &link),
                invite_link: link,
            })
        }
    }
}
