//! Authorization policy.
//!
//! Every scoping decision goes through these functions. Admins see the
//! projects they own (`admin_id`); everyone else sees the projects in their
//! assigned set. Leads are always scoped by the assigned set, for every role.

use serde_json::Value;

use crate::backend::Filter;
use crate::types::{Lead, Profile, Project};

/// Store filter selecting the projects `profile` may see.
///
/// `None` means the visible set is empty and the store must not be queried.
pub fn project_scope(profile: &Profile) -> Option<Filter> {
    if profile.is_admin() {
        return Some(Filter::eq("admin_id", profile.id.clone()));
    }
    assigned_filter("id", profile)
}

/// Store filter selecting the leads `profile` may see.
///
/// Role admin does not widen this: an admin's own projects are in their
/// assigned set because project creation joins the creator.
pub fn lead_scope(profile: &Profile) -> Option<Filter> {
    assigned_filter("project_id", profile)
}

fn assigned_filter(column: &'static str, profile: &Profile) -> Option<Filter> {
    if profile.assigned_project_ids.is_empty() {
        return None;
    }
    Some(Filter::In(
        column,
        profile
            .assigned_project_ids
            .iter()
            .cloned()
            .map(Value::String)
            .collect(),
    ))
}

pub fn can_see_project(profile: &Profile, project: &Project) -> bool {
    if profile.is_admin() {
        project.admin_id == profile.id
    } else {
        profile.is_assigned(&project.id)
    }
}

/// Visible project ids out of a candidate list.
pub fn visible_projects<'a>(profile: &Profile, candidates: &'a [Project]) -> Vec<&'a Project> {
    candidates
        .iter()
        .filter(|p| can_see_project(profile, p))
        .collect()
}

pub fn can_see_lead(profile: &Profile, lead: &Lead) -> bool {
    profile.is_assigned(&lead.project_id)
}

/// Claiming needs an unowned lead in one of the claimant's projects.
pub fn can_claim(profile: &Profile, lead: &Lead) -> bool {
    lead.is_unassigned() && can_see_lead(profile, lead)
}

/// Owners edit their own leads; admins edit any lead in their scope.
pub fn can_edit(profile: &Profile, lead: &Lead) -> bool {
    can_see_lead(profile, lead) && (profile.is_admin() || lead.is_owned_by(&profile.id))
}

/// Changing or clearing the owner is an admin override.
pub fn can_reassign(profile: &Profile, lead: &Lead) -> bool {
    profile.is_admin() && can_see_lead(profile, lead)
}

/// Membership toggles, team roster and invitations are admin-only.
pub fn can_manage_membership(profile: &Profile) -> bool {
    profile.is_admin()
}

pub fn can_create_project(profile: &Profile) -> bool {
    profile.is_admin()
}
