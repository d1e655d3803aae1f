// Projects service
// Project creation, visibility, and membership management.

use serde_json::{json, Value};

use crate::backend::{DirectoryStore, Filter, Order, Table};
use crate::error::{LeadDeskError, Result};
use crate::policy;
use crate::state::AppState;
use crate::types::{Profile, Project};

use super::{decode, decode_all, row};

/// Read one profile. `Ok(None)` when the row does not exist (yet).
pub async fn fetch_profile(directory: &dyn DirectoryStore, id: &str) -> Result<Option<Profile>> {
    let mut rows = directory
        .select(Table::Profiles, &[Filter::eq("id", id)], None)
        .await?;
    rows.pop().map(decode).transpose()
}

/// Projects visible to `profile`, ordered by name.
pub async fn fetch_visible_projects(
    directory: &dyn DirectoryStore,
    profile: &Profile,
) -> Result<Vec<Project>> {
    let Some(scope) = policy::project_scope(profile) else {
        return Ok(Vec::new());
    };
    let rows = directory
        .select(Table::Projects, &[scope], Some(&Order::asc("name")))
        .await?;
    let candidates: Vec<Project> = decode_all(rows)?;
    Ok(policy::visible_projects(profile, &candidates)
        .into_iter()
        .cloned()
        .collect())
}

/// Full team roster ordered by email.
pub async fn fetch_team(directory: &dyn DirectoryStore) -> Result<Vec<Profile>> {
    let rows = directory
        .select(Table::Profiles, &[], Some(&Order::asc("email")))
        .await?;
    decode_all(rows)
}

fn require_admin(profile: &Profile, action: &'static str) -> Result<()> {
    if policy::can_manage_membership(profile) {
        Ok(())
    } else {
        Err(LeadDeskError::AdminRequired(action))
    }
}

/// The project `project_id` if `admin` owns it.
async fn owned_project(
    directory: &dyn DirectoryStore,
    admin: &Profile,
    project_id: &str,
) -> Result<Project> {
    let mut rows = directory
        .select(
            Table::Projects,
            &[
                Filter::eq("id", project_id),
                Filter::eq("admin_id", admin.id.clone()),
            ],
            None,
        )
        .await?;
    match rows.pop() {
        Some(row) => decode(row),
        None => Err(LeadDeskError::ProjectNotFound(project_id.to_string())),
    }
}

/// Create a project owned by the signed-in admin and join the admin to it.
pub async fn create_project(
    state: &AppState,
    name: &str,
    description: Option<&str>,
) -> Result<Project> {
    let epoch = state.epoch();
    let actor = state.current_profile()?;
    if !policy::can_create_project(&actor) {
        return Err(LeadDeskError::AdminRequired("create projects"));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(LeadDeskError::MissingField("project name"));
    }
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| Value::String(d.to_string()))
        .unwrap_or(Value::Null);

    let directory = state.backends.directory.as_ref();
    let stored = directory
        .insert(
            Table::Projects,
            row([
                ("name", json!(name)),
                ("description", description),
                ("admin_id", json!(actor.id)),
            ]),
        )
        .await?;
    let project: Project = decode(stored)?;
    log::info!("Created project {} ({})", project.name, project.id);

    // The project exists from here on; a failed self-join is reported in
    // the log and retried by the next membership toggle.
    let joined = match directory
        .update(
            Table::Profiles,
            &actor.id,
            row([(
                "assigned_project_ids",
                json!(actor.assignments_with(&project.id)),
            )]),
            &[],
        )
        .await
    {
        Ok(Some(row)) => Some(decode::<Profile>(row)?),
        Ok(None) => {
            log::warn!("Profile {} vanished while joining {}", actor.id, project.id);
            None
        }
        Err(e) => {
            log::warn!("Failed to join creator to project {}: {}", project.id, e);
            None
        }
    };

    state.apply_if_current(epoch, |scope| {
        if !scope.projects.iter().any(|p| p.id == project.id) {
            scope.projects.push(project.clone());
        }
        if scope.invite_target.is_none() {
            scope.invite_target = Some(project.id.clone());
        }
        if let Some(updated) = joined {
            if let Some(member) = scope.team.iter_mut().find(|p| p.id == updated.id) {
                *member = updated.clone();
            }
            scope.profile = Some(updated);
        }
    });
    Ok(project)
}

/// Re-read the visible projects and publish them into the scope.
pub async fn list_visible_projects(state: &AppState) -> Result<Vec<Project>> {
    let epoch = state.epoch();
    let profile = state.current_profile()?;
    let projects = fetch_visible_projects(state.backends.directory.as_ref(), &profile).await?;
    state.apply_if_current(epoch, |scope| {
        scope.projects = projects.clone();
        if scope.invite_target.is_none() {
            scope.invite_target = projects.first().map(|p| p.id.clone());
        }
    });
    Ok(projects)
}

/// Admin team roster, refreshed into the scope.
pub async fn list_team(state: &AppState) -> Result<Vec<Profile>> {
    let epoch = state.epoch();
    let actor = state.current_profile()?;
    require_admin(&actor, "view the team roster")?;
    let team = fetch_team(state.backends.directory.as_ref()).await?;
    state.apply_if_current(epoch, |scope| scope.team = team.clone());
    Ok(team)
}

/// Team members whose assigned set contains `project_id`.
pub async fn list_members(state: &AppState, project_id: &str) -> Result<Vec<Profile>> {
    let team = list_team(state).await?;
    Ok(team
        .into_iter()
        .filter(|p| p.is_assigned(project_id))
        .collect())
}

/// Add `project_id` to the profile's assigned set if absent, remove it if
/// present. Returns the profile as stored afterwards.
pub async fn toggle_membership(
    state: &AppState,
    profile_id: &str,
    project_id: &str,
) -> Result<Profile> {
    let epoch = state.epoch();
    let actor = state.current_profile()?;
    require_admin(&actor, "change project membership")?;

    let directory = state.backends.directory.as_ref();
    owned_project(directory, &actor, project_id).await?;
    let target = fetch_profile(directory, profile_id)
        .await?
        .ok_or_else(|| LeadDeskError::ProfileNotFound(profile_id.to_string()))?;

    let next = target.assignments_toggled(project_id);
    let joined = next.iter().any(|id| id == project_id);
    let updated: Profile = match directory
        .update(
            Table::Profiles,
            profile_id,
            row([("assigned_project_ids", json!(next))]),
            &[],
        )
        .await?
    {
        Some(row) => decode(row)?,
        None => return Err(LeadDeskError::ProfileNotFound(profile_id.to_string())),
    };
    log::info!(
        "{} {} {} project {}",
        actor.email,
        if joined { "added" } else { "removed" },
        updated.email,
        project_id
    );

    state.apply_if_current(epoch, |scope| {
        if let Some(member) = scope.team.iter_mut().find(|p| p.id == updated.id) {
            *member = updated.clone();
        }
    });

    if updated.id == actor.id {
        crate::session::refresh_scope(state).await?;
    }
    Ok(updated)
}

/// Profiles assigned to `project_id`: the owner candidates when editing a lead.
pub async fn project_staff(state: &AppState, project_id: &str) -> Result<Vec<Profile>> {
    let actor = state.current_profile()?;
    if !actor.is_assigned(project_id) {
        return Err(LeadDeskError::PermissionDenied(format!(
            "project {} is outside your assignments",
            project_id
        )));
    }
    let rows = state
        .backends
        .directory
        .select(
            Table::Profiles,
            &[Filter::Contains("assigned_project_ids", json!(project_id))],
            Some(&Order::asc("email")),
        )
        .await?;
    decode_all(rows)
}
