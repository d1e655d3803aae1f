// Leads service
// Listing, claiming, editing and intake of leads. Local state is only ever
// updated from rows the directory store has confirmed.

use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::{BackendError, DirectoryStore, Filter, Order, Row, Table};
use crate::error::{LeadDeskError, Result};
use crate::helpers::{file_extension, is_plausible_email, lead_matches_search, normalize_contact};
use crate::policy;
use crate::state::AppState;
use crate::types::{Lead, LeadPatch, NewLead, Profile, ProjectFilter};

use super::{decode, decode_all};

/// Leads visible to `profile`, newest first.
///
/// An empty assigned set returns nothing without touching the store.
pub async fn fetch_leads(
    directory: &dyn DirectoryStore,
    profile: &Profile,
    filter: &ProjectFilter,
) -> Result<Vec<Lead>> {
    let Some(scope) = policy::lead_scope(profile) else {
        return Ok(Vec::new());
    };
    let mut filters = vec![scope];
    if let ProjectFilter::Only(project_id) = filter {
        if !profile.is_assigned(project_id) {
            return Ok(Vec::new());
        }
        filters.push(Filter::eq("project_id", project_id.clone()));
    }
    let rows = directory
        .select(Table::Leads, &filters, Some(&Order::desc("created_at")))
        .await?;
    decode_all(rows)
}

async fn fetch_lead(directory: &dyn DirectoryStore, lead_id: &str) -> Result<Option<Lead>> {
    let mut rows = directory
        .select(Table::Leads, &[Filter::eq("id", lead_id)], None)
        .await?;
    rows.pop().map(decode).transpose()
}

/// Load the lead list into the scope and return it.
pub async fn load_leads(state: &AppState, filter: &ProjectFilter) -> Result<Vec<Lead>> {
    let epoch = state.epoch();
    let profile = state.current_profile()?;
    let leads = fetch_leads(state.backends.directory.as_ref(), &profile, filter).await?;
    state.apply_if_current(epoch, |scope| scope.leads = leads.clone());
    Ok(leads)
}

/// Text filter applied after retrieval.
pub fn search(leads: &[Lead], query: &str) -> Vec<Lead> {
    leads
        .iter()
        .filter(|lead| lead_matches_search(lead, query))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "lead")]
pub enum ClaimOutcome {
    /// The store accepted this claim.
    Claimed(Lead),
    /// Someone else owned the lead first; this is the authoritative row.
    AlreadyOwned(Lead),
}

impl ClaimOutcome {
    pub fn lead(&self) -> &Lead {
        match self {
            ClaimOutcome::Claimed(lead) | ClaimOutcome::AlreadyOwned(lead) => lead,
        }
    }
}

/// Take ownership of an unowned lead.
///
/// The store applies `user_id IS NULL` in the same update, so of two racing
/// claims exactly one wins. The loser reconciles to the stored row.
pub async fn claim(state: &AppState, lead_id: &str) -> Result<ClaimOutcome> {
    let epoch = state.epoch();
    let actor = state.current_profile()?;
    let directory = state.backends.directory.as_ref();

    let known = match state.snapshot().lead(lead_id).cloned() {
        Some(lead) => lead,
        None => fetch_lead(directory, lead_id)
            .await?
            .ok_or_else(|| LeadDeskError::LeadNotFound(lead_id.to_string()))?,
    };
    if !policy::can_see_lead(&actor, &known) {
        return Err(LeadDeskError::PermissionDenied(format!(
            "lead {} is outside your projects",
            lead_id
        )));
    }

    let mut fields = Row::new();
    fields.insert("user_id".into(), json!(actor.id));
    let claimed = directory
        .update(Table::Leads, lead_id, fields, &[Filter::IsNull("user_id")])
        .await?;

    let outcome = match claimed {
        Some(row) => {
            let lead: Lead = decode(row)?;
            log::info!("{} claimed lead {}", actor.email, lead.id);
            ClaimOutcome::Claimed(lead)
        }
        None => {
            let current = fetch_lead(directory, lead_id)
                .await?
                .ok_or_else(|| LeadDeskError::LeadNotFound(lead_id.to_string()))?;
            log::info!(
                "Claim on lead {} rejected; owned by {:?}",
                lead_id,
                current.user_id
            );
            ClaimOutcome::AlreadyOwned(current)
        }
    };

    let confirmed = outcome.lead().clone();
    state.apply_if_current(epoch, |scope| scope.merge_lead(confirmed));
    Ok(outcome)
}

/// Apply a partial edit. The lead must be in the local view; the local copy
/// is replaced with the store's row only after the store accepts the write.
pub async fn update_lead(state: &AppState, lead_id: &str, patch: LeadPatch) -> Result<Lead> {
    let epoch = state.epoch();
    let actor = state.current_profile()?;
    if patch.is_empty() {
        return Err(LeadDeskError::MissingField("at least one change"));
    }
    let current = state
        .snapshot()
        .lead(lead_id)
        .cloned()
        .ok_or_else(|| LeadDeskError::LeadNotFound(lead_id.to_string()))?;

    if !policy::can_edit(&actor, &current) {
        return Err(LeadDeskError::PermissionDenied(format!(
            "you may not modify lead {}",
            lead_id
        )));
    }
    if let Some(name) = &patch.client_name {
        if name.trim().is_empty() {
            return Err(LeadDeskError::MissingField("client name"));
        }
    }

    let directory = state.backends.directory.as_ref();
    if let Some(owner) = &patch.user_id {
        if !policy::can_reassign(&actor, &current) {
            return Err(LeadDeskError::AdminRequired("reassign leads"));
        }
        if let Some(owner_id) = owner {
            let assigned = super::projects::fetch_profile(directory, owner_id)
                .await?
                .is_some_and(|p| p.is_assigned(&current.project_id));
            if !assigned {
                return Err(LeadDeskError::Invalid {
                    field: "user_id",
                    reason: format!("{} is not assigned to this project", owner_id),
                });
            }
        }
    }

    let stored = directory
        .update(Table::Leads, lead_id, patch.to_fields(), &[])
        .await
        .map_err(|e| match e {
            BackendError::Conflict(msg) => LeadDeskError::Rejected(msg),
            other => other.into(),
        })?;
    let updated: Lead = match stored {
        Some(row) => decode(row)?,
        None => return Err(LeadDeskError::LeadNotFound(lead_id.to_string())),
    };
    log::info!("{} updated lead {}", actor.email, lead_id);

    let confirmed = updated.clone();
    state.apply_if_current(epoch, |scope| scope.merge_lead(confirmed));
    Ok(updated)
}

/// True when a lead with this canonical contact already exists in the project.
pub async fn check_duplicate(
    directory: &dyn DirectoryStore,
    canonical_contact: &str,
    project_id: &str,
) -> Result<bool> {
    let rows = directory
        .select(
            Table::Leads,
            &[
                Filter::eq("client_contact", canonical_contact),
                Filter::eq("project_id", project_id),
            ],
            None,
        )
        .await?;
    Ok(!rows.is_empty())
}

fn optional(value: &Option<String>) -> Value {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Value::String(v.to_string()),
        _ => Value::Null,
    }
}

/// Intake: normalize, refuse duplicates, upload the photo, then insert.
///
/// The creator becomes the owner. If the upload fails nothing is inserted.
/// If the insert fails after a successful upload the object is left behind
/// and logged.
pub async fn create_lead(state: &AppState, new: NewLead) -> Result<Lead> {
    let epoch = state.epoch();
    let actor = state.current_profile()?;
    let config = &state.config;

    let client_name = new.client_name.trim();
    if client_name.is_empty() {
        return Err(LeadDeskError::MissingField("client name"));
    }
    let project_id = new.project_id.trim();
    if project_id.is_empty() {
        return Err(LeadDeskError::MissingField("project"));
    }
    if !actor.is_assigned(project_id) {
        return Err(LeadDeskError::PermissionDenied(format!(
            "project {} is outside your assignments",
            project_id
        )));
    }
    if let Some(email) = new.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        if !is_plausible_email(email) {
            return Err(LeadDeskError::Invalid {
                field: "email",
                reason: format!("'{}' is not an email address", email),
            });
        }
    }
    let contact = normalize_contact(&new.client_contact, &config.country_code, config.contact_digits)?;

    let directory = state.backends.directory.as_ref();
    let duplicate = || LeadDeskError::DuplicateLead {
        contact: contact.clone(),
        project_id: project_id.to_string(),
    };
    if check_duplicate(directory, &contact, project_id).await? {
        return Err(duplicate());
    }

    let image_url = match &new.image {
        Some(image) => {
            let key = format!(
                "{}/{}.{}",
                actor.id,
                uuid::Uuid::new_v4(),
                file_extension(&image.file_name).unwrap_or_else(|| "bin".to_string())
            );
            let url = state
                .backends
                .storage
                .upload(&config.image_bucket, &key, image.bytes.clone())
                .await
                .map_err(|e| {
                    log::warn!("Image upload for new lead failed: {}", e);
                    LeadDeskError::UploadFailed(e.to_string())
                })?;
            Some(url)
        }
        None => None,
    };

    let mut record = Row::new();
    record.insert("client_name".into(), json!(client_name));
    record.insert("client_contact".into(), json!(contact));
    record.insert("email".into(), optional(&new.email));
    record.insert("city".into(), optional(&new.city));
    record.insert("profession".into(), optional(&new.profession));
    record.insert("budget".into(), optional(&new.budget));
    record.insert("pref_location".into(), optional(&new.pref_location));
    record.insert("lead_source".into(), optional(&new.lead_source));
    record.insert("status".into(), json!(new.status.as_str()));
    record.insert("prop_pref".into(), optional(&new.prop_pref));
    record.insert("notes".into(), optional(&new.notes));
    record.insert("client_image_url".into(), optional(&image_url));
    record.insert("user_id".into(), json!(actor.id));
    record.insert("project_id".into(), json!(project_id));

    let stored = match directory.insert(Table::Leads, record).await {
        Ok(row) => row,
        Err(e) => {
            if let Some(url) = &image_url {
                log::warn!("Lead insert failed; uploaded image left unreferenced: {}", url);
            }
            return Err(match e {
                BackendError::Conflict(_) => duplicate(),
                other => other.into(),
            });
        }
    };
    let lead: Lead = decode(stored)?;
    log::info!("{} registered lead {} in {}", actor.email, lead.id, project_id);

    let confirmed = lead.clone();
    state.apply_if_current(epoch, |scope| scope.merge_lead(confirmed));
    Ok(lead)
}

/// Admin dashboard counters over the visible lead list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadMetrics {
    pub total_leads: usize,
    pub unassigned: usize,
    pub booked_or_closed: usize,
    pub projects: usize,
}

impl LeadMetrics {
    pub fn compute(leads: &[Lead], project_count: usize) -> Self {
        Self {
            total_leads: leads.len(),
            unassigned: leads.iter().filter(|l| l.is_unassigned()).count(),
            booked_or_closed: leads.iter().filter(|l| l.status.is_won()).count(),
            projects: project_count,
        }
    }
}

pub async fn lead_metrics(state: &AppState) -> Result<LeadMetrics> {
    let actor = state.current_profile()?;
    if !actor.is_admin() {
        return Err(LeadDeskError::AdminRequired("view lead metrics"));
    }
    let leads = load_leads(state, &ProjectFilter::All).await?;
    let projects = state.snapshot().projects.len();
    Ok(LeadMetrics::compute(&leads, projects))
}
