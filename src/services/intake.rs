// Intake draft
// Form model for registering a lead. The duplicate check re-runs whenever the
// contact reaches full length or the target project changes.

use serde::Serialize;

use crate::backend::DirectoryStore;
use crate::error::{LeadDeskError, Result};
use crate::helpers::sanitize_contact_input;
use crate::state::AppState;
use crate::types::{Config, Lead, LeadImage, LeadStatus, NewLead, Profile};

pub const DEFAULT_LEAD_SOURCE: &str = "Direct";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateState {
    /// Contact not complete yet; nothing to check.
    Incomplete,
    /// Contact or project changed since the last check.
    Stale,
    Clear,
    /// A lead with this contact exists in the target project.
    Blocked,
}

#[derive(Debug, Clone)]
pub struct IntakeDraft {
    pub lead: NewLead,
    duplicate: DuplicateState,
    country_code: String,
    national_digits: usize,
}

impl IntakeDraft {
    pub fn new(profile: &Profile, config: &Config) -> Self {
        let lead = NewLead {
            lead_source: Some(DEFAULT_LEAD_SOURCE.to_string()),
            status: LeadStatus::New,
            project_id: profile
                .assigned_project_ids
                .first()
                .cloned()
                .unwrap_or_default(),
            ..NewLead::default()
        };
        Self {
            lead,
            duplicate: DuplicateState::Incomplete,
            country_code: config.country_code.clone(),
            national_digits: config.contact_digits,
        }
    }

    pub fn duplicate_state(&self) -> DuplicateState {
        self.duplicate
    }

    pub fn contact_complete(&self) -> bool {
        self.lead.client_contact.len() == self.national_digits
    }

    fn mark_dirty(&mut self) {
        self.duplicate = if self.contact_complete() {
            DuplicateState::Stale
        } else {
            DuplicateState::Incomplete
        };
    }

    /// Store the sanitized contact digits and return them.
    pub fn set_contact(&mut self, raw: &str) -> &str {
        let sanitized = sanitize_contact_input(raw, self.national_digits);
        if sanitized != self.lead.client_contact {
            self.lead.client_contact = sanitized;
            self.mark_dirty();
        }
        &self.lead.client_contact
    }

    pub fn set_project(&mut self, project_id: &str) {
        if project_id != self.lead.project_id {
            self.lead.project_id = project_id.to_string();
            self.mark_dirty();
        }
    }

    pub fn attach_image(&mut self, image: LeadImage) {
        self.lead.image = Some(image);
    }

    /// Canonical stored form of the current contact.
    pub fn canonical_contact(&self) -> String {
        format!("{}{}", self.country_code, self.lead.client_contact)
    }

    /// Re-run the duplicate check if the draft changed since the last one.
    pub async fn refresh_duplicate(
        &mut self,
        directory: &dyn DirectoryStore,
    ) -> Result<DuplicateState> {
        if self.duplicate != DuplicateState::Stale {
            return Ok(self.duplicate);
        }
        if self.lead.project_id.is_empty() {
            return Ok(self.duplicate);
        }
        let exists =
            super::leads::check_duplicate(directory, &self.canonical_contact(), &self.lead.project_id)
                .await?;
        self.duplicate = if exists {
            DuplicateState::Blocked
        } else {
            DuplicateState::Clear
        };
        Ok(self.duplicate)
    }

    pub fn can_submit(&self) -> bool {
        self.duplicate == DuplicateState::Clear
            && !self.lead.client_name.trim().is_empty()
            && !self.lead.project_id.is_empty()
    }

    /// Submit the draft. A blocked draft never reaches the store.
    pub async fn submit(mut self, state: &AppState) -> Result<Lead> {
        if !self.contact_complete() {
            return Err(LeadDeskError::Invalid {
                field: "client_contact",
                reason: format!("enter all {} digits", self.national_digits),
            });
        }
        self.refresh_duplicate(state.backends.directory.as_ref()).await?;
        if self.duplicate == DuplicateState::Blocked {
            return Err(LeadDeskError::DuplicateLead {
                contact: self.canonical_contact(),
                project_id: self.lead.project_id.clone(),
            });
        }
        super::leads::create_lead(state, self.lead).await
    }
}
