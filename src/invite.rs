//! Invitation links and the pending-invitation handoff slot.
//!
//! An invitation link is the app base URL with the bare project id in the
//! `invite` query parameter. There is no signature and no expiry: holding the
//! link only lets an authenticated identity *attempt* to join.
//!
//! Lifecycle of the pending slot:
//! - producer: [`capture_invite`] when a link is opened (before or after sign-in)
//! - consumer: profile resolution after sign-in, which clears the slot only once
//!   the membership has been persisted
//! - sign-out leaves the slot untouched

use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LeadDeskError, Result};
use crate::util::{atomic_write_str, restrict_to_owner};

pub const INVITE_PARAM: &str = "invite";

fn parse_base(base_url: &str) -> Result<Url> {
    Url::parse(base_url).map_err(|e| LeadDeskError::Configuration(format!(
        "appBaseUrl '{}' is not a valid URL: {}",
        base_url, e
    )))
}

/// Build the shareable link for `project_id`.
///
/// Other query parameters on the base URL are kept; an existing `invite`
/// parameter is replaced.
pub fn encode_invite_link(base_url: &str, project_id: &str) -> Result<String> {
    if project_id.trim().is_empty() {
        return Err(LeadDeskError::MissingField("project"));
    }
    let mut url = parse_base(base_url)?;
    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != INVITE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(INVITE_PARAM, project_id);
    }
    Ok(url.to_string())
}

/// Extract the project id from an opened URL, if it carries one.
pub fn decode_invite(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == INVITE_PARAM)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The URL as it should be shown after the invitation has been captured.
pub fn strip_invite(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != INVITE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

/// Durable single-slot holder for a pending invitation project id.
pub trait PendingInviteStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, project_id: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Pending slot persisted at `~/.leaddesk/pending_invite.json`.
pub struct FilePendingInvite {
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingInviteFile {
    project_id: String,
    captured_at: String,
}

impl FilePendingInvite {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> Result<PathBuf> {
        crate::util::state_dir()
            .map(|dir| dir.join("pending_invite.json"))
            .map_err(LeadDeskError::Configuration)
    }
}

impl PendingInviteStore for FilePendingInvite {
    fn get(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<PendingInviteFile>(&content) {
            Ok(file) if !file.project_id.trim().is_empty() => Some(file.project_id),
            Ok(_) => None,
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable pending invite at {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    fn set(&self, project_id: &str) -> Result<()> {
        let file = PendingInviteFile {
            project_id: project_id.to_string(),
            captured_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| LeadDeskError::Io(format!("Serialize error: {}", e)))?;
        atomic_write_str(&self.path, &content)?;
        restrict_to_owner(&self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-process pending slot for embedding and tests.
#[derive(Default)]
pub struct MemoryPendingInvite {
    slot: Mutex<Option<String>>,
}

impl PendingInviteStore for MemoryPendingInvite {
    fn get(&self) -> Option<String> {
        self.slot.lock().clone()
    }

    fn set(&self, project_id: &str) -> Result<()> {
        *self.slot.lock() = Some(project_id.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// Link-open handler: stash the invitation (if any) and return the URL with
/// the parameter removed, plus the captured project id.
pub fn capture_invite(
    url: &str,
    store: &dyn PendingInviteStore,
) -> Result<(String, Option<String>)> {
    match decode_invite(url) {
        Some(project_id) => {
            store.set(&project_id)?;
            log::info!("Captured pending invitation for project {}", project_id);
            Ok((strip_invite(url), Some(project_id)))
        }
        None => Ok((url.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for id in [
            "3f1c2b9e-8a7d-4c1e-9b2f-0a1b2c3d4e5f",
            "skyline",
            "id with spaces&amp",
        ] {
            let link = encode_invite_link("http://localhost:3000/", id).unwrap();
            assert_eq!(decode_invite(&link).as_deref(), Some(id));
        }
    }

    #[test]
    fn test_encode_keeps_path_and_other_params() {
        let link = encode_invite_link("https://crm.example.com/app/?ref=mail#top", "p1").unwrap();
        assert_eq!(link, "https://crm.example.com/app/?ref=mail&invite=p1");
    }

    #[test]
    fn test_encode_replaces_existing_invite() {
        let link = encode_invite_link("https://crm.example.com/?invite=old", "new").unwrap();
        assert_eq!(decode_invite(&link).as_deref(), Some("new"));
        assert_eq!(link.matches("invite=").count(), 1);
    }

    #[test]
    fn test_encode_rejects_bad_base() {
        assert!(matches!(
            encode_invite_link("not a url", "p1"),
            Err(LeadDeskError::Configuration(_))
        ));
        assert!(matches!(
            encode_invite_link("http://localhost/", " "),
            Err(LeadDeskError::MissingField(_))
        ));
    }

    #[test]
    fn test_decode_absent_or_empty() {
        assert_eq!(decode_invite("http://localhost:3000/"), None);
        assert_eq!(decode_invite("http://localhost:3000/?invite="), None);
        assert_eq!(decode_invite("garbage"), None);
    }

    #[test]
    fn test_strip_invite() {
        assert_eq!(
            strip_invite("https://crm.example.com/?invite=p1"),
            "https://crm.example.com/"
        );
        assert_eq!(
            strip_invite("https://crm.example.com/?a=1&invite=p1"),
            "https://crm.example.com/?a=1"
        );
    }

    #[test]
    fn test_file_slot_survives_reopen_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_invite.json");
        let slot = FilePendingInvite::new(path.clone());
        assert_eq!(slot.get(), None);
        slot.set("p1").unwrap();

        let reopened = FilePendingInvite::new(path.clone());
        assert_eq!(reopened.get().as_deref(), Some("p1"));

        reopened.clear().unwrap();
        assert_eq!(slot.get(), None);
        assert!(!path.exists());
        reopened.clear().unwrap();
    }

    #[test]
    fn test_capture_invite_stores_and_strips() {
        let slot = MemoryPendingInvite::default();
        let (visible, captured) =
            capture_invite("http://localhost:3000/?invite=p9", &slot).unwrap();
        assert_eq!(visible, "http://localhost:3000/");
        assert_eq!(captured.as_deref(), Some("p9"));
        assert_eq!(slot.get().as_deref(), Some("p9"));

        let (visible, captured) = capture_invite("http://localhost:3000/", &slot).unwrap();
        assert_eq!(visible, "http://localhost:3000/");
        assert_eq!(captured, None);
        assert_eq!(slot.get().as_deref(), Some("p9"));
    }
}
