//! Session persistence for one-shot CLI invocations.
//!
//! The last identity session is kept in `~/.leaddesk/session.json` (0600) so
//! that consecutive commands behave like one long-lived client session.

use std::path::{Path, PathBuf};

use crate::backend::{BackendError, Session};

/// Default session file location.
pub fn session_path() -> Result<PathBuf, BackendError> {
    crate::util::state_dir()
        .map(|dir| dir.join("session.json"))
        .map_err(|e| BackendError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e)))
}

/// Load the persisted session, if any. A corrupt file counts as signed out.
pub fn load_session(path: &Path) -> Result<Option<Session>, BackendError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Session>(&content) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            log::warn!("Discarding unreadable session file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

pub fn save_session(path: &Path, session: &Session) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let content = serde_json::to_string_pretty(session)?;
    crate::util::atomic_write_str(path, &content)?;
    crate::util::restrict_to_owner(path)?;
    Ok(())
}

pub fn delete_session(path: &Path) -> Result<(), BackendError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            access_token: Some("at".into()),
            refresh_token: Some("rt".into()),
            expires_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        assert_eq!(load_session(&path).unwrap(), None);

        save_session(&path, &session()).unwrap();
        assert_eq!(load_session(&path).unwrap(), Some(session()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        delete_session(&path).unwrap();
        assert_eq!(load_session(&path).unwrap(), None);
        delete_session(&path).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_session(&path).unwrap(), None);
    }
}
