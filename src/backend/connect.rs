//! Build the collaborator bundle the configuration asks for.

use std::path::PathBuf;
use std::sync::Arc;

use super::Backends;
use crate::db::LocalDirectory;
use crate::error::{LeadDeskError, Result};
use crate::local::{FsBlobStorage, LocalIdentity, OutboxDispatcher};
use crate::session_store;
use crate::state::resolve_state_path;
use crate::supabase::SupabaseClient;
use crate::types::{BackendKind, Config};

/// Filesystem locations used by the local backend.
#[derive(Debug, Clone)]
pub struct LocalPaths {
    pub db: PathBuf,
    pub blobs: PathBuf,
    pub outbox: PathBuf,
    /// `None` keeps the session in memory only.
    pub session: Option<PathBuf>,
}

impl LocalPaths {
    pub fn from_config(config: &Config) -> Result<Self> {
        let resolve = |configured: Option<&String>, name: &str| {
            resolve_state_path(configured.map(String::as_str), name)
                .map_err(LeadDeskError::Configuration)
        };
        Ok(Self {
            db: resolve(config.local_db_path.as_ref(), "leaddesk.db")?,
            blobs: resolve(config.blob_dir.as_ref(), "blobs")?,
            outbox: resolve(config.outbox_dir.as_ref(), "outbox")?,
            session: Some(session_store::session_path()?),
        })
    }

    /// Everything under one directory; handy for tests and sandboxes.
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            db: root.join("leaddesk.db"),
            blobs: root.join("blobs"),
            outbox: root.join("outbox"),
            session: Some(root.join("session.json")),
        }
    }
}

/// Local SQLite/filesystem backends at `paths`.
pub fn connect_local(paths: &LocalPaths) -> Result<Backends> {
    let directory = Arc::new(LocalDirectory::open_at(paths.db.clone())?);
    log::info!("Local directory at {}", paths.db.display());
    Ok(Backends {
        identity: Arc::new(LocalIdentity::new(directory.clone(), paths.session.clone())),
        directory,
        storage: Arc::new(FsBlobStorage::new(paths.blobs.clone())),
        dispatcher: Arc::new(OutboxDispatcher::new(paths.outbox.clone())),
    })
}

/// Local backends over an in-memory database. Blobs and mail still go to
/// `scratch` so they can be inspected.
pub fn connect_in_memory(scratch: &std::path::Path) -> Result<Backends> {
    let directory = Arc::new(LocalDirectory::open_in_memory()?);
    Ok(Backends {
        identity: Arc::new(LocalIdentity::in_memory(directory.clone())),
        directory,
        storage: Arc::new(FsBlobStorage::new(scratch.join("blobs"))),
        dispatcher: Arc::new(OutboxDispatcher::new(scratch.join("outbox"))),
    })
}

pub fn connect(config: &Config) -> Result<Backends> {
    match config.backend {
        BackendKind::Local => connect_local(&LocalPaths::from_config(config)?),
        BackendKind::Supabase => {
            let supabase = config.supabase.as_ref().ok_or_else(|| {
                LeadDeskError::Configuration("no supabase section configured".to_string())
            })?;
            let session = session_store::session_path()?;
            let client = Arc::new(SupabaseClient::new(supabase, Some(session))?);
            log::info!("Hosted directory at {}", supabase.url);
            Ok(Backends {
                identity: client.clone(),
                directory: client.clone(),
                storage: client.clone(),
                dispatcher: client,
            })
        }
    }
}
