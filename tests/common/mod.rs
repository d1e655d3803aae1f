//! Shared harness: one local directory, any number of clients on it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;

use leaddesk_lib::backend::{
    BackendError, Backends, BlobStorage, DirectoryStore, Filter, InvitationEmail,
    InviteDispatcher, Order, Row, SessionEvent, Table,
};
use leaddesk_lib::db::LocalDirectory;
use leaddesk_lib::invite::MemoryPendingInvite;
use leaddesk_lib::local::{FsBlobStorage, LocalIdentity, OutboxDispatcher};
use leaddesk_lib::retry::{Backoff, RetryPolicy};
use leaddesk_lib::services::{auth, projects};
use leaddesk_lib::session;
use leaddesk_lib::state::{AppState, Phase};
use leaddesk_lib::types::{Config, Profile, Project};

pub const PASSWORD: &str = "hunter22";

pub struct Workspace {
    pub dir: TempDir,
    pub directory: Arc<LocalDirectory>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(LocalDirectory::open_at(dir.path().join("leaddesk.db")).unwrap());
        Self { dir, directory }
    }

    pub fn config(&self) -> Config {
        Config {
            profile_retry: RetryPolicy {
                max_retries: 3,
                delay_ms: 1_000,
                backoff: Backoff::Fixed,
            },
            ..Config::default()
        }
    }

    /// Backends for one client, sharing this workspace's directory.
    pub fn backends(&self) -> Backends {
        Backends {
            identity: Arc::new(LocalIdentity::in_memory(self.directory.clone())),
            directory: self.directory.clone(),
            storage: Arc::new(FsBlobStorage::new(self.dir.path().join("blobs"))),
            dispatcher: Arc::new(OutboxDispatcher::new(self.dir.path().join("outbox"))),
        }
    }

    pub fn client(&self) -> Client {
        Client::new(self.config(), self.backends())
    }
}

/// One signed-in (or not yet signed-in) user.
pub struct Client {
    pub state: AppState,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Client {
    pub fn new(config: Config, backends: Backends) -> Self {
        let events = backends.identity.subscribe();
        let state = AppState::new(config, backends, Arc::new(MemoryPendingInvite::default()));
        Self { state, events }
    }

    pub async fn sync(&mut self) -> leaddesk_lib::Result<Phase> {
        session::pump(&self.state, &mut self.events).await
    }

    pub async fn sign_up(&mut self, email: &str) -> Profile {
        auth::sign_up(&self.state, email, PASSWORD).await.unwrap();
        assert_eq!(self.sync().await.unwrap(), Phase::Authenticated);
        self.profile()
    }

    pub async fn sign_in(&mut self, email: &str) -> Profile {
        auth::sign_in(&self.state, email, PASSWORD).await.unwrap();
        assert_eq!(self.sync().await.unwrap(), Phase::Authenticated);
        self.profile()
    }

    pub async fn sign_out(&mut self) {
        auth::sign_out(&self.state).await.unwrap();
        assert_eq!(self.sync().await.unwrap(), Phase::Unauthenticated);
    }

    pub fn profile(&self) -> Profile {
        self.state.current_profile().unwrap()
    }

    pub async fn create_project(&self, name: &str) -> Project {
        projects::create_project(&self.state, name, None).await.unwrap()
    }
}

/// Admin with one project, plus a staff member who joined it by invitation.
pub async fn admin_and_staff(ws: &Workspace, project: &str) -> (Client, Client, Project) {
    let mut admin = ws.client();
    admin.sign_up("owner@example.com").await;
    let project = admin.create_project(project).await;
    let link = leaddesk_lib::services::invitations::invite_link(&admin.state, &project.id).unwrap();

    let mut staff = ws.client();
    auth::open_link(&staff.state, &link).await.unwrap();
    staff.sign_up("staff@example.com").await;
    (admin, staff, project)
}

pub struct FailingStorage;

#[async_trait]
impl BlobStorage for FailingStorage {
    async fn upload(&self, _bucket: &str, _key: &str, _bytes: Vec<u8>) -> Result<String, BackendError> {
        Err(BackendError::Status {
            status: 503,
            message: "storage unavailable".into(),
        })
    }
}

pub struct FailingDispatcher;

#[async_trait]
impl InviteDispatcher for FailingDispatcher {
    async fn send(&self, _invitation: &InvitationEmail) -> Result<(), BackendError> {
        Err(BackendError::Http("connection refused".into()))
    }
}

/// Directory whose profile rows only appear after `hidden` profile reads,
/// like a hosted store whose provisioning trigger lags behind sign-up.
pub struct LaggingDirectory {
    pub inner: Arc<LocalDirectory>,
    pub hidden: usize,
    pub profile_reads: AtomicUsize,
}

impl LaggingDirectory {
    pub fn new(inner: Arc<LocalDirectory>, hidden: usize) -> Self {
        Self {
            inner,
            hidden,
            profile_reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.profile_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryStore for LaggingDirectory {
    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Row>, BackendError> {
        if table == Table::Profiles {
            let seen = self.profile_reads.fetch_add(1, Ordering::SeqCst);
            if seen < self.hidden {
                return Ok(Vec::new());
            }
        }
        self.inner.select(table, filters, order).await
    }

    async fn insert(&self, table: Table, record: Row) -> Result<Row, BackendError> {
        self.inner.insert(table, record).await
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Row,
        predicate: &[Filter],
    ) -> Result<Option<Row>, BackendError> {
        self.inner.update(table, id, fields, predicate).await
    }
}

/// Directory that refuses every update to one table, like a store whose
/// row policy rejects the write.
pub struct RefusingDirectory {
    pub inner: Arc<LocalDirectory>,
    pub refused: Table,
}

impl RefusingDirectory {
    pub fn new(inner: Arc<LocalDirectory>, refused: Table) -> Self {
        Self { inner, refused }
    }
}

#[async_trait]
impl DirectoryStore for RefusingDirectory {
    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Row>, BackendError> {
        self.inner.select(table, filters, order).await
    }

    async fn insert(&self, table: Table, record: Row) -> Result<Row, BackendError> {
        self.inner.insert(table, record).await
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Row,
        predicate: &[Filter],
    ) -> Result<Option<Row>, BackendError> {
        if table == self.refused {
            return Err(BackendError::Conflict(format!("update of {} refused", id)));
        }
        self.inner.update(table, id, fields, predicate).await
    }
}
