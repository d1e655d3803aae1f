//! Session controller: provisioning lag, restore, and transitions.

mod common;

use std::sync::Arc;

use common::{Client, LaggingDirectory, RefusingDirectory, Workspace, PASSWORD};
use leaddesk_lib::backend::{self, Backends, LocalPaths, SessionEvent, Table};
use leaddesk_lib::invite::MemoryPendingInvite;
use leaddesk_lib::local::LocalIdentity;
use leaddesk_lib::services::{auth, invitations};
use leaddesk_lib::session;
use leaddesk_lib::state::{AppState, Phase};
use leaddesk_lib::types::{Config, Role};
use leaddesk_lib::LeadDeskError;

fn lagging_client(ws: &Workspace, hidden: usize) -> (Client, Arc<LaggingDirectory>) {
    let lagging = Arc::new(LaggingDirectory::new(ws.directory.clone(), hidden));
    let backends = Backends {
        identity: Arc::new(LocalIdentity::in_memory(ws.directory.clone())),
        directory: lagging.clone(),
        ..ws.backends()
    };
    (Client::new(ws.config(), backends), lagging)
}

#[tokio::test(start_paused = true)]
async fn test_profile_lag_is_retried() {
    let ws = Workspace::new();
    let (mut client, lagging) = lagging_client(&ws, 2);

    auth::sign_up(&client.state, "a@example.com", PASSWORD)
        .await
        .unwrap();
    assert_eq!(client.sync().await.unwrap(), Phase::Authenticated);
    assert!(lagging.reads() >= 3);
    assert_eq!(client.profile().role, Role::Admin);
}

#[tokio::test(start_paused = true)]
async fn test_profile_lag_gives_up_after_bounded_retries() {
    let ws = Workspace::new();
    let (mut client, lagging) = lagging_client(&ws, 100);

    auth::sign_up(&client.state, "a@example.com", PASSWORD)
        .await
        .unwrap();
    let err = client.sync().await.unwrap_err();
    assert!(matches!(err, LeadDeskError::ProfileNotProvisioned(_)));
    assert_eq!(lagging.reads(), 4);
    assert_eq!(client.state.phase(), Phase::Unauthenticated);
    assert!(client.state.current_profile().is_err());
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let ws = Workspace::new();
    let mut client = ws.client();
    client.sign_up("a@example.com").await;
    client.sign_out().await;

    let err = auth::sign_in(&client.state, "a@example.com", "not-it")
        .await
        .unwrap_err();
    assert!(matches!(err, LeadDeskError::AuthFailed(_)));
    assert_eq!(client.sync().await.unwrap(), Phase::Unauthenticated);
}

#[tokio::test]
async fn test_sign_up_validation() {
    let ws = Workspace::new();
    let client = ws.client();
    assert!(matches!(
        auth::sign_up(&client.state, "", PASSWORD).await,
        Err(LeadDeskError::MissingField("email"))
    ));
    assert!(matches!(
        auth::sign_up(&client.state, "not-an-email", PASSWORD).await,
        Err(LeadDeskError::Invalid { field: "email", .. })
    ));
    assert!(matches!(
        auth::sign_up(&client.state, "a@example.com", "abc").await,
        Err(LeadDeskError::Invalid { field: "password", .. })
    ));
}

#[tokio::test]
async fn test_token_refresh_for_same_user_keeps_scope() {
    let ws = Workspace::new();
    let mut client = ws.client();
    let profile = client.sign_up("a@example.com").await;
    client.create_project("Skyline").await;
    let epoch = client.state.epoch();

    let session = client
        .state
        .backends
        .identity
        .current_session()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.user_id, profile.id);
    let phase = session::handle_event(&client.state, SessionEvent::TokenRefreshed(session))
        .await
        .unwrap();
    assert_eq!(phase, Phase::Authenticated);
    assert_eq!(client.state.epoch(), epoch);
    assert_eq!(client.state.snapshot().projects.len(), 1);
}

#[tokio::test]
async fn test_late_result_after_sign_out_is_dropped() {
    let ws = Workspace::new();
    let mut client = ws.client();
    client.sign_up("a@example.com").await;
    let stale_epoch = client.state.epoch();

    client.sign_out().await;
    let applied = client
        .state
        .apply_if_current(stale_epoch, |scope| scope.phase = Phase::Authenticated);
    assert!(!applied);
    assert_eq!(client.state.phase(), Phase::Unauthenticated);
}

#[tokio::test]
async fn test_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let paths = LocalPaths::under(dir.path());

    let first_id = {
        let backends = backend::connect_local(&paths).unwrap();
        let mut client = Client::new(Config::default(), backends);
        client.sign_up("a@example.com").await.id
    };

    let backends = backend::connect_local(&paths).unwrap();
    let state = AppState::new(
        Config::default(),
        backends,
        Arc::new(MemoryPendingInvite::default()),
    );
    assert_eq!(state.phase(), Phase::Loading);
    assert_eq!(session::bootstrap(&state).await.unwrap(), Phase::Authenticated);
    assert_eq!(state.current_profile().unwrap().id, first_id);

    auth::sign_out(&state).await.unwrap();
    assert!(!paths.session.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_bootstrap_without_session() {
    let ws = Workspace::new();
    let client = ws.client();
    assert_eq!(
        session::bootstrap(&client.state).await.unwrap(),
        Phase::Unauthenticated
    );
}

#[tokio::test]
async fn test_oauth_unavailable_locally() {
    let ws = Workspace::new();
    let client = ws.client();
    let err = auth::sign_in_with_oauth(&client.state, "google")
        .await
        .unwrap_err();
    assert!(matches!(err, LeadDeskError::Invalid { field: "operation", .. }));
}

#[tokio::test]
async fn test_invitation_stays_pending_when_join_fails() {
    let ws = Workspace::new();
    let mut admin = ws.client();
    admin.sign_up("owner@example.com").await;
    let project = admin.create_project("Skyline").await;
    let link = invitations::invite_link(&admin.state, &project.id).unwrap();

    let backends = Backends {
        directory: Arc::new(RefusingDirectory::new(ws.directory.clone(), Table::Profiles)),
        ..ws.backends()
    };
    let mut staff = Client::new(ws.config(), backends);
    auth::open_link(&staff.state, &link).await.unwrap();
    let profile = staff.sign_up("staff@example.com").await;

    assert!(profile.assigned_project_ids.is_empty());
    assert_eq!(
        staff.state.pending_invite.get().as_deref(),
        Some(project.id.as_str())
    );
}
