//! LeadDesk core: multi-tenant lead management.
//!
//! Admins own projects and invite staff by link; staff see the leads of the
//! projects they are assigned to and claim unassigned ones. All persistence
//! goes through the collaborator traits in [`backend`], with a local
//! SQLite/filesystem backend and a hosted Supabase backend.

pub mod backend;
pub mod db;
pub mod error;
pub mod helpers;
pub mod invite;
pub mod local;
mod migrations;
pub mod policy;
pub mod retry;
pub mod services;
pub mod session;
pub mod session_store;
pub mod state;
pub mod supabase;
pub mod types;
pub mod util;

pub use error::{LeadDeskError, Result, UserNotice};
pub use state::AppState;
