//! Local backend: SQLite directory, local accounts, filesystem blobs, and a
//! file outbox for invitations. Needs no network.

mod identity;
mod outbox;
mod storage;

pub use identity::LocalIdentity;
pub use outbox::OutboxDispatcher;
pub use storage::FsBlobStorage;
