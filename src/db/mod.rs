//! SQLite-backed local directory store.
//!
//! The database lives at `~/.leaddesk/leaddesk.db` unless `localDbPath` is
//! configured. It plays the role the hosted relational store plays in
//! production: it persists profiles, projects and leads, provisions a profile
//! row for every new identity (trigger), and executes conditional updates
//! atomically inside a single `UPDATE ... WHERE` statement.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::backend::{BackendError, DirectoryStore, Filter, Order, Row, Table};

pub mod identities;
mod rows;
pub mod types;
pub use types::*;

/// How long a writer waits on another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DirectoryDb {
    conn: Connection,
}

impl DirectoryDb {
    /// Run `f` inside an immediate transaction: committed on `Ok`, rolled
    /// back on `Err`.
    pub(crate) fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL lets the CLI read while another invocation writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::prepare(conn)
    }

    /// Private in-memory database, used by tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DbError> {
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }
}

/// `DirectoryStore` over a shared `DirectoryDb`.
///
/// `rusqlite::Connection` is not `Sync`; calls are short and never hold the
/// lock across an await point.
pub struct LocalDirectory {
    db: Mutex<DirectoryDb>,
}

impl LocalDirectory {
    pub fn new(db: DirectoryDb) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        Ok(Self::new(DirectoryDb::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self::new(DirectoryDb::open_in_memory()?))
    }

    /// Run `f` with exclusive access to the database.
    pub fn with_db<T>(&self, f: impl FnOnce(&DirectoryDb) -> T) -> T {
        let guard = self.db.lock();
        f(&guard)
    }
}

fn lift(err: DbError) -> BackendError {
    match err {
        DbError::Constraint(msg) => BackendError::Conflict(msg),
        other => BackendError::Db(other),
    }
}

#[async_trait]
impl DirectoryStore for LocalDirectory {
    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Row>, BackendError> {
        self.with_db(|db| db.select_rows(table, filters, order))
            .map_err(lift)
    }

    async fn insert(&self, table: Table, record: Row) -> Result<Row, BackendError> {
        self.with_db(|db| db.insert_row(table, record)).map_err(lift)
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Row,
        predicate: &[Filter],
    ) -> Result<Option<Row>, BackendError> {
        self.with_db(|db| db.update_row(table, id, fields, predicate))
            .map_err(lift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> DirectoryDb {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("directory_test.db");
        std::mem::forget(dir);
        DirectoryDb::open_at(path).expect("open test db")
    }

    #[test]
    fn test_open_applies_schema() {
        let db = test_db();
        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))
            .expect("leads table");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|db| {
            db.conn.execute(
                "INSERT INTO profiles (id, email, role) VALUES ('x', 'x@y.com', 'user')",
                [],
            )?;
            Err(DbError::Migration("boom".into()))
        });
        assert!(result.is_err());
        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_surfaces_as_conflict() {
        let store = LocalDirectory::open_in_memory().unwrap();
        let mut admin = Row::new();
        admin.insert("id".into(), json!("a"));
        admin.insert("email".into(), json!("a@x.com"));
        admin.insert("role".into(), json!("admin"));
        store.insert(Table::Profiles, admin.clone()).await.unwrap();
        let err = store.insert(Table::Profiles, admin).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
    }
}
