use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::*;

/// A row from the `identities` table (local accounts only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbIdentity {
    pub id: String,
    pub email: String,
    pub password_digest: String,
    pub salt: String,
    pub role_hint: String,
    pub created_at: String,
}

impl DirectoryDb {
    fn map_identity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbIdentity> {
        Ok(DbIdentity {
            id: row.get(0)?,
            email: row.get(1)?,
            password_digest: row.get(2)?,
            salt: row.get(3)?,
            role_hint: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    /// Insert a local account. The provisioning trigger creates the matching
    /// profile row in the same statement.
    pub fn insert_identity(
        &self,
        id: &str,
        email: &str,
        password_digest: &str,
        salt: &str,
        role_hint: &str,
    ) -> Result<DbIdentity, DbError> {
        let now = Utc::now().to_rfc3339();
        self.with_transaction(|db| {
            db.conn
                .execute(
                    "INSERT INTO identities (id, email, password_digest, salt, role_hint, created_at)
                     VALUES (?1, LOWER(?2), ?3, ?4, ?5, ?6)",
                    params![id, email, password_digest, salt, role_hint, now],
                )
                .map_err(DbError::from_write)?;
            db.get_identity(id)?
                .ok_or_else(|| DbError::Constraint(format!("identity {} vanished", id)))
        })
    }

    pub fn get_identity(&self, id: &str) -> Result<Option<DbIdentity>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, email, password_digest, salt, role_hint, created_at
                 FROM identities WHERE id = ?1",
                params![id],
                Self::map_identity_row,
            )
            .optional()?)
    }

    /// Case-insensitive lookup by email.
    pub fn get_identity_by_email(&self, email: &str) -> Result<Option<DbIdentity>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, email, password_digest, salt, role_hint, created_at
                 FROM identities WHERE email = ?1 COLLATE NOCASE",
                params![email.trim()],
                Self::map_identity_row,
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup_by_email() {
        let db = DirectoryDb::open_in_memory().unwrap();
        db.insert_identity("u1", "Staff@Example.com", "digest", "salt", "user")
            .unwrap();
        let found = db.get_identity_by_email("staff@example.COM").unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert_eq!(found.email, "staff@example.com");
        assert!(db.get_identity_by_email("other@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_is_constraint() {
        let db = DirectoryDb::open_in_memory().unwrap();
        db.insert_identity("u1", "a@x.com", "d", "s", "admin").unwrap();
        let err = db.insert_identity("u2", "A@X.com", "d", "s", "admin").unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[test]
    fn test_identity_provisions_profile_row() {
        let db = DirectoryDb::open_in_memory().unwrap();
        db.insert_identity("u1", "a@x.com", "d", "s", "admin").unwrap();
        let rows = db
            .select_rows(Table::Profiles, &[Filter::eq("id", "u1")], None)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["role"], serde_json::json!("admin"));
    }
}
