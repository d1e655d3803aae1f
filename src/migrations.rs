//! Embedded schema history for the local directory database.
//!
//! Every step is a SQL file compiled into the binary. `schema_version` holds
//! one row per step already applied, so opening a database only runs the
//! steps it has not seen.

use rusqlite::{Connection, Transaction};

struct Step {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "baseline",
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Step {
        version: 2,
        name: "lead_contact_unique",
        sql: include_str!("migrations/002_lead_contact_unique.sql"),
    },
];

fn latest_known() -> i32 {
    STEPS.iter().map(|s| s.version).max().unwrap_or(0)
}

fn applied_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Cannot create schema_version: {}", e))?;
    conn.query_row(
        "SELECT IFNULL(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Cannot read schema_version: {}", e))
}

/// Copy a file-backed database to `<path>.v<version>.bak` with `VACUUM INTO`.
/// In-memory databases have nothing to keep.
fn snapshot(conn: &Connection, version: i32) -> Result<(), String> {
    let Some(path) = conn.path().filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    let target = format!("{}.v{}.bak", path, version);
    let _ = std::fs::remove_file(&target);
    conn.execute("VACUUM INTO ?1", [&target])
        .map_err(|e| format!("Cannot snapshot database to {}: {}", target, e))?;
    log::info!("Saved schema v{} snapshot to {}", version, target);
    Ok(())
}

fn apply(tx: &Transaction<'_>, step: &Step) -> rusqlite::Result<()> {
    tx.execute_batch(step.sql)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [step.version],
    )?;
    Ok(())
}

/// Bring the schema up to date and return how many steps ran.
///
/// A database written by a newer build is refused rather than opened.
/// A database that already holds data is snapshotted before it changes.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    let have = applied_version(conn)?;
    let known = latest_known();
    if have > known {
        return Err(format!(
            "schema v{} comes from a newer leaddesk (this build knows up to v{})",
            have, known
        ));
    }

    let todo: Vec<&Step> = STEPS.iter().filter(|s| s.version > have).collect();
    if todo.is_empty() {
        return Ok(0);
    }
    if have > 0 {
        snapshot(conn, have)?;
    }

    for step in &todo {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| format!("Cannot start schema step v{}: {}", step.version, e))?;
        apply(&tx, step)
            .and_then(|()| tx.commit())
            .map_err(|e| format!("Schema step v{} ({}) failed: {}", step.version, step.name, e))?;
        log::info!("Schema at v{} ({})", step.version, step.name);
    }
    Ok(todo.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_database_gets_every_step() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), STEPS.len());
        assert_eq!(applied_version(&conn).unwrap(), 2);
        assert_eq!(run_migrations(&conn).unwrap(), 0);

        let profiles: i32 = conn
            .query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(profiles, 0);
    }

    #[test]
    fn test_identity_insert_provisions_profile() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO identities (id, email, password_digest, salt, role_hint, created_at)
             VALUES ('u1', 'Staff@Example.com', 'x', 'y', 'user', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let (email, role, assigned): (String, String, String) = conn
            .query_row(
                "SELECT email, role, assigned_project_ids FROM profiles WHERE id = 'u1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(email, "staff@example.com");
        assert_eq!(role, "user");
        assert_eq!(assigned, "[]");
    }

    #[test]
    fn test_contact_project_pair_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO profiles (id, email, role) VALUES ('a', 'a@x.com', 'admin');
             INSERT INTO projects (id, name, admin_id) VALUES ('p1', 'Skyline', 'a');
             INSERT INTO projects (id, name, admin_id) VALUES ('p2', 'Harbor', 'a');
             INSERT INTO leads (id, client_name, client_contact, project_id, created_at)
             VALUES ('l1', 'Priya', '911234567890', 'p1', '2026-01-01');
             INSERT INTO leads (id, client_name, client_contact, project_id, created_at)
             VALUES ('l2', 'Priya', '911234567890', 'p2', '2026-01-01');",
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO leads (id, client_name, client_contact, project_id, created_at)
             VALUES ('l3', 'Priya', '911234567890', 'p1', '2026-01-02')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        applied_version(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (42)", [])
            .unwrap();
        let err = run_migrations(&conn).unwrap_err();
        assert!(err.contains("v42"), "{}", err);
    }

    #[test]
    fn test_upgrade_snapshots_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaddesk.db");
        let conn = Connection::open(&path).unwrap();
        applied_version(&conn).unwrap();
        let tx = conn.unchecked_transaction().unwrap();
        apply(&tx, &STEPS[0]).unwrap();
        tx.commit().unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), 1);
        assert!(dir.path().join("leaddesk.db.v1.bak").exists());
    }

    #[test]
    fn test_fresh_file_has_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("fresh.db")).unwrap();
        run_migrations(&conn).unwrap();
        assert!(!dir.path().join("fresh.db.v0.bak").exists());
    }
}
