//! Snapshot database schema and migrations
//!
//! Migrations are embedded and tracked via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: snapshot blobs
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        project_id   INTEGER NOT NULL,
        date         TEXT NOT NULL,
        query_id     INTEGER NOT NULL,
        k            INTEGER NOT NULL,
        kind         TEXT NOT NULL,
        mailer       INTEGER NOT NULL DEFAULT 0,
        body         BLOB NOT NULL,
        created_at   DATETIME NOT NULL,
        PRIMARY KEY (project_id, date, query_id, k, kind, mailer)
    );
    "#,
    // Version 2: body checksums, verified on read
    r#"
    ALTER TABLE snapshots ADD COLUMN sha256 TEXT;
    CREATE INDEX IF NOT EXISTS idx_snapshots_project_date ON snapshots(project_id, date);
    "#,
];

/// Apply every migration newer than the database's user_version.
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running snapshot store migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Snapshot store migrations complete"
        );
    }
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
