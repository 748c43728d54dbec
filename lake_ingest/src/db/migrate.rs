//! Embedded schema migrations for the manifest database.

use anyhow::anyhow;
use diesel::connection::SimpleConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::db::connection::connect_sqlite;

/// Embedded Diesel migrations bundled with this crate.
///
/// These are applied by [`run_sqlite`] to bring the database schema up to date.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending Diesel migrations on a SQLite database at the given URL.
///
/// Sets WAL journaling first so the file is created in the mode every later
/// connection expects.
pub fn run_sqlite(url: &str) -> anyhow::Result<()> {
    let mut conn = connect_sqlite(url)?;
    conn.batch_execute("PRAGMA journal_mode=WAL;")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    tracing::debug!(applied = applied.len(), "manifest migrations applied");

    Ok(())
}

/// Runs pending migrations for the given database URL.
///
/// Only SQLite is supported (single-node execution model); server URLs are rejected
/// rather than silently treated as file paths.
pub fn run_all(database_url: &str) -> anyhow::Result<()> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        anyhow::bail!("Unsupported DATABASE_URL (SQLite only): {database_url}");
    }
    run_sqlite(database_url)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn migrations_apply_on_temp_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let path = temp.path().to_string_lossy().to_string();

        run_sqlite(&path).expect("migration run");
        // Idempotent on a second pass.
        run_sqlite(&path).expect("second migration run");

        let mut conn = connect_sqlite(&path).unwrap();
        conn.batch_execute(
            "INSERT INTO file_manifest (vendor, data_type, bronze_path, file_hash, discovered_at)
             VALUES ('tardis', 'trades', '/bronze/a.csv.gz', 'abc', '2024-01-01T00:00:00.000Z')",
        )
        .unwrap();
    }

    #[test]
    fn postgres_urls_are_rejected() {
        let err = run_all("postgres://localhost/lake").unwrap_err();
        assert!(err.to_string().contains("SQLite only"));
    }
}
