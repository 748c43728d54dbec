//! SQLite connection helpers.
//!
//! Provides [`connect_sqlite`] that opens a connection and applies the PRAGMAs the
//! manifest relies on: WAL journaling, foreign_keys=ON, and a 5000ms busy_timeout so
//! concurrent ingesters queue on `BEGIN IMMEDIATE` instead of failing with SQLITE_BUSY.
//!
//! Example:
//! ```no_run
//! use lake_ingest::db::connection::connect_sqlite;
//!
//! let path = std::env::temp_dir().join("lake_manifest_example.db");
//! let _conn = connect_sqlite(path.to_str().unwrap()).expect("open sqlite");
//! ```

use diesel::{Connection, RunQueryDsl, SqliteConnection, sql_query};

/// Accepts `sqlite://path`, `sqlite:path` or a bare path and returns what SQLite expects.
pub fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Open a SQLite connection and apply connection-wide PRAGMAs.
pub fn connect_sqlite(database_url: &str) -> anyhow::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(sqlite_path(database_url))?;

    sql_query("PRAGMA journal_mode=WAL;").execute(&mut conn)?;
    sql_query("PRAGMA foreign_keys=ON;").execute(&mut conn)?;
    sql_query("PRAGMA busy_timeout=5000;").execute(&mut conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_strips_scheme() {
        assert_eq!(sqlite_path("sqlite:///tmp/a.db"), "/tmp/a.db");
        assert_eq!(sqlite_path("sqlite:lake.db"), "lake.db");
        assert_eq!(sqlite_path("/var/lake/manifest.db"), "/var/lake/manifest.db");
    }
}
