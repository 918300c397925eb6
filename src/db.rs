use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::{str::FromStr, time::Duration};

/// SQLite allows one writer at a time; a single pooled connection keeps
/// concurrent provisioning from failing with `SQLITE_BUSY` on lock upgrade.
const MAX_CONNECTIONS: u32 = 1;

/// Open (creating if missing) the SQLite database behind the tag index.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(opts)
        .await
}

/// The filesystem path of a `sqlite://` or `file:` URL, without query string.
pub fn sqlite_path(database_url: &str) -> &str {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    path.split_once('?').map_or(path, |(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_and_query() {
        assert_eq!(sqlite_path("sqlite://./data/meta/index.db"), "./data/meta/index.db");
        assert_eq!(sqlite_path("sqlite:///var/lib/index.db?mode=rwc"), "/var/lib/index.db");
        assert_eq!(sqlite_path("file:index.db"), "index.db");
    }

    #[tokio::test]
    async fn creates_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let pool = connect(&format!("sqlite://{}", path.display())).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
        assert!(path.exists());
    }
}
