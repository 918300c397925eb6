//! Per-tenant tag tables in SQLite.
//!
//! Every `(tenant, tag)` pair owns a table `idx_<hex tenant>_<hex tag>` with
//! rows `{name, bucket, timestamp, size}` keyed by logical name. The tenant's
//! meta registry is the table for tag [`META_TAG`] and holds one row per
//! provisioned tag. Tables are created on first write and never dropped.
//!
//! Provisioning assumes concurrent first use: two requests may both miss the
//! probe and both create the table. Creation is `IF NOT EXISTS`, the registry
//! insert is `OR IGNORE`, and an "already exists" error counts as success.

use crate::errors::{Classify, ErrorKind};
use crate::models::{
    record::{Record, TagRow},
    reply::{IndexEntry, TagListing},
};
use crate::services::keys::KeyDeriver;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tag whose table is the meta registry. Not indexable by clients.
pub const META_TAG: &str = "meta";

/// Rows per INSERT statement; four binds each stays under SQLite's
/// 999-parameter default.
const UPSERT_CHUNK: usize = 200;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("tag `meta` is reserved")]
    ReservedTag,
    #[error("tag must not be empty")]
    EmptyTag,
    #[error("tag `{0}` has never been indexed")]
    UnknownTag(String),
    #[error("could not provision table for tag `{tag}`: {source}")]
    Provision {
        tag: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("could not write {rows} rows for tag `{tag}`: {source}")]
    Write {
        tag: String,
        rows: usize,
        #[source]
        source: sqlx::Error,
    },
    #[error("could not read tag `{tag}`: {source}")]
    Read {
        tag: String,
        #[source]
        source: sqlx::Error,
    },
}

pub type IndexResult<T> = Result<T, IndexError>;

impl Classify for IndexError {
    fn kind(&self) -> ErrorKind {
        match self {
            IndexError::ReservedTag | IndexError::EmptyTag => ErrorKind::Validation,
            IndexError::UnknownTag(_) => ErrorKind::NotFound,
            IndexError::Provision { .. } | IndexError::Write { .. } => ErrorKind::IndexingFailure,
            IndexError::Read { .. } => ErrorKind::Internal,
        }
    }
}

/// Name of the table holding `tag` for `tenant`. Hex keeps it injective and
/// free of characters that need escaping.
pub fn tag_table_name(tenant: &str, tag: &str) -> String {
    format!("idx_{}_{}", hex(tenant), hex(tag))
}

fn hex(value: &str) -> String {
    value.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn is_missing_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("no such table"))
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("already exists"))
}

fn check_tag(tag: &str) -> IndexResult<()> {
    if tag.is_empty() {
        return Err(IndexError::EmptyTag);
    }
    if tag == META_TAG {
        return Err(IndexError::ReservedTag);
    }
    Ok(())
}

async fn create_table(conn: &mut SqliteConnection, table: &str) -> Result<(), sqlx::Error> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            name TEXT PRIMARY KEY NOT NULL,
            bucket TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            size INTEGER NOT NULL
        ) WITHOUT ROWID",
        quote_ident(table)
    );
    match sqlx::query(&sql).execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(err) if is_already_exists(&err) => {
            debug!(%table, "table created concurrently");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn row_to_record(row: TagRow, keys: &KeyDeriver) -> Record {
    Record {
        key: keys.derive(&row.name),
        meta_key: Some(keys.derive_meta(&row.name)),
        name: row.name,
        bucket: row.bucket,
        size: u64::try_from(row.size).unwrap_or_default(),
        meta_bucket: None,
        meta_size: None,
        content_type: String::new(),
        timestamp: row.timestamp,
        media: None,
    }
}

/// Tag tables of every tenant, over one shared pool.
#[derive(Clone)]
pub struct TagIndex {
    db: Arc<SqlitePool>,
}

impl TagIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Make sure the table for `tag` exists and is listed in the tenant's
    /// meta registry.
    pub async fn ensure_tag_table(&self, tenant: &str, tag: &str) -> IndexResult<()> {
        check_tag(tag)?;
        let table = tag_table_name(tenant, tag);

        let probe = format!("SELECT name FROM {} LIMIT 1", quote_ident(&table));
        match sqlx::query(&probe).fetch_optional(&*self.db).await {
            Ok(_) => return Ok(()),
            Err(err) if is_missing_table(&err) => {}
            Err(err) => debug!(%table, "probe failed, provisioning anyway: {}", err),
        }

        self.provision(tenant, tag, &table)
            .await
            .map_err(|source| IndexError::Provision {
                tag: tag.to_string(),
                source,
            })?;
        info!(tenant, tag, %table, "tag table provisioned");
        Ok(())
    }

    async fn provision(&self, tenant: &str, tag: &str, table: &str) -> Result<(), sqlx::Error> {
        let registry = tag_table_name(tenant, META_TAG);
        let mut tx = self.db.begin().await?;

        create_table(&mut tx, &registry).await?;
        create_table(&mut tx, table).await?;

        let register = format!(
            "INSERT OR IGNORE INTO {} (name, bucket, timestamp, size) VALUES (?, '', ?, 0)",
            quote_ident(&registry)
        );
        sqlx::query(&register)
            .bind(tag)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    /// Upsert every record under each of its tags.
    ///
    /// All tags are validated before anything is written. Tags are then
    /// indexed one at a time in order of first appearance; the first failing
    /// tag stops the call and tags already written stay written.
    pub async fn index_records(&self, tenant: &str, entries: Vec<IndexEntry>) -> IndexResult<()> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<Record>)> = Vec::new();

        for entry in &entries {
            for tag in &entry.tags {
                check_tag(tag)?;
            }
        }
        for entry in entries {
            for tag in entry.tags {
                let position = *positions.entry(tag.clone()).or_insert_with(|| {
                    groups.push((tag, Vec::new()));
                    groups.len() - 1
                });
                groups[position].1.push(entry.file.clone());
            }
        }

        for (tag, records) in &groups {
            self.ensure_tag_table(tenant, tag).await?;
            self.upsert(tenant, tag, records).await?;
            debug!(tenant, %tag, rows = records.len(), "tag indexed");
        }
        Ok(())
    }

    async fn upsert(&self, tenant: &str, tag: &str, records: &[Record]) -> IndexResult<()> {
        let table = tag_table_name(tenant, tag);
        let write_err = |source| IndexError::Write {
            tag: tag.to_string(),
            rows: records.len(),
            source,
        };

        let mut tx = self.db.begin().await.map_err(write_err)?;
        for chunk in records.chunks(UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT OR REPLACE INTO {} (name, bucket, timestamp, size) ",
                quote_ident(&table)
            ));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.name.clone())
                    .push_bind(record.bucket.clone())
                    .push_bind(record.timestamp)
                    .push_bind(i64::try_from(record.size).unwrap_or(i64::MAX));
            });
            builder.build().execute(&mut *tx).await.map_err(write_err)?;
        }
        tx.commit().await.map_err(write_err)
    }

    /// Tags provisioned for `tenant`, ordered by name. A tenant that never
    /// indexed anything has none.
    pub async fn list_tags(&self, tenant: &str) -> IndexResult<Vec<String>> {
        let registry = tag_table_name(tenant, META_TAG);
        let sql = format!("SELECT name FROM {} ORDER BY name", quote_ident(&registry));
        match sqlx::query_scalar::<_, String>(&sql).fetch_all(&*self.db).await {
            Ok(tags) => Ok(tags),
            Err(err) if is_missing_table(&err) => Ok(Vec::new()),
            Err(source) => Err(IndexError::Read {
                tag: META_TAG.to_string(),
                source,
            }),
        }
    }

    /// Every record under each of `tags`, ordered by logical name.
    ///
    /// Keys are re-derived from the tenant's deriver. A tag that was never
    /// provisioned is [`IndexError::UnknownTag`].
    pub async fn list_by_tags(
        &self,
        keys: &KeyDeriver,
        tags: &[String],
    ) -> IndexResult<Vec<TagListing<Record>>> {
        for tag in tags {
            check_tag(tag)?;
        }

        let mut listings = Vec::with_capacity(tags.len());
        for tag in tags {
            let table = tag_table_name(keys.tenant(), tag);
            let sql = format!(
                "SELECT bucket, name, timestamp, size FROM {} ORDER BY name",
                quote_ident(&table)
            );
            let rows = sqlx::query_as::<_, TagRow>(&sql)
                .fetch_all(&*self.db)
                .await
                .map_err(|source| {
                    if is_missing_table(&source) {
                        IndexError::UnknownTag(tag.clone())
                    } else {
                        warn!(tenant = keys.tenant(), %tag, "tag read failed: {}", source);
                        IndexError::Read {
                            tag: tag.clone(),
                            source,
                        }
                    }
                })?;

            listings.push(TagListing {
                tag: tag.clone(),
                keys: rows.into_iter().map(|row| row_to_record(row, keys)).collect(),
            });
        }
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    async fn index() -> (tempfile::TempDir, TagIndex) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("index.db").display());
        let pool = crate::db::connect(&url).await.unwrap();
        (dir, TagIndex::new(Arc::new(pool)))
    }

    fn record(name: &str, size: u64, timestamp: DateTime<Utc>) -> Record {
        Record {
            name: name.to_string(),
            bucket: "small".to_string(),
            key: String::new(),
            size,
            meta_bucket: None,
            meta_key: None,
            meta_size: None,
            content_type: "text/plain".to_string(),
            timestamp,
            media: None,
        }
    }

    fn entry(record: Record, tags: &[&str]) -> IndexEntry {
        IndexEntry {
            file: record,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn sqlite_errors_are_recognised() {
        let (_dir, index) = index().await;
        let db = &*index.db;

        let missing = sqlx::query("SELECT name FROM \"idx_none\"")
            .fetch_optional(db)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(is_missing_table(&missing));

        sqlx::query("CREATE TABLE \"idx_dup\" (name TEXT)")
            .execute(db)
            .await
            .unwrap();
        let duplicate = sqlx::query("CREATE TABLE \"idx_dup\" (name TEXT)")
            .execute(db)
            .await
            .unwrap_err();
        assert!(is_already_exists(&duplicate));
        assert!(!is_missing_table(&duplicate));
    }

    #[test]
    fn table_names_are_tenant_scoped() {
        assert_eq!(tag_table_name("ab", "c"), "idx_6162_63");
        assert_ne!(tag_table_name("a", "bc"), tag_table_name("ab", "c"));
    }

    #[tokio::test]
    async fn reserved_and_empty_tags_are_rejected() {
        let (_dir, index) = index().await;
        assert!(matches!(
            index.ensure_tag_table("alice", META_TAG).await,
            Err(IndexError::ReservedTag)
        ));
        assert!(matches!(
            index.ensure_tag_table("alice", "").await,
            Err(IndexError::EmptyTag)
        ));
    }

    #[tokio::test]
    async fn provisioning_registers_tag_once() {
        let (_dir, index) = index().await;
        index.ensure_tag_table("alice", "all").await.unwrap();
        index.ensure_tag_table("alice", "all").await.unwrap();
        index.ensure_tag_table("alice", "2024-01-01").await.unwrap();

        assert_eq!(index.list_tags("alice").await.unwrap(), vec!["2024-01-01", "all"]);
        assert!(index.list_tags("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn indexed_record_lists_back() {
        let (_dir, index) = index().await;
        let keys = KeyDeriver::for_tenant("alice");
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        index
            .index_records("alice", vec![entry(record("a.txt", 10, ts), &["2024-01-01", "all"])])
            .await
            .unwrap();

        let listings = index.list_by_tags(&keys, &["all".to_string()]).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].tag, "all");
        let listed = &listings[0].keys[0];
        assert_eq!(listed.name, "a.txt");
        assert_eq!(listed.bucket, "small");
        assert_eq!(listed.size, 10);
        assert_eq!(listed.timestamp, ts);
        assert_eq!(listed.key, keys.derive("a.txt"));
    }

    #[tokio::test]
    async fn reindexing_replaces_row() {
        let (_dir, index) = index().await;
        let keys = KeyDeriver::for_tenant("alice");
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        index
            .index_records("alice", vec![entry(record("a.txt", 10, first), &["all"])])
            .await
            .unwrap();
        index
            .index_records("alice", vec![entry(record("a.txt", 20, second), &["all"])])
            .await
            .unwrap();

        let listings = index.list_by_tags(&keys, &["all".to_string()]).await.unwrap();
        assert_eq!(listings[0].keys.len(), 1);
        assert_eq!(listings[0].keys[0].size, 20);
        assert_eq!(listings[0].keys[0].timestamp, second);
    }

    #[tokio::test]
    async fn invalid_tag_aborts_before_any_write() {
        let (_dir, index) = index().await;
        let ts = Utc::now();
        let err = index
            .index_records(
                "alice",
                vec![
                    entry(record("a.txt", 1, ts), &["all"]),
                    entry(record("b.txt", 1, ts), &["meta"]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::ReservedTag));
        assert!(index.list_tags("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tag_differs_from_empty_listing() {
        let (_dir, index) = index().await;
        let keys = KeyDeriver::for_tenant("alice");
        index.ensure_tag_table("alice", "empty").await.unwrap();

        let listings = index.list_by_tags(&keys, &["empty".to_string()]).await.unwrap();
        assert!(listings[0].keys.is_empty());

        let err = index
            .list_by_tags(&keys, &["never".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(&err, IndexError::UnknownTag(tag) if tag == "never"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn tenants_do_not_see_each_other() {
        let (_dir, index) = index().await;
        index
            .index_records("alice", vec![entry(record("a.txt", 1, Utc::now()), &["all"])])
            .await
            .unwrap();
        let bob = KeyDeriver::for_tenant("bob");
        assert!(matches!(
            index.list_by_tags(&bob, &["all".to_string()]).await,
            Err(IndexError::UnknownTag(_))
        ));
    }

    #[tokio::test]
    async fn large_batches_are_chunked() {
        let (_dir, index) = index().await;
        let keys = KeyDeriver::for_tenant("alice");
        let ts = Utc::now();
        let entries = (0..UPSERT_CHUNK * 2 + 5)
            .map(|i| entry(record(&format!("f{:04}", i), i as u64, ts), &["bulk"]))
            .collect();
        index.index_records("alice", entries).await.unwrap();

        let listings = index.list_by_tags(&keys, &["bulk".to_string()]).await.unwrap();
        assert_eq!(listings[0].keys.len(), UPSERT_CHUNK * 2 + 5);
        assert_eq!(listings[0].keys[0].name, "f0000");
    }
}
