//! Persistent cache store.
//!
//! Every query, every result and every synthesis attempt is recorded here.
//! The store is append-only: there is no update or delete API.
//!
//! [`SqliteCacheStore`] serializes all writes through one connection. File
//! backed stores answer reads from short-lived read-only connections, so a
//! slow reader never holds up the writer.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::records::{ExtractionRecord, Query, ResultRecord, SearchRecord, Source};

pub const CACHE_SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("{0} is not an initialized cache store")]
    NotInitialized(PathBuf),
}

/// Append-only record of searches, results and extractions.
pub trait CacheStore: Send + Sync {
    /// Persist a query; returns the new record with its id and timestamp.
    fn record_search(&self, query: &Query) -> Result<SearchRecord, StorageError>;

    /// Attach results to a search. Rows whose `(title, url)` already exist
    /// under the search are skipped; returns how many were inserted.
    fn record_results(&self, search_id: i64, results: &[ResultRecord]) -> Result<usize, StorageError>;

    /// Persist one synthesis or repair attempt.
    fn record_extraction(
        &self,
        search_id: i64,
        extractor: &str,
        keyword: &str,
        content: &JsonValue,
    ) -> Result<ExtractionRecord, StorageError>;

    /// Most recent search for a keyword, optionally restricted to a source.
    fn latest_search(&self, keyword: &str, source: Option<&Source>) -> Result<Option<SearchRecord>, StorageError>;

    /// Most recent search with the same cache key as `query`.
    fn find_search(&self, query: &Query) -> Result<Option<SearchRecord>, StorageError>;

    fn search(&self, search_id: i64) -> Result<Option<SearchRecord>, StorageError>;

    /// All searches for a keyword, newest first.
    fn searches_for(&self, keyword: &str, source: Option<&Source>) -> Result<Vec<SearchRecord>, StorageError>;

    /// Results of a search in insertion order.
    fn results_for(&self, search_id: i64) -> Result<Vec<ResultRecord>, StorageError>;

    /// Extractions of a search, oldest first.
    fn extractions_for(&self, search_id: i64) -> Result<Vec<ExtractionRecord>, StorageError>;
}

/// SQLite implementation of [`CacheStore`].
pub struct SqliteCacheStore {
    writer: Mutex<Connection>,
    path: Option<PathBuf>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

enum Reader<'a> {
    Owned(Connection),
    Shared(MutexGuard<'a, Connection>),
}

impl Deref for Reader<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Reader::Owned(conn) => conn,
            Reader::Shared(guard) => guard,
        }
    }
}

impl SqliteCacheStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Self::init(conn, Some(path))
    }

    /// Open an existing store without creating, migrating or switching its
    /// journal mode. Writes through the returned store fail.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self {
            writer: Mutex::new(conn),
            path: Some(path.clone()),
            last_timestamp: Mutex::new(None),
        };
        match store.schema_version()? {
            0 => return Err(StorageError::NotInitialized(path)),
            found if found > CACHE_SCHEMA_VERSION => {
                return Err(StorageError::UnsupportedSchemaVersion {
                    found,
                    supported: CACHE_SCHEMA_VERSION,
                })
            }
            _ => {}
        }
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            writer: Mutex::new(conn),
            path,
            last_timestamp: Mutex::new(None),
        };
        store.migrate()?;
        let newest = store.newest_timestamp()?;
        *store.last_timestamp.lock() = newest;
        Ok(store)
    }

    /// Database file, if the store is not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .writer
            .lock()
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > CACHE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: CACHE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.writer.lock();
            conn.execute_batch(include_str!("../migrations/0001_cache_schema.sql"))?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    fn reader(&self) -> Result<Reader<'_>, StorageError> {
        match &self.path {
            Some(path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                Ok(Reader::Owned(conn))
            }
            None => Ok(Reader::Shared(self.writer.lock())),
        }
    }

    /// Next write timestamp; strictly after every earlier one of this store.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_timestamp.lock();
        let now = Utc::now().trunc_subsecs(6);
        let ts = match *last {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        *last = Some(ts);
        ts
    }

    fn newest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let newest: Option<String> = self.writer.lock().query_row(
            "SELECT MAX(ts) FROM (
                SELECT requested_at AS ts FROM searches
                UNION ALL
                SELECT created_at AS ts FROM extractions
            )",
            [],
            |row| row.get(0),
        )?;
        newest.as_deref().map(parse_timestamp).transpose()
    }

    fn query_searches(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<SearchRecord>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, SearchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SearchRow::into_record).collect()
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(format!("{}: {}", raw, err)))
}

fn to_json(value: &impl serde::Serialize) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|err| StorageError::Serialization(err.to_string()))
}

const SEARCH_COLUMNS: &str = "id, keyword, source, tool_name, max_results, args_json, requested_at";

struct SearchRow {
    id: i64,
    keyword: String,
    source: String,
    tool_name: String,
    max_results: i64,
    args_json: String,
    requested_at: String,
}

impl SearchRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            keyword: row.get(1)?,
            source: row.get(2)?,
            tool_name: row.get(3)?,
            max_results: row.get(4)?,
            args_json: row.get(5)?,
            requested_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<SearchRecord, StorageError> {
        Ok(SearchRecord {
            id: self.id,
            query: Query {
                keyword: self.keyword,
                source: Source::from(self.source),
                tool_name: self.tool_name,
                max_results: u32::try_from(self.max_results).unwrap_or(u32::MAX),
                args: from_json(&self.args_json)?,
            },
            requested_at: parse_timestamp(&self.requested_at)?,
        })
    }
}

impl CacheStore for SqliteCacheStore {
    fn record_search(&self, query: &Query) -> Result<SearchRecord, StorageError> {
        let conn = self.writer.lock();
        let requested_at = self.next_timestamp();
        conn.execute(
            "INSERT INTO searches (keyword, source, tool_name, max_results, args_json, requested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                query.keyword,
                query.source.as_str(),
                query.tool_name,
                query.max_results,
                query.args_json(),
                format_timestamp(&requested_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(search_id = id, keyword = %query.keyword, source = %query.source, "search recorded");

        Ok(SearchRecord {
            id,
            query: query.clone(),
            requested_at,
        })
    }

    fn record_results(&self, search_id: i64, results: &[ResultRecord]) -> Result<usize, StorageError> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO results
                    (search_id, title, url, published, license, snippet, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for result in results {
                inserted += stmt.execute(params![
                    search_id,
                    result.title,
                    result.url,
                    result.published,
                    result.license,
                    result.snippet,
                    to_json(&result.payload)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn record_extraction(
        &self,
        search_id: i64,
        extractor: &str,
        keyword: &str,
        content: &JsonValue,
    ) -> Result<ExtractionRecord, StorageError> {
        let conn = self.writer.lock();
        let created_at = self.next_timestamp();
        conn.execute(
            "INSERT INTO extractions (search_id, extractor, keyword, content_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                search_id,
                extractor,
                keyword,
                to_json(content)?,
                format_timestamp(&created_at),
            ],
        )?;

        Ok(ExtractionRecord {
            id: conn.last_insert_rowid(),
            search_id,
            extractor: extractor.to_string(),
            keyword: keyword.to_string(),
            content: content.clone(),
            created_at,
        })
    }

    fn latest_search(&self, keyword: &str, source: Option<&Source>) -> Result<Option<SearchRecord>, StorageError> {
        Ok(self.searches_for(keyword, source)?.into_iter().next())
    }

    fn find_search(&self, query: &Query) -> Result<Option<SearchRecord>, StorageError> {
        let sql = format!(
            "SELECT {} FROM searches
             WHERE keyword = ?1 AND source = ?2 AND tool_name = ?3 AND args_json = ?4
             ORDER BY requested_at DESC, id DESC LIMIT 1",
            SEARCH_COLUMNS
        );
        let args_json = query.args_json();
        Ok(self
            .query_searches(
                &sql,
                &[&query.keyword, &query.source.as_str(), &query.tool_name, &args_json],
            )?
            .into_iter()
            .next())
    }

    fn search(&self, search_id: i64) -> Result<Option<SearchRecord>, StorageError> {
        let conn = self.reader()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM searches WHERE id = ?1", SEARCH_COLUMNS),
                params![search_id],
                SearchRow::from_row,
            )
            .optional()?;
        row.map(SearchRow::into_record).transpose()
    }

    fn searches_for(&self, keyword: &str, source: Option<&Source>) -> Result<Vec<SearchRecord>, StorageError> {
        match source {
            Some(source) => self.query_searches(
                &format!(
                    "SELECT {} FROM searches WHERE keyword = ?1 AND source = ?2
                     ORDER BY requested_at DESC, id DESC",
                    SEARCH_COLUMNS
                ),
                &[&keyword, &source.as_str()],
            ),
            None => self.query_searches(
                &format!(
                    "SELECT {} FROM searches WHERE keyword = ?1
                     ORDER BY requested_at DESC, id DESC",
                    SEARCH_COLUMNS
                ),
                &[&keyword],
            ),
        }
    }

    fn results_for(&self, search_id: i64) -> Result<Vec<ResultRecord>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT title, url, published, license, snippet, payload_json
             FROM results WHERE search_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![search_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(title, url, published, license, snippet, payload)| {
                Ok(ResultRecord {
                    title,
                    url,
                    published,
                    license,
                    snippet,
                    payload: from_json(&payload)?,
                })
            })
            .collect()
    }

    fn extractions_for(&self, search_id: i64) -> Result<Vec<ExtractionRecord>, StorageError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, search_id, extractor, keyword, content_json, created_at
             FROM extractions WHERE search_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![search_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, search_id, extractor, keyword, content, created_at)| {
                Ok(ExtractionRecord {
                    id,
                    search_id,
                    extractor,
                    keyword,
                    content: from_json(&content)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, url: &str) -> ResultRecord {
        ResultRecord {
            title: title.to_string(),
            url: url.to_string(),
            published: Some("2021".to_string()),
            license: None,
            snippet: format!("about {}", title),
            payload: serde_json::json!({"id": title}),
        }
    }

    #[test]
    fn test_migration_sets_schema_version() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CACHE_SCHEMA_VERSION);
        // Migrating twice is a no-op.
        store.migrate().unwrap();
    }

    #[test]
    fn test_record_and_latest_search() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let first = store.record_search(&Query::new("dcis", Source::Pubmed)).unwrap();
        let second = store.record_search(&Query::new("dcis", Source::EuropePmc)).unwrap();

        let latest = store.latest_search("dcis", None).unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        let pubmed = store.latest_search("dcis", Some(&Source::Pubmed)).unwrap().unwrap();
        assert_eq!(pubmed.id, first.id);
        assert_eq!(pubmed.query, Query::new("dcis", Source::Pubmed));

        assert!(store.latest_search("unknown", None).unwrap().is_none());
    }

    #[test]
    fn test_record_results_is_idempotent() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let search = store.record_search(&Query::new("dcis", Source::Pubmed)).unwrap();
        let batch = vec![result("A", "https://a"), result("B", "https://b")];

        assert_eq!(store.record_results(search.id, &batch).unwrap(), 2);
        assert_eq!(store.record_results(search.id, &batch).unwrap(), 0);

        let mut with_new = batch.clone();
        with_new.push(result("C", "https://c"));
        assert_eq!(store.record_results(search.id, &with_new).unwrap(), 1);

        let stored = store.results_for(search.id).unwrap();
        let titles: Vec<&str> = stored.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(stored[0].payload, serde_json::json!({"id": "A"}));
    }

    #[test]
    fn test_results_require_existing_search() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let err = store.record_results(999, &[result("A", "https://a")]).unwrap_err();
        assert!(matches!(err, StorageError::Sqlite(_)));
    }

    #[test]
    fn test_find_search_matches_cache_key() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let query = Query::new("dcis", Source::Pubmed).with_arg("year", serde_json::json!(2020));
        let recorded = store.record_search(&query).unwrap();

        let same_key = query.clone().with_max_results(99);
        assert_eq!(store.find_search(&same_key).unwrap().unwrap().id, recorded.id);

        let other_args = Query::new("dcis", Source::Pubmed).with_arg("year", serde_json::json!(2021));
        assert!(store.find_search(&other_args).unwrap().is_none());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let search = store.record_search(&Query::new("a", Source::Pubmed)).unwrap();
        let mut previous = search.requested_at;
        for i in 0..50 {
            let extraction = store
                .record_extraction(search.id, "stub:synthesis", "a", &serde_json::json!({"i": i}))
                .unwrap();
            assert!(extraction.created_at > previous);
            previous = extraction.created_at;
        }
    }

    #[test]
    fn test_extractions_round_trip() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let search = store.record_search(&Query::new("a", Source::Pubmed)).unwrap();
        let content = serde_json::json!({"candidate": "{}", "report": {"valid": false}});
        let recorded = store
            .record_extraction(search.id, "stub:repair", "a", &content)
            .unwrap();

        let stored = store.extractions_for(search.id).unwrap();
        assert_eq!(stored, vec![recorded]);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let first_ts;
        {
            let store = SqliteCacheStore::open(&path).unwrap();
            let search = store.record_search(&Query::new("dcis", Source::Pubmed)).unwrap();
            store.record_results(search.id, &[result("A", "https://a")]).unwrap();
            first_ts = search.requested_at;
            // Reads go through a separate read-only connection.
            assert_eq!(store.results_for(search.id).unwrap().len(), 1);
        }

        let store = SqliteCacheStore::open(&path).unwrap();
        let latest = store.latest_search("dcis", None).unwrap().unwrap();
        assert_eq!(latest.requested_at, first_ts);
        assert_eq!(store.results_for(latest.id).unwrap().len(), 1);

        let next = store.record_search(&Query::new("dcis", Source::Pubmed)).unwrap();
        assert!(next.requested_at > first_ts);
    }

    #[test]
    fn test_read_only_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        assert!(SqliteCacheStore::open_read_only(&path).is_err());
        assert!(!path.exists());

        let search_id = {
            let store = SqliteCacheStore::open(&path).unwrap();
            let search = store.record_search(&Query::new("dcis", Source::Pubmed)).unwrap();
            store.record_results(search.id, &[result("A", "https://a")]).unwrap();
            search.id
        };

        let store = SqliteCacheStore::open_read_only(&path).unwrap();
        assert_eq!(store.searches_for("dcis", None).unwrap().len(), 1);
        assert_eq!(store.results_for(search_id).unwrap().len(), 1);
        assert!(store.record_search(&Query::new("lcis", Source::Pubmed)).is_err());
    }

    #[test]
    fn test_read_only_open_rejects_uninitialized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path).unwrap().execute_batch("CREATE TABLE t (x)").unwrap();

        let err = SqliteCacheStore::open_read_only(&path).err().unwrap();
        assert!(matches!(err, StorageError::NotInitialized(_)));
    }
}
