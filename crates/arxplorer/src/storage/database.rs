//! SQLite-backed persistent document store
//!
//! Keyed by the path-safe paper id; owns the server-assigned last-access
//! timestamp used by the LRU eviction sweep.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::providers::record_store::RecordStore;
use crate::providers::sanitize_id;
use crate::types::{Document, Figure, PaperRecord};

/// SQLite implementation of the persistent record tier
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    /// Probability that a read refreshes the entry timestamp
    refresh_probability: f64,
}

impl SqliteRecordStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P, refresh_probability: f64) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::store(format!("Failed to open database: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            refresh_probability,
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database for development and tests
    pub fn in_memory(refresh_probability: f64) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::store(format!("Failed to open in-memory database: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            refresh_probability,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        "#,
        )
        .map_err(|e| Error::store(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS papers (
                id TEXT PRIMARY KEY,
                paper_id TEXT NOT NULL,
                title TEXT NOT NULL,
                date TEXT NOT NULL,
                authors TEXT NOT NULL,
                abstract TEXT NOT NULL,
                table_of_contents TEXT NOT NULL,
                can_read_citation INTEGER NOT NULL,
                document TEXT NOT NULL,
                figures TEXT NOT NULL,
                accessed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_papers_accessed_at ON papers(accessed_at);
        "#,
        )
        .map_err(|e| Error::store(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Record store migrations complete");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, paper_id: &str) -> Result<Option<PaperRecord>> {
        let key = sanitize_id(paper_id);
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                r#"SELECT paper_id, title, date, authors, abstract, table_of_contents,
                          can_read_citation, document, figures
                   FROM papers WHERE id = ?1"#,
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, bool>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| Error::store(format!("Failed to read record: {}", e)))?;

        let Some((id, title, date, authors, abstract_text, toc, can_cite, document, figures)) = row
        else {
            return Ok(None);
        };

        // Sampled refresh keeps LRU ordering approximate without paying a
        // write on every read
        if rand::thread_rng().gen::<f64>() < self.refresh_probability {
            let _ = conn.execute(
                "UPDATE papers SET accessed_at = ?2 WHERE id = ?1",
                params![key, now()],
            );
        }

        let mut document = Document::deserialize(document.as_bytes())?;
        // The separately-stored registry wins: it carries resolved figure URLs
        document.figures = serde_json::from_str::<BTreeMap<String, Figure>>(&figures)?;

        Ok(Some(PaperRecord {
            id,
            title,
            date,
            authors,
            abstract_text,
            table_of_contents: toc,
            can_read_citation: can_cite,
            document,
        }))
    }

    async fn set(&self, record: &PaperRecord) -> Result<()> {
        let key = sanitize_id(&record.id);
        let document = String::from_utf8(record.document.to_bytes()?)
            .map_err(|e| Error::internal(format!("non-utf8 document payload: {}", e)))?;
        let figures = serde_json::to_string(&record.document.figures)?;

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO papers (
                id, paper_id, title, date, authors, abstract, table_of_contents,
                can_read_citation, document, figures, accessed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                paper_id = excluded.paper_id,
                title = excluded.title,
                date = excluded.date,
                authors = excluded.authors,
                abstract = excluded.abstract,
                table_of_contents = excluded.table_of_contents,
                can_read_citation = excluded.can_read_citation,
                document = excluded.document,
                figures = excluded.figures,
                accessed_at = excluded.accessed_at
            "#,
            params![
                key,
                record.id,
                record.title,
                record.date,
                record.authors,
                record.abstract_text,
                record.table_of_contents,
                record.can_read_citation,
                document,
                figures,
                now(),
            ],
        )
        .map_err(|e| Error::store(format!("Failed to upsert record: {}", e)))?;

        Ok(())
    }

    async fn update_figures(
        &self,
        paper_id: &str,
        figures: &BTreeMap<String, Figure>,
    ) -> Result<()> {
        let key = sanitize_id(paper_id);
        let payload = serde_json::to_string(figures)?;

        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE papers SET figures = ?2 WHERE id = ?1",
                params![key, payload],
            )
            .map_err(|e| Error::store(format!("Failed to update figures: {}", e)))?;

        if updated == 0 {
            tracing::debug!("Figure update for absent record '{}' ignored", paper_id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))
            .map_err(|e| Error::store(format!("Failed to count records: {}", e)))?;
        Ok(count as usize)
    }

    async fn delete_oldest(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))
            .map_err(|e| Error::store(format!("Failed to count records: {}", e)))?;
        let excess = (count as usize).saturating_sub(limit);
        if excess == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare("SELECT id, paper_id FROM papers ORDER BY accessed_at ASC, rowid ASC LIMIT ?1")
            .map_err(|e| Error::store(format!("Failed to prepare eviction query: {}", e)))?;
        let victims: Vec<(String, String)> = stmt
            .query_map(params![excess as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| Error::store(format!("Failed to query oldest records: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut deleted = Vec::with_capacity(victims.len());
        for (key, paper_id) in victims {
            conn.execute("DELETE FROM papers WHERE id = ?1", params![key])
                .map_err(|e| Error::store(format!("Failed to delete record: {}", e)))?;
            deleted.push(paper_id);
        }

        Ok(deleted)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Section;

    fn record(id: &str) -> PaperRecord {
        let root = Section::with_subsections(
            "T",
            "body words",
            vec![Section::new("Intro", "intro body")],
        );
        let doc = Document::new(Some("T".to_string()), root, BTreeMap::new());
        PaperRecord::new(id, "T", "2024-01-01", "A. Author", "abs", doc)
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let store = SqliteRecordStore::in_memory(0.0).unwrap();
        store.set(&record("1706.03762")).await.unwrap();

        let loaded = store.get("1706.03762").await.unwrap().unwrap();
        assert_eq!(loaded.id, "1706.03762");
        assert_eq!(loaded.document.root.subsections[0].title, "Intro");
        assert!(store.get("9999.00000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_oldest_beyond_limit() {
        let store = SqliteRecordStore::in_memory(0.0).unwrap();
        for i in 0..5 {
            store.set(&record(&format!("2400.0000{i}"))).await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 5);

        let deleted = store.delete_oldest(3).await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(deleted, vec!["2400.00000", "2400.00001"]);
        assert_eq!(store.count().await.unwrap(), 3);

        // Under the limit, the sweep is a no-op
        assert!(store.delete_oldest(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_refresh_protects_from_eviction() {
        let store = SqliteRecordStore::in_memory(1.0).unwrap();
        for i in 0..3 {
            store.set(&record(&format!("2400.0000{i}"))).await.unwrap();
        }

        // Touch the oldest entry; with refresh probability 1 its timestamp
        // moves to the front, so eviction takes the next-oldest instead.
        store.get("2400.00000").await.unwrap();
        let deleted = store.delete_oldest(2).await.unwrap();
        assert_eq!(deleted, vec!["2400.00001"]);
    }

    #[tokio::test]
    async fn test_partial_figure_update() {
        let store = SqliteRecordStore::in_memory(0.0).unwrap();
        store.set(&record("2401.00001")).await.unwrap();

        let mut figures = BTreeMap::new();
        figures.insert(
            "fig1".to_string(),
            Figure {
                label: "fig1".to_string(),
                urls: vec!["https://cdn.example/fig1.png".to_string()],
                ..Default::default()
            },
        );
        store.update_figures("2401.00001", &figures).await.unwrap();

        let loaded = store.get("2401.00001").await.unwrap().unwrap();
        let figure = loaded.document.figures.get("fig1").unwrap();
        assert_eq!(figure.urls, vec!["https://cdn.example/fig1.png"]);

        // Updating an absent record is silently ignored
        store.update_figures("none", &figures).await.unwrap();
    }
}
