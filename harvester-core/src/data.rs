use crate::config::HarvestConfig;
use crate::error::Result;
use crate::model::CrawlResult;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub seed_urls: Vec<String>,
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Database {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Results arrive from a writer task while reports read.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
    seed_urls TEXT NOT NULL,  -- JSON array
    configuration TEXT        -- JSON configuration used
);

CREATE TABLE IF NOT EXISTS crawl_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    url TEXT NOT NULL,
    crawl_id TEXT NOT NULL,
    depth INTEGER NOT NULL,
    crawled_at TEXT NOT NULL,
    space_saved INTEGER NOT NULL,
    optimization_score REAL NOT NULL,
    merkle_root TEXT NOT NULL,
    artifact_cid TEXT,
    ocr_indexed BOOLEAN NOT NULL DEFAULT 0,
    result_json TEXT NOT NULL,

    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_results_session ON crawl_results(session_id);
CREATE INDEX IF NOT EXISTS idx_results_crawl_id ON crawl_results(crawl_id);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(&self, seed_urls: &[String], config: &HarvestConfig) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO crawl_sessions (id, start_time, status, seed_urls, configuration) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &session_id,
                timestamp,
                "running",
                serde_json::to_string(seed_urls)?,
                serde_json::to_string(config)?,
            ],
        )?;

        Ok(session_id)
    }

    pub fn complete_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, "completed")
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, "failed")
    }

    fn finish_session(&self, session_id: &str, status: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status, current_timestamp(), session_id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, start_time, end_time, status, seed_urls FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, start_time, end_time, status, seeds)) = row else {
            return Ok(None);
        };
        Ok(Some(SessionInfo {
            id,
            start_time,
            end_time,
            status,
            seed_urls: serde_json::from_str(&seeds)?,
        }))
    }

    // Result operations
    pub fn insert_result(&self, session_id: &str, result: &CrawlResult) -> Result<i64> {
        let indexed = result.ocr.as_ref().is_some_and(|ocr| ocr.indexed);

        self.conn.execute(
            "INSERT INTO crawl_results (
                session_id, url, crawl_id, depth, crawled_at, space_saved,
                optimization_score, merkle_root, artifact_cid, ocr_indexed, result_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session_id,
                &result.url,
                &result.crawl_id,
                result.depth as i64,
                result.timestamp.to_rfc3339(),
                result.space_saved as i64,
                result.optimization_score,
                &result.merkle_root,
                &result.artifact_cid,
                indexed,
                serde_json::to_string(result)?,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Results in insertion order.
    pub fn get_results_by_session(&self, session_id: &str) -> Result<Vec<CrawlResult>> {
        let mut stmt = self
            .conn
            .prepare("SELECT result_json FROM crawl_results WHERE session_id = ?1 ORDER BY id")?;

        let rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut results = Vec::with_capacity(rows.len());
        for json in rows {
            results.push(serde_json::from_str(&json)?);
        }
        Ok(results)
    }

    pub fn result_count(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawl_results WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn total_space_saved(&self, session_id: &str) -> Result<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(space_saved), 0) FROM crawl_results WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}
