// crates/db/src/sqlite.rs
//! SQLite-backed [`ProjectStore`].
//!
//! WAL-mode pool, schema created on open. Identifiers, timestamps, and
//! statuses are stored as TEXT so the schema stays portable and
//! inspectable with the sqlite3 CLI.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use scribeflow_core::{AudioFile, ProcessingStatus, Project};

use crate::{ProjectStore, StoreError, StoreResult};

/// Schema, applied statement by statement on open.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL,
        project_path TEXT NOT NULL DEFAULT '',
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS audio_files (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        file_path_raw TEXT NOT NULL,
        transcription_status TEXT NOT NULL,
        transcription_content TEXT,
        error_code INTEGER,
        created_by TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_audio_files_project ON audio_files(project_id)",
];

/// Store wrapping a SQLite connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "opened project database");
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn new_in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn load_files(&self, project_id: Uuid) -> StoreResult<Vec<AudioFile>> {
        let rows = sqlx::query(
            "SELECT id, project_id, file_name, file_path_raw, transcription_status,
                    transcription_content, error_code, created_by
             FROM audio_files WHERE project_id = ? ORDER BY file_name",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(file_from_row).collect()
    }

    async fn upsert_file(&self, file: &AudioFile) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audio_files
                (id, project_id, file_name, file_path_raw, transcription_status,
                 transcription_content, error_code, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                transcription_status = excluded.transcription_status,
                transcription_content = excluded.transcription_content,
                error_code = excluded.error_code",
        )
        .bind(file.id.to_string())
        .bind(file.project_id.to_string())
        .bind(&file.file_name)
        .bind(&file.file_path_raw)
        .bind(file.transcription_status.as_str())
        .bind(&file.transcription_content)
        .bind(file.error_code.map(i64::from))
        .bind(file.created_by.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn get_by_id(&self, id: Uuid, owner_id: Uuid) -> StoreResult<Project> {
        let row = sqlx::query(
            "SELECT id, name, description, status, project_path, created_by,
                    created_at, updated_at
             FROM projects WHERE id = ? AND created_by = ?",
        )
        .bind(id.to_string())
        .bind(owner_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut project = project_from_row(&row)?;
        project.files = self.load_files(id).await?;
        Ok(project)
    }

    async fn replace(&self, project: &Project, owner_id: Uuid) -> StoreResult<Project> {
        if project.created_by != owner_id {
            return Err(StoreError::NotFound(project.id));
        }

        let mut stored = project.clone();
        stored.updated_at = Utc::now();

        sqlx::query(
            "INSERT INTO projects
                (id, name, description, status, project_path, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                status = excluded.status,
                project_path = excluded.project_path,
                updated_at = excluded.updated_at",
        )
        .bind(stored.id.to_string())
        .bind(&stored.name)
        .bind(&stored.description)
        .bind(stored.status.as_str())
        .bind(&stored.project_path)
        .bind(stored.created_by.to_string())
        .bind(stored.created_at.to_rfc3339())
        .bind(stored.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        for file in &stored.files {
            self.upsert_file(file).await?;
        }

        Ok(stored)
    }

    async fn merge_file(&self, file: &AudioFile) -> StoreResult<()> {
        self.upsert_file(file).await
    }
}

fn parse_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::InvalidRow(format!("bad uuid {value:?}: {e}")))
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(format!("bad timestamp {value:?}: {e}")))
}

fn parse_status(value: &str) -> StoreResult<ProcessingStatus> {
    value
        .parse()
        .map_err(|e| StoreError::InvalidRow(format!("{e}")))
}

fn project_from_row(row: &SqliteRow) -> StoreResult<Project> {
    Ok(Project {
        id: parse_uuid(row.get("id"))?,
        name: row.get("name"),
        description: row.get("description"),
        status: parse_status(row.get("status"))?,
        project_path: row.get("project_path"),
        created_by: parse_uuid(row.get("created_by"))?,
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
        files: Vec::new(),
    })
}

fn file_from_row(row: &SqliteRow) -> StoreResult<AudioFile> {
    let error_code: Option<i64> = row.get("error_code");
    let error_code = error_code
        .map(|c| {
            u16::try_from(c).map_err(|_| StoreError::InvalidRow(format!("bad error code {c}")))
        })
        .transpose()?;
    Ok(AudioFile {
        id: parse_uuid(row.get("id"))?,
        project_id: parse_uuid(row.get("project_id"))?,
        file_name: row.get("file_name"),
        file_path_raw: row.get("file_path_raw"),
        transcription_status: parse_status(row.get("transcription_status"))?,
        transcription_content: row.get("transcription_content"),
        error_code,
        created_by: parse_uuid(row.get("created_by"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_project(owner: Uuid) -> Project {
        let mut project = Project::new("interviews", owner);
        project.status = ProcessingStatus::Pending;
        project.files = vec![
            AudioFile::new(project.id, "a.wav", "raw/a.wav", owner),
            AudioFile::new(project.id, "b.wav", "raw/b.wav", owner),
        ];
        project
    }

    #[tokio::test]
    async fn round_trips_a_project_with_files() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let owner = Uuid::new_v4();
        let project = sample_project(owner);
        store.replace(&project, owner).await.unwrap();

        let fetched = store.get_by_id(project.id, owner).await.unwrap();
        assert_eq!(fetched.name, "interviews");
        assert_eq!(fetched.status, ProcessingStatus::Pending);
        assert_eq!(fetched.files.len(), 2);
        assert_eq!(fetched.files[0].file_name, "a.wav");
    }

    #[tokio::test]
    async fn get_by_id_enforces_owner() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let owner = Uuid::new_v4();
        let project = sample_project(owner);
        store.replace(&project, owner).await.unwrap();

        let err = store.get_by_id(project.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn merge_file_persists_terminal_state() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let owner = Uuid::new_v4();
        let project = sample_project(owner);
        store.replace(&project, owner).await.unwrap();

        let mut file = project.files[1].clone();
        file.transcription_status = ProcessingStatus::Error;
        file.error_code = Some(503);
        store.merge_file(&file).await.unwrap();

        let fetched = store.get_by_id(project.id, owner).await.unwrap();
        let b = fetched.files.iter().find(|f| f.id == file.id).unwrap();
        assert_eq!(b.transcription_status, ProcessingStatus::Error);
        assert_eq!(b.error_code, Some(503));
    }

    #[tokio::test]
    async fn out_of_range_error_code_is_rejected_not_truncated() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let owner = Uuid::new_v4();
        let project = sample_project(owner);
        store.replace(&project, owner).await.unwrap();

        // Written behind the store's back; the column is a plain INTEGER.
        sqlx::query("UPDATE audio_files SET error_code = 70000 WHERE id = ?")
            .bind(project.files[0].id.to_string())
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get_by_id(project.id, owner).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRow(_)));
    }

    #[tokio::test]
    async fn replace_is_an_upsert() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        let owner = Uuid::new_v4();
        let mut project = sample_project(owner);
        store.replace(&project, owner).await.unwrap();

        project.status = ProcessingStatus::Completed;
        let stored = store.replace(&project, owner).await.unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);

        let fetched = store.get_by_id(project.id, owner).await.unwrap();
        assert_eq!(fetched.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn opens_from_a_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("scribeflow.db");
        let store = SqliteStore::new(&path).await.unwrap();
        let owner = Uuid::new_v4();
        let project = sample_project(owner);
        store.replace(&project, owner).await.unwrap();
        assert!(store.get_by_id(project.id, owner).await.is_ok());
    }
}
