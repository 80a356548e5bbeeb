// crates/db/src/lib.rs
//! Project persistence for scribeflow.
//!
//! [`ProjectStore`] is the contract the job engine writes through:
//! fetch-by-owner, whole-project upsert, and per-file merge. Two
//! implementations ship here: [`SqliteStore`] for the real binary and
//! [`MemoryStore`] as a test double.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use scribeflow_core::{AudioFile, Project};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    NotFound(Uuid),

    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    InvalidRow(String),

    #[error("failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract consumed by the job engine.
///
/// Writes are merges (upsert-by-identity), never transactional batches.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Fetch a project (with its files) owned by `owner_id`.
    async fn get_by_id(&self, id: Uuid, owner_id: Uuid) -> StoreResult<Project>;

    /// Upsert the project and its files; bumps `updated_at` and returns the
    /// stored record.
    async fn replace(&self, project: &Project, owner_id: Uuid) -> StoreResult<Project>;

    /// Upsert a single audio file row.
    async fn merge_file(&self, file: &AudioFile) -> StoreResult<()>;
}
