// crates/db/src/memory.rs
//! In-memory [`ProjectStore`] used by tests and local experiments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use scribeflow_core::{AudioFile, Project};

use crate::{ProjectStore, StoreError, StoreResult};

/// Hash-map backed store. Cheap to construct, no I/O.
#[derive(Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<Uuid, Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project directly, bypassing ownership checks.
    pub fn insert(&self, project: Project) {
        self.projects
            .write()
            .expect("memory store lock poisoned")
            .insert(project.id, project);
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get_by_id(&self, id: Uuid, owner_id: Uuid) -> StoreResult<Project> {
        let projects = self.projects.read().expect("memory store lock poisoned");
        projects
            .get(&id)
            .filter(|p| p.created_by == owner_id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn replace(&self, project: &Project, owner_id: Uuid) -> StoreResult<Project> {
        if project.created_by != owner_id {
            return Err(StoreError::NotFound(project.id));
        }
        let mut stored = project.clone();
        stored.updated_at = Utc::now();
        self.projects
            .write()
            .expect("memory store lock poisoned")
            .insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn merge_file(&self, file: &AudioFile) -> StoreResult<()> {
        let mut projects = self.projects.write().expect("memory store lock poisoned");
        let project = projects
            .get_mut(&file.project_id)
            .ok_or(StoreError::NotFound(file.project_id))?;
        match project.files.iter_mut().find(|f| f.id == file.id) {
            Some(existing) => *existing = file.clone(),
            None => project.files.push(file.clone()),
        }
        Ok(())
    }
}
