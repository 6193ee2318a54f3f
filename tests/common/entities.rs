#![allow(dead_code)]

use live_entity_cache::{CacheResult, Entity, EntityId, HasPrimaryKey, ReconcileOutcome, Updater};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a build record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Building,
    Done,
    Failed,
}

/// Sample BuildRecord entity for testing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub id: i64,
    pub status: BuildStatus,
    pub build_configuration_id: i64,
}

impl BuildRecord {
    pub fn new(id: i64, status: BuildStatus) -> Self {
        Self {
            id,
            status,
            build_configuration_id: 100,
        }
    }

    pub fn building(id: i64) -> Self {
        Self::new(id, BuildStatus::Building)
    }

    pub fn is_building(&self) -> bool {
        self.status == BuildStatus::Building
    }
}

impl HasPrimaryKey for BuildRecord {
    fn primary_key(&self) -> EntityId {
        self.id.into()
    }
}

impl Entity for BuildRecord {
    const ENTITY_CLASS: &'static str = "BuildRecord";
}

/// Sample BuildConfiguration entity for testing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
}

impl BuildConfiguration {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            project_id: 1,
        }
    }
}

impl HasPrimaryKey for BuildConfiguration {
    fn primary_key(&self) -> EntityId {
        self.id.into()
    }
}

impl Entity for BuildConfiguration {
    const ENTITY_CLASS: &'static str = "BuildConfiguration";
}

/// Replaces the record with the same id and offers every unknown record for insertion
pub struct BuildRecordUpdater;

impl Updater<BuildRecord, BuildRecord> for BuildRecordUpdater {
    fn update(
        &self,
        existing: &BuildRecord,
        event: &BuildRecord,
    ) -> CacheResult<ReconcileOutcome<BuildRecord>> {
        if existing.id == event.id {
            Ok(ReconcileOutcome::Replace(event.clone()))
        } else {
            Ok(ReconcileOutcome::Unchanged)
        }
    }

    fn insert(&self, event: &BuildRecord) -> CacheResult<Option<BuildRecord>> {
        Ok(Some(event.clone()))
    }
}
