#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use live_entity_cache::{CacheError, CacheResult, Page};
use parking_lot::RwLock;
use serde::Serialize;

use super::entities::{BuildConfiguration, BuildRecord, BuildStatus};

/// Query arguments of the build record listing
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    pub page_index: u32,
    pub status: Option<BuildStatus>,
}

impl RecordQuery {
    pub fn with_status(status: BuildStatus) -> Self {
        Self {
            page_index: 0,
            status: Some(status),
        }
    }
}

/// Arguments of a single-entity lookup
#[derive(Debug, Clone, Serialize)]
pub struct IdArgs {
    pub id: i64,
}

/// In-memory stand-in for the remote build record endpoints that counts calls
#[derive(Clone, Default)]
pub struct BuildRecordApi {
    records: Arc<RwLock<Vec<BuildRecord>>>,
    list_calls: Arc<AtomicUsize>,
    get_calls: Arc<AtomicUsize>,
}

impl BuildRecordApi {
    pub fn new(records: Vec<BuildRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
            ..Default::default()
        }
    }

    /// Replace what the server returns from now on
    pub fn replace(&self, records: Vec<BuildRecord>) {
        *self.records.write() = records;
    }

    pub fn get_all(
        &self,
        query: RecordQuery,
    ) -> impl Future<Output = CacheResult<Page<BuildRecord>>> + Send + 'static {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.clone();
        async move {
            tokio::task::yield_now().await;
            let content = records
                .read()
                .iter()
                .filter(|r| query.status.map_or(true, |status| r.status == status))
                .cloned()
                .collect();
            Ok(Page::single(content))
        }
    }

    pub fn get(&self, args: IdArgs) -> impl Future<Output = CacheResult<BuildRecord>> + Send + 'static {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.clone();
        async move {
            records
                .read()
                .iter()
                .find(|r| r.id == args.id)
                .cloned()
                .ok_or_else(|| CacheError::Fetch(format!("build record {} not found", args.id)))
        }
    }

    /// Loader for live collections: every record, unpaged
    pub fn load_all(&self) -> impl Future<Output = CacheResult<Vec<BuildRecord>>> + Send + 'static {
        let page = self.get_all(RecordQuery::default());
        async move { Ok(page.await?.content) }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

/// In-memory stand-in for the remote build configuration endpoints
#[derive(Clone, Default)]
pub struct BuildConfigurationApi {
    configurations: Arc<RwLock<Vec<BuildConfiguration>>>,
    list_calls: Arc<AtomicUsize>,
}

impl BuildConfigurationApi {
    pub fn new(configurations: Vec<BuildConfiguration>) -> Self {
        Self {
            configurations: Arc::new(RwLock::new(configurations)),
            ..Default::default()
        }
    }

    pub fn get_all(
        &self,
        _query: RecordQuery,
    ) -> impl Future<Output = CacheResult<Page<BuildConfiguration>>> + Send + 'static {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let configurations = self.configurations.read().clone();
        async move { Ok(Page::single(configurations)) }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}
