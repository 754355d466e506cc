//! Relational metadata store access
//!
//! The schema itself is owned elsewhere; this module consumes datacenter
//! records through the [`MetadataStore`] trait and scopes every top-level
//! operation in an explicit [`MetadataSession`] value. Writes are buffered
//! in the session and applied only on [`MetadataSession::commit`]; dropping
//! an uncommitted session discards them. Functions that need transactional
//! access take the session by reference, so a nested scope naturally reuses
//! the outer transaction and only the outermost scope commits or rolls back.

use crate::error::{EngineError, Result};
use crate::metadata::{DatacenterMetadata, DeviceType, DeviceTypeMetadata};
use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Supplier of per-datacenter metadata records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn list_datacenters(&self) -> Result<Vec<String>>;

    async fn load_datacenter(&self, name: &str) -> Result<Option<DatacenterMetadata>>;

    async fn store_datacenter(&self, name: &str, metadata: &DatacenterMetadata) -> Result<()>;
}

/// Scoped transactional session over a metadata store.
///
/// ```ignore
/// let mut session = MetadataSession::begin(&store);
/// let metadata = session.datacenter_metadata("dc1").await?;
/// session.write_datacenter("dc1", refreshed);
/// session.commit().await?;
/// ```
pub struct MetadataSession<'a> {
    store: &'a dyn MetadataStore,
    pending: IndexMap<String, DatacenterMetadata>,
    finished: bool,
}

impl<'a> MetadataSession<'a> {
    pub fn begin(store: &'a dyn MetadataStore) -> Self {
        debug!("metadata session enter");
        Self {
            store,
            pending: IndexMap::new(),
            finished: false,
        }
    }

    /// Metadata for every known datacenter, with pending writes overlaid.
    pub async fn metadata(&self) -> Result<IndexMap<String, DatacenterMetadata>> {
        let mut result = IndexMap::new();
        for name in self.store.list_datacenters().await? {
            if let Some(metadata) = self.load(&name).await? {
                result.insert(name, metadata);
            }
        }
        for (name, metadata) in &self.pending {
            result.insert(name.clone(), metadata.clone());
        }
        Ok(result)
    }

    /// Metadata for one datacenter; unknown names are `RecordNotExists`.
    pub async fn datacenter_metadata(&self, name: &str) -> Result<DatacenterMetadata> {
        self.load(name).await?.ok_or_else(|| {
            EngineError::RecordNotExists(format!("datacenter {name} does not exist"))
        })
    }

    /// Metadata for one device type of one datacenter.
    pub async fn device_type_metadata(
        &self,
        name: &str,
        device_type: DeviceType,
    ) -> Result<DeviceTypeMetadata> {
        let metadata = self.datacenter_metadata(name).await?;
        Ok(metadata.device_type(device_type)?.clone())
    }

    /// Buffer a whole-datacenter rewrite; applied on commit.
    pub fn write_datacenter(&mut self, name: &str, metadata: DatacenterMetadata) {
        self.pending.insert(name.to_string(), metadata);
    }

    /// Apply buffered writes. Any store failure rolls the session back and
    /// surfaces as `Database`.
    pub async fn commit(mut self) -> Result<()> {
        for (name, metadata) in &self.pending {
            if let Err(error) = self.store.store_datacenter(name, metadata).await {
                self.finished = true;
                warn!(datacenter = %name, %error, "metadata session rollback");
                return Err(EngineError::from_store(error));
            }
        }
        self.finished = true;
        debug!(writes = self.pending.len(), "metadata session commit");
        Ok(())
    }

    /// Discard buffered writes.
    pub fn rollback(mut self) {
        self.pending.clear();
        self.finished = true;
        debug!("metadata session rollback");
    }

    async fn load(&self, name: &str) -> Result<Option<DatacenterMetadata>> {
        if let Some(metadata) = self.pending.get(name) {
            return Ok(Some(metadata.clone()));
        }
        self.store.load_datacenter(name).await
    }
}

impl Drop for MetadataSession<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.pending.is_empty() {
            warn!(
                writes = self.pending.len(),
                "metadata session dropped without commit, writes discarded"
            );
        }
    }
}

/// In-memory metadata store, used by tests and offline tooling.
#[derive(Default)]
pub struct MemoryMetadataStore {
    datacenters: RwLock<IndexMap<String, DatacenterMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, name: &str, metadata: DatacenterMetadata) {
        self.datacenters
            .write()
            .await
            .insert(name.to_string(), metadata);
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn list_datacenters(&self) -> Result<Vec<String>> {
        Ok(self.datacenters.read().await.keys().cloned().collect())
    }

    async fn load_datacenter(&self, name: &str) -> Result<Option<DatacenterMetadata>> {
        Ok(self.datacenters.read().await.get(name).cloned())
    }

    async fn store_datacenter(&self, name: &str, metadata: &DatacenterMetadata) -> Result<()> {
        self.datacenters
            .write()
            .await
            .insert(name.to_string(), metadata.clone());
        Ok(())
    }
}
