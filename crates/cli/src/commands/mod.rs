//! CLI command implementations

pub mod nodes;
pub mod query;
pub mod resolve;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use predictor_engine::metadata::{
    DatacenterMetadata, MemoryMetadataStore, MetadataSession, Selection,
};
use std::fs;

/// Load one datacenter's metadata from a JSON file mapping datacenter names
/// to metadata documents.
pub(crate) async fn load_datacenter(path: &str, name: &str) -> Result<DatacenterMetadata> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    let datacenters: IndexMap<String, DatacenterMetadata> =
        serde_json::from_str(&text).with_context(|| format!("cannot parse {path}"))?;

    let store = MemoryMetadataStore::new();
    for (datacenter, metadata) in datacenters {
        store.insert(&datacenter, metadata).await;
    }
    let session = MetadataSession::begin(&store);
    let metadata = session
        .datacenter_metadata(name)
        .await
        .with_context(|| format!("datacenter {name} not found in {path}"))?;
    session.rollback();
    Ok(metadata)
}

/// Parse an inline selection; absent means select everything.
pub(crate) fn parse_selection(selection: Option<&str>) -> Result<Selection> {
    match selection {
        Some(text) => serde_json::from_str(text).context("cannot parse selection"),
        None => Ok(Selection::All),
    }
}
