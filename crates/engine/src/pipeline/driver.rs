//! Model pipeline driver
//!
//! Ties the layers together for one (datacenter, model type) pair: resolve
//! selections into a node set, fetch and shape the raw series, run the
//! forward pipeline into the model, and run the inverse pipeline plus the
//! write path on the way back out.
//!
//! A pipeline is `built` once its node set has been constructed and
//! persisted, and `trained` once model coefficients have been saved.
//! `train` requires built, `test` and `apply` require trained; the node set
//! and model are reloaded from the model directory on demand, so a
//! pipeline opened against an already-trained model type can serve `apply`
//! immediately.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metadata::{
    resolve, DatacenterMetadata, DeviceTypeMapping, MetadataStore, MetadataSession, Selection,
};
use crate::model::{evaluate, model_registry, Model, TrainOutcome};
use crate::nodes::{Node, NodeArena, NodeSet, NodeSetDocument};
use crate::pipeline;
use crate::pipeline::variants::variant_registry;
use crate::query::{measurement_selector, Filter, QuerySpec, TimePrecision};
use crate::series::{shape_series, SeriesKey, SeriesTable};
use crate::tsdb::TimeSeriesStore;
use crate::write::write_series;
use chrono::Duration;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persisted per-model-type configuration, referenced from the datacenter
/// metadata's `models` mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model registry name
    pub model: String,
    /// Variant registry name; identity when absent
    #[serde(default)]
    pub variant: Option<String>,
    /// Node-set file, relative to the model directory
    pub nodes: String,
    /// Model coefficients file, relative to the model directory
    pub model_path: String,
    pub inputs: Selection,
    pub outputs: Selection,
}

pub struct ModelPipeline {
    datacenter: String,
    model_type: String,
    metadata: DatacenterMetadata,
    model_config: ModelConfig,
    model_dir: PathBuf,
    precision: Option<TimePrecision>,
    node_set: Option<NodeSet>,
    model: Option<Box<dyn Model>>,
}

impl ModelPipeline {
    /// Open the pipeline for one model type of one datacenter, reading its
    /// model configuration from the model directory.
    pub async fn open(
        config: &EngineConfig,
        metadata_store: &dyn MetadataStore,
        datacenter: &str,
        model_type: &str,
    ) -> Result<Self> {
        let session = MetadataSession::begin(metadata_store);
        let metadata = session.datacenter_metadata(datacenter).await?;
        session.rollback();

        let config_file = metadata.models.get(model_type).ok_or_else(|| {
            EngineError::RecordNotExists(format!(
                "model type {model_type} does not exist in datacenter {datacenter}"
            ))
        })?;
        let model_dir = PathBuf::from(&config.model_dir);
        let model_config: ModelConfig = read_json(&model_dir.join(config_file))?;
        info!(datacenter, model_type, "model pipeline opened");
        Ok(Self {
            datacenter: datacenter.to_string(),
            model_type: model_type.to_string(),
            metadata,
            model_config,
            model_dir,
            precision: config.time_precision,
            node_set: None,
            model: None,
        })
    }

    fn nodes_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_config.nodes)
    }

    fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_config.model_path)
    }

    fn interval(&self) -> Duration {
        Duration::seconds(self.metadata.time_interval as i64)
    }

    /// Turn one resolved mapping into simple nodes carrying the
    /// measurement's statistics.
    fn nodes_for(&self, mapping: &DeviceTypeMapping) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for (device_type, measurements) in mapping {
            for (measurement, devices) in measurements {
                let attribute = &self
                    .metadata
                    .measurement(*device_type, measurement)?
                    .attribute;
                for device in devices {
                    let key = SeriesKey::new(*device_type, measurement, device);
                    nodes.push(Node::simple(key, attribute));
                }
            }
        }
        Ok(nodes)
    }

    /// Resolve the configured selections into a node set, run it through
    /// the model variant, and persist it. Training starts from here.
    pub fn build(&mut self) -> Result<()> {
        let inputs = resolve(&self.model_config.inputs, &self.metadata, true)?;
        let outputs = resolve(&self.model_config.outputs, &self.metadata, true)?;
        let variant_name = self.model_config.variant.as_deref().unwrap_or("default");
        let variant = variant_registry().get(variant_name)?;

        let mut arena = NodeArena::default();
        let input_nodes = variant.process_input_nodes(self.nodes_for(&inputs)?, &mut arena);
        let output_nodes = variant.process_output_nodes(self.nodes_for(&outputs)?, &mut arena);
        let set = NodeSet::from_parts(input_nodes, output_nodes, arena);

        write_json(&self.nodes_path(), &set.to_document()?)?;
        info!(
            datacenter = %self.datacenter,
            model_type = %self.model_type,
            inputs = set.input.len(),
            outputs = set.output.len(),
            "node set built"
        );
        self.node_set = Some(set);
        Ok(())
    }

    fn node_set(&mut self) -> Result<&NodeSet> {
        if self.node_set.is_none() {
            let document: NodeSetDocument = read_json(&self.nodes_path()).map_err(|_| {
                EngineError::InvalidParameter(format!(
                    "model type {} is not built yet",
                    self.model_type
                ))
            })?;
            debug!(model_type = %self.model_type, "node set loaded");
            self.node_set = Some(NodeSet::from_document(document));
        }
        self.node_set.as_ref().ok_or_else(|| {
            EngineError::InvalidParameter(format!(
                "model type {} is not built yet",
                self.model_type
            ))
        })
    }

    fn model(&mut self) -> Result<&mut Box<dyn Model>> {
        if self.model.is_none() {
            let mut model = model_registry().build(&self.model_config.model)?;
            model.load(&self.model_path()).map_err(|_| {
                EngineError::InvalidParameter(format!(
                    "model type {} is not trained yet",
                    self.model_type
                ))
            })?;
            self.model = Some(model);
        }
        self.model.as_mut().ok_or_else(|| {
            EngineError::InvalidParameter(format!(
                "model type {} is not trained yet",
                self.model_type
            ))
        })
    }

    /// Fetch the raw series behind `keys` as one table, one query per
    /// (device type, measurement) pair.
    async fn fetch(
        &self,
        store: &dyn TimeSeriesStore,
        set: &NodeSet,
        keys: &[SeriesKey],
        starttime: &str,
        endtime: &str,
    ) -> Result<SeriesTable> {
        let mut mapping: IndexMap<(crate::metadata::DeviceType, String), Vec<String>> =
            IndexMap::new();
        for key in set.unmerged(keys)? {
            let devices = mapping
                .entry((key.device_type, key.measurement.clone()))
                .or_default();
            if !devices.contains(&key.device) {
                devices.push(key.device.clone());
            }
        }

        let mut table = SeriesTable::new();
        for ((device_type, measurement), devices) in mapping {
            let attribute = &self.metadata.measurement(device_type, &measurement)?.attribute;
            let mut spec = QuerySpec::new(&measurement_selector(
                &measurement,
                attribute.pattern.as_deref(),
            ));
            spec.filter = Some(
                Filter::time_range(Some(starttime), Some(endtime))
                    .tag("datacenter", self.datacenter.as_str())
                    .tag("device_type", device_type.as_str())
                    .tag("device", devices.clone()),
            );
            spec.group_by = vec![format!("time({}s)", self.metadata.time_interval)];
            spec.order_by = vec!["time".to_string()];
            spec.aggregation = Some("mean".to_string());

            let raw = store.query(&spec.compile()?, self.precision).await?;
            let shaped = shape_series(
                &raw,
                device_type,
                &measurement,
                &devices,
                attribute.value_type,
                None,
                self.precision,
            )?;
            for (key, series) in shaped.iter() {
                table.insert_column(key.clone(), series.clone());
            }
        }
        Ok(table)
    }

    /// Fetch and run the forward pipeline for both node lists, inner-joined
    /// on the time index.
    pub async fn get_data(
        &mut self,
        store: &dyn TimeSeriesStore,
        starttime: &str,
        endtime: &str,
    ) -> Result<(SeriesTable, SeriesTable)> {
        let interval = self.interval();
        let set = self.node_set()?.clone();
        let input_raw = self
            .fetch(store, &set, &set.input, starttime, endtime)
            .await?;
        let output_raw = self
            .fetch(store, &set, &set.output, starttime, endtime)
            .await?;
        let input = pipeline::process(&input_raw, &set, &set.input, interval)?;
        let output = pipeline::process(&output_raw, &set, &set.output, interval)?;
        Ok(pipeline::clean(&input, &output))
    }

    /// Fit the model on a window and persist it. Requires a built node set.
    pub async fn train(
        &mut self,
        store: &dyn TimeSeriesStore,
        starttime: &str,
        endtime: &str,
    ) -> Result<TrainOutcome> {
        let (input, output) = self.get_data(store, starttime, endtime).await?;
        let mut model = model_registry().build(&self.model_config.model)?;
        model.train(&input, &output)?;
        let predictions = model.apply(&input)?;
        let statistics = evaluate(&predictions, &output);
        model.save(&self.model_path())?;
        info!(
            datacenter = %self.datacenter,
            model_type = %self.model_type,
            outputs = statistics.len(),
            "model trained"
        );
        self.model = Some(model);
        Ok(TrainOutcome {
            predictions,
            expectations: output,
            statistics,
        })
    }

    /// Evaluate the trained model on a window, writing denormalized
    /// predictions and expectations back to the store tagged with
    /// `reference`.
    pub async fn test(
        &mut self,
        store: &dyn TimeSeriesStore,
        starttime: &str,
        endtime: &str,
        reference: &str,
    ) -> Result<TrainOutcome> {
        let (input, output) = self.get_data(store, starttime, endtime).await?;
        let model = self.model()?;
        let predictions = model.apply(&input)?;
        let statistics = evaluate(&predictions, &output);

        let set = self.node_set()?.clone();
        let interval = self.interval();
        let recovered_predictions =
            pipeline::recover(&predictions, &set, &set.output, interval)?;
        let recovered_expectations = pipeline::recover(&output, &set, &set.output, interval)?;
        self.write_back(store, &recovered_predictions, reference, "prediction")
            .await?;
        self.write_back(store, &recovered_expectations, reference, "expectation")
            .await?;
        Ok(TrainOutcome {
            predictions,
            expectations: output,
            statistics,
        })
    }

    /// Predict a window with the trained model, write the denormalized
    /// predictions back, and return them.
    pub async fn apply(
        &mut self,
        store: &dyn TimeSeriesStore,
        starttime: &str,
        endtime: &str,
        reference: &str,
    ) -> Result<SeriesTable> {
        let set = self.node_set()?.clone();
        let interval = self.interval();
        let input_raw = self
            .fetch(store, &set, &set.input, starttime, endtime)
            .await?;
        let input = pipeline::process(&input_raw, &set, &set.input, interval)?;
        let input = input.drop_incomplete_rows();

        let predictions = self.model()?.apply(&input)?;
        let recovered = pipeline::recover(&predictions, &set, &set.output, interval)?;
        self.write_back(store, &recovered, reference, "prediction")
            .await?;
        Ok(recovered)
    }

    async fn write_back(
        &self,
        store: &dyn TimeSeriesStore,
        table: &SeriesTable,
        reference: &str,
        kind: &str,
    ) -> Result<bool> {
        let mut tags = IndexMap::new();
        tags.insert("reference".to_string(), reference.to_string());
        tags.insert("kind".to_string(), kind.to_string());
        write_series(
            store,
            table,
            &self.metadata,
            &self.datacenter,
            &tags,
            self.precision,
        )
        .await
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::RecordNotExists(format!("cannot read {path:?}: {e}")))?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)
        .map_err(|e| EngineError::InvalidParameter(format!("cannot write {path:?}: {e}")))
}
