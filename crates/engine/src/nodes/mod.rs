//! Model-facing nodes
//!
//! A node is a logical handle for one (possibly derived or composite) time
//! series. Nodes are tagged variants stored in an arena indexed by identity
//! key, which makes cycles structurally impossible and traversal order
//! explicit; the persisted node-set document keeps the recursive
//! `sub_nodes`/`original_node` embedding for compatibility.

pub mod transform;

pub use transform::TransformKind;

use crate::error::{EngineError, Result};
use crate::metadata::{AttributeSummary, ValueType};
use crate::series::SeriesKey;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Statistical/unit attributes a node carries from its measurement
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub deviation: Option<f64>,
    #[serde(default)]
    pub differentiation_mean: Option<f64>,
    #[serde(default)]
    pub differentiation_deviation: Option<f64>,
}

impl From<&AttributeSummary> for NodeStats {
    fn from(attribute: &AttributeSummary) -> Self {
        Self {
            value_type: attribute.value_type,
            unit: attribute.unit.clone(),
            mean: attribute.mean,
            deviation: attribute.deviation,
            differentiation_mean: attribute.differentiation_mean,
            differentiation_deviation: attribute.differentiation_deviation,
        }
    }
}

/// Node shape: one series, an aggregate of sub-nodes, or a series derived
/// from a base node through a named transform.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Simple,
    Composite { children: Vec<SeriesKey> },
    Derived {
        base: SeriesKey,
        transform: TransformKind,
        inverse: TransformKind,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub key: SeriesKey,
    pub stats: NodeStats,
    pub spec: NodeSpec,
}

impl Node {
    pub fn simple(key: SeriesKey, attribute: &AttributeSummary) -> Self {
        Self {
            key,
            stats: attribute.into(),
            spec: NodeSpec::Simple,
        }
    }

    /// Derive a shifted node from `base`, keeping its stats.
    pub fn derived(
        key: SeriesKey,
        base: &Node,
        transform: TransformKind,
        inverse: TransformKind,
    ) -> Self {
        Self {
            key,
            stats: base.stats.clone(),
            spec: NodeSpec::Derived {
                base: base.key.clone(),
                transform,
                inverse,
            },
        }
    }
}

/// Arena of nodes indexed by identity key. Insertion is idempotent and
/// order-preserving; the first occurrence of a key wins.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: IndexMap<SeriesKey, Node>,
}

impl NodeArena {
    pub fn insert(&mut self, node: Node) {
        if self.nodes.contains_key(&node.key) {
            debug!(node = %node.key, "duplicate node ignored");
            return;
        }
        self.nodes.insert(node.key.clone(), node);
    }

    pub fn get(&self, key: &SeriesKey) -> Result<&Node> {
        self.nodes
            .get(key)
            .ok_or_else(|| EngineError::InvalidParameter(format!("node {key} is not registered")))
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}

/// The authoritative input/output node lists of one model build, plus the
/// arena holding every referenced node.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    pub input: Vec<SeriesKey>,
    pub output: Vec<SeriesKey>,
    pub arena: NodeArena,
}

impl NodeSet {
    /// Assemble from node lists, deduplicating each list by identity key
    /// (first occurrence wins).
    pub fn new(input_nodes: Vec<Node>, output_nodes: Vec<Node>) -> Self {
        Self::from_parts(input_nodes, output_nodes, NodeArena::default())
    }

    /// Like [`NodeSet::new`], seeding the arena with support nodes (such as
    /// the base nodes of derived entries) that belong to neither list.
    pub fn from_parts(input_nodes: Vec<Node>, output_nodes: Vec<Node>, arena: NodeArena) -> Self {
        let mut set = NodeSet {
            arena,
            ..NodeSet::default()
        };
        set.input = set.register(input_nodes);
        set.output = set.register(output_nodes);
        set
    }

    fn register(&mut self, nodes: Vec<Node>) -> Vec<SeriesKey> {
        let mut keys = Vec::new();
        for node in nodes {
            if !keys.contains(&node.key) {
                keys.push(node.key.clone());
            }
            self.arena.insert(node);
        }
        keys
    }

    /// Unmerged view: composites expanded to their constituents and derived
    /// nodes unwound to their base, naming exactly the raw series that must
    /// be fetched.
    pub fn unmerged(&self, keys: &[SeriesKey]) -> Result<Vec<SeriesKey>> {
        let mut expanded = Vec::new();
        for key in keys {
            self.expand(key, &mut expanded)?;
        }
        Ok(expanded)
    }

    fn expand(&self, key: &SeriesKey, expanded: &mut Vec<SeriesKey>) -> Result<()> {
        let node = self.arena.get(key)?;
        match &node.spec {
            NodeSpec::Simple => {
                if !expanded.contains(key) {
                    expanded.push(key.clone());
                }
            }
            NodeSpec::Composite { children } => {
                for child in children {
                    self.expand(child, expanded)?;
                }
            }
            NodeSpec::Derived { base, .. } => {
                self.expand(base, expanded)?;
            }
        }
        Ok(())
    }

    /// Original view: derived keys unwound to their base identity, used to
    /// report results back in physically meaningful terms.
    pub fn original(&self, key: &SeriesKey) -> Result<SeriesKey> {
        match &self.arena.get(key)?.spec {
            NodeSpec::Derived { base, .. } => self.original(base),
            _ => Ok(key.clone()),
        }
    }

    pub fn to_document(&self) -> Result<NodeSetDocument> {
        Ok(NodeSetDocument {
            input: self.embed_all(&self.input)?,
            output: self.embed_all(&self.output)?,
        })
    }

    fn embed_all(&self, keys: &[SeriesKey]) -> Result<Vec<NodeConfig>> {
        keys.iter().map(|key| self.embed(key)).collect()
    }

    fn embed(&self, key: &SeriesKey) -> Result<NodeConfig> {
        let node = self.arena.get(key)?;
        let mut config = NodeConfig {
            device_type: node.key.device_type,
            measurement: node.key.measurement.clone(),
            device: node.key.device.clone(),
            stats: node.stats.clone(),
            sub_nodes: None,
            original_node: None,
            transformer: None,
            detransformer: None,
        };
        match &node.spec {
            NodeSpec::Simple => {}
            NodeSpec::Composite { children } => {
                config.sub_nodes = Some(self.embed_all(children)?);
            }
            NodeSpec::Derived {
                base,
                transform,
                inverse,
            } => {
                config.original_node = Some(Box::new(self.embed(base)?));
                config.transformer = Some(*transform);
                config.detransformer = Some(*inverse);
            }
        }
        Ok(config)
    }

    pub fn from_document(document: NodeSetDocument) -> NodeSet {
        let mut set = NodeSet::default();
        for config in &document.input {
            let key = config.register(&mut set.arena);
            if !set.input.contains(&key) {
                set.input.push(key);
            }
        }
        for config in &document.output {
            let key = config.register(&mut set.arena);
            if !set.output.contains(&key) {
                set.output.push(key);
            }
        }
        set
    }
}

/// Persisted node-set document: `{input: [...], output: [...]}` with
/// recursively embedded sub-nodes and original nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSetDocument {
    pub input: Vec<NodeConfig>,
    pub output: Vec<NodeConfig>,
}

/// One embedded node of the persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub device_type: crate::metadata::DeviceType,
    pub measurement: String,
    pub device: String,
    #[serde(flatten)]
    pub stats: NodeStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_nodes: Option<Vec<NodeConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_node: Option<Box<NodeConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<TransformKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detransformer: Option<TransformKind>,
}

impl NodeConfig {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.device_type, &self.measurement, &self.device)
    }

    fn register(&self, arena: &mut NodeArena) -> SeriesKey {
        let key = self.key();
        let spec = if let Some(sub_nodes) = &self.sub_nodes {
            let children = sub_nodes
                .iter()
                .map(|child| child.register(arena))
                .collect();
            NodeSpec::Composite { children }
        } else if let Some(original) = &self.original_node {
            let base = original.register(arena);
            NodeSpec::Derived {
                base,
                transform: self.transformer.unwrap_or_default(),
                inverse: self.detransformer.unwrap_or_default(),
            }
        } else {
            NodeSpec::Simple
        };
        arena.insert(Node {
            key: key.clone(),
            stats: self.stats.clone(),
            spec,
        });
        key
    }
}
