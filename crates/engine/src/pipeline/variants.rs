//! Model variants
//!
//! A variant rewrites the node lists of a model build before they are
//! frozen into a node set. Variants are looked up by name from a static
//! registry assembled at startup.

use crate::error::{EngineError, Result};
use crate::metadata::DeviceType;
use crate::nodes::{Node, NodeArena, TransformKind};
use crate::series::SeriesKey;
use indexmap::IndexMap;
use std::sync::OnceLock;

/// Strategy hooks applied to a model build's node lists. Derived nodes may
/// register their base nodes into `arena`.
pub trait ModelVariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn process_input_nodes(&self, nodes: Vec<Node>, arena: &mut NodeArena) -> Vec<Node> {
        let _ = arena;
        nodes
    }

    fn process_output_nodes(&self, nodes: Vec<Node>, arena: &mut NodeArena) -> Vec<Node> {
        let _ = arena;
        nodes
    }
}

/// Identity variant, nodes pass through untouched.
pub struct DefaultVariant;

impl ModelVariant for DefaultVariant {
    fn name(&self) -> &'static str {
        "default"
    }
}

/// Next-interval prediction: controller-attribute inputs and
/// sensor-attribute outputs are replaced by time-shifted derivations, so
/// the model learns how the current control settings drive the next
/// sample; predictions unshift back onto the physical timeline.
pub struct ShiftedPredictionVariant;

impl ShiftedPredictionVariant {
    fn shift(node: Node, arena: &mut NodeArena) -> Node {
        let key = SeriesKey::new(
            node.key.device_type,
            &node.key.measurement,
            &format!("shifted_{}", node.key.device),
        );
        let derived = Node::derived(key, &node, TransformKind::Shift, TransformKind::Unshift);
        arena.insert(node);
        derived
    }

    fn shift_matching(
        nodes: Vec<Node>,
        device_type: DeviceType,
        arena: &mut NodeArena,
    ) -> Vec<Node> {
        nodes
            .into_iter()
            .map(|node| {
                if node.key.device_type == device_type {
                    Self::shift(node, arena)
                } else {
                    node
                }
            })
            .collect()
    }
}

impl ModelVariant for ShiftedPredictionVariant {
    fn name(&self) -> &'static str {
        "shifted_prediction"
    }

    fn process_input_nodes(&self, nodes: Vec<Node>, arena: &mut NodeArena) -> Vec<Node> {
        Self::shift_matching(nodes, DeviceType::ControllerAttribute, arena)
    }

    fn process_output_nodes(&self, nodes: Vec<Node>, arena: &mut NodeArena) -> Vec<Node> {
        Self::shift_matching(nodes, DeviceType::SensorAttribute, arena)
    }
}

/// Name-indexed variant lookup.
pub struct VariantRegistry {
    variants: IndexMap<&'static str, Box<dyn ModelVariant>>,
}

impl VariantRegistry {
    fn new() -> Self {
        let mut variants: IndexMap<&'static str, Box<dyn ModelVariant>> = IndexMap::new();
        for variant in [
            Box::new(DefaultVariant) as Box<dyn ModelVariant>,
            Box::new(ShiftedPredictionVariant),
        ] {
            variants.insert(variant.name(), variant);
        }
        Self { variants }
    }

    pub fn get(&self, name: &str) -> Result<&dyn ModelVariant> {
        self.variants
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| EngineError::RecordNotExists(format!("variant {name} does not exist")))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.variants.keys().copied()
    }
}

/// The process-wide registry, assembled on first use.
pub fn variant_registry() -> &'static VariantRegistry {
    static REGISTRY: OnceLock<VariantRegistry> = OnceLock::new();
    REGISTRY.get_or_init(VariantRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AttributeSummary, ValueType};
    use crate::nodes::{NodeSet, NodeSpec};

    fn node(device_type: DeviceType, measurement: &str, device: &str) -> Node {
        let mut attribute = AttributeSummary::new(ValueType::Continuous);
        attribute.mean = Some(10.0);
        attribute.deviation = Some(1.0);
        Node::simple(SeriesKey::new(device_type, measurement, device), &attribute)
    }

    #[test]
    fn test_default_variant_is_identity() {
        let mut arena = NodeArena::default();
        let variant = variant_registry().get("default").unwrap();
        let nodes = variant.process_input_nodes(
            vec![node(DeviceType::SensorAttribute, "temperature", "s1")],
            &mut arena,
        );
        assert_eq!(nodes.len(), 1);
        assert!(matches!(nodes[0].spec, NodeSpec::Simple));
    }

    #[test]
    fn test_shifted_prediction_derives_shift_nodes() {
        let variant = variant_registry().get("shifted_prediction").unwrap();
        let mut arena = NodeArena::default();
        let inputs = variant.process_input_nodes(
            vec![
                node(DeviceType::ControllerAttribute, "fan_speed", "c1"),
                node(DeviceType::SensorAttribute, "temperature", "s1"),
            ],
            &mut arena,
        );
        let outputs = variant.process_output_nodes(
            vec![node(DeviceType::SensorAttribute, "temperature", "s2")],
            &mut arena,
        );
        let set = NodeSet::from_parts(inputs, outputs, arena);

        assert_eq!(set.input[0].device, "shifted_c1");
        assert_eq!(set.input[1].device, "s1");
        assert_eq!(set.output[0].device, "shifted_s2");

        // the fetch view resolves back to the physical series
        let fetch = set.unmerged(&set.input).unwrap();
        assert_eq!(fetch[0].device, "c1");
        assert_eq!(fetch[1].device, "s1");
    }

    #[test]
    fn test_unknown_variant_is_an_error() {
        assert!(variant_registry().get("quadratic").is_err());
    }
}
