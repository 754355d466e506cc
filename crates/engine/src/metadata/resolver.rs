//! Selection resolution against datacenter metadata
//!
//! Expands a caller-supplied selection (none / single name / list / nested
//! mapping) into a concrete device-type mapping. Read paths resolve in
//! strict mode and fail on unknown names; write paths resolve leniently
//! because new data may arrive before metadata catches up, so unknown names
//! are logged and skipped there.

use crate::error::{EngineError, Result};
use crate::metadata::{DatacenterMetadata, DeviceType, DeviceTypeMetadata, MeasurementMetadata};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Caller-supplied selection. Any omitted level means "all at that level".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    #[default]
    All,
    One(String),
    Many(Vec<String>),
    Tree(IndexMap<String, Selection>),
}

/// Resolved mapping device_type -> measurement -> devices: the contract
/// between the resolver and the query compiler / result shaper.
pub type DeviceTypeMapping = IndexMap<DeviceType, IndexMap<String, Vec<String>>>;

/// Resolve `selection` against `metadata`.
///
/// Given the same selection and metadata the result is identical on every
/// call; insertion order is used for iteration only, never for semantics.
pub fn resolve(
    selection: &Selection,
    metadata: &DatacenterMetadata,
    strict: bool,
) -> Result<DeviceTypeMapping> {
    let mut mapping = DeviceTypeMapping::new();
    for (name, sub_selection) in named_entries(selection, metadata)? {
        let device_type = match lookup_device_type(&name, metadata, strict)? {
            Some(device_type) => device_type,
            None => continue,
        };
        let device_type_metadata = &metadata.device_types[&device_type];
        let measurements =
            resolve_measurements(&sub_selection, device_type, device_type_metadata, strict)?;
        mapping.insert(device_type, measurements);
    }
    Ok(mapping)
}

/// Flatten the top selection level into (device-type name, sub-selection)
/// pairs, defaulting omitted levels to `Selection::All`.
fn named_entries(
    selection: &Selection,
    metadata: &DatacenterMetadata,
) -> Result<Vec<(String, Selection)>> {
    Ok(match selection {
        Selection::All => metadata
            .device_types
            .keys()
            .map(|d| (d.as_str().to_string(), Selection::All))
            .collect(),
        Selection::One(name) => vec![(name.clone(), Selection::All)],
        Selection::Many(names) => names
            .iter()
            .map(|name| (name.clone(), Selection::All))
            .collect(),
        Selection::Tree(tree) => tree
            .iter()
            .map(|(name, sub)| (name.clone(), sub.clone()))
            .collect(),
    })
}

fn lookup_device_type(
    name: &str,
    metadata: &DatacenterMetadata,
    strict: bool,
) -> Result<Option<DeviceType>> {
    let known = name
        .parse::<DeviceType>()
        .ok()
        .filter(|device_type| metadata.device_types.contains_key(device_type));
    match known {
        Some(device_type) => Ok(Some(device_type)),
        None if strict => Err(EngineError::RecordNotExists(format!(
            "device type {name} does not exist"
        ))),
        None => {
            warn!(device_type = name, "skipping unknown device type");
            Ok(None)
        }
    }
}

fn resolve_measurements(
    selection: &Selection,
    device_type: DeviceType,
    device_type_metadata: &DeviceTypeMetadata,
    strict: bool,
) -> Result<IndexMap<String, Vec<String>>> {
    let entries: Vec<(String, Selection)> = match selection {
        Selection::All => device_type_metadata
            .keys()
            .map(|m| (m.clone(), Selection::All))
            .collect(),
        Selection::One(name) => vec![(name.clone(), Selection::All)],
        Selection::Many(names) => names
            .iter()
            .map(|name| (name.clone(), Selection::All))
            .collect(),
        Selection::Tree(tree) => tree
            .iter()
            .map(|(name, sub)| (name.clone(), sub.clone()))
            .collect(),
    };
    let mut measurements = IndexMap::new();
    for (measurement, device_selection) in entries {
        let measurement_metadata = match device_type_metadata.get(&measurement) {
            Some(measurement_metadata) => measurement_metadata,
            None if strict => {
                return Err(EngineError::RecordNotExists(format!(
                    "measurement {measurement} does not exist in device type {device_type}"
                )));
            }
            None => {
                warn!(
                    device_type = %device_type,
                    measurement = %measurement,
                    "skipping unknown measurement"
                );
                continue;
            }
        };
        let devices = resolve_devices(
            &device_selection,
            device_type,
            &measurement,
            measurement_metadata,
            strict,
        )?;
        measurements.insert(measurement, devices);
    }
    Ok(measurements)
}

fn resolve_devices(
    selection: &Selection,
    device_type: DeviceType,
    measurement: &str,
    measurement_metadata: &MeasurementMetadata,
    strict: bool,
) -> Result<Vec<String>> {
    let declared = &measurement_metadata.devices;
    let requested: Vec<String> = match selection {
        Selection::All => return Ok(declared.clone()),
        Selection::One(name) => vec![name.clone()],
        Selection::Many(names) => names.clone(),
        Selection::Tree(_) => {
            return Err(EngineError::InvalidParameter(format!(
                "device selection for {device_type}.{measurement} must be a name or a list"
            )));
        }
    };
    // Devices are only ever drawn from the declared set; resolution never
    // invents identifiers.
    let mut devices = Vec::new();
    for device in requested {
        if !declared.contains(&device) {
            if strict {
                return Err(EngineError::RecordNotExists(format!(
                    "device {device} does not exist in {device_type}.{measurement}"
                )));
            }
            warn!(
                device_type = %device_type,
                measurement = %measurement,
                device = %device,
                "skipping unknown device"
            );
            continue;
        }
        if !devices.contains(&device) {
            devices.push(device);
        }
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{AttributeSummary, MeasurementMetadata, ValueType};

    fn test_metadata() -> DatacenterMetadata {
        let mut metadata = DatacenterMetadata::new(60);
        let mut sensor = DeviceTypeMetadata::new();
        sensor.insert(
            "temperature".to_string(),
            MeasurementMetadata {
                devices: vec!["s1".to_string(), "s2".to_string()],
                attribute: AttributeSummary::new(ValueType::Continuous),
            },
        );
        sensor.insert(
            "humidity".to_string(),
            MeasurementMetadata {
                devices: vec!["s1".to_string()],
                attribute: AttributeSummary::new(ValueType::Continuous),
            },
        );
        let mut power = DeviceTypeMetadata::new();
        power.insert(
            "power".to_string(),
            MeasurementMetadata {
                devices: vec!["p1".to_string()],
                attribute: AttributeSummary::new(ValueType::Continuous),
            },
        );
        metadata
            .device_types
            .insert(DeviceType::SensorAttribute, sensor);
        metadata
            .device_types
            .insert(DeviceType::PowerSupplyAttribute, power);
        metadata
    }

    #[test]
    fn test_empty_selection_selects_everything() {
        let metadata = test_metadata();
        let mapping = resolve(&Selection::All, &metadata, true).unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(
            mapping[&DeviceType::SensorAttribute]["temperature"],
            vec!["s1", "s2"]
        );
        assert_eq!(mapping[&DeviceType::SensorAttribute]["humidity"], vec!["s1"]);
        assert_eq!(mapping[&DeviceType::PowerSupplyAttribute]["power"], vec!["p1"]);
    }

    #[test]
    fn test_single_name_and_list_selection() {
        let metadata = test_metadata();
        let mapping = resolve(
            &Selection::One("sensor_attribute".to_string()),
            &metadata,
            true,
        )
        .unwrap();
        assert_eq!(mapping.len(), 1);
        assert!(mapping.contains_key(&DeviceType::SensorAttribute));

        let mapping = resolve(
            &Selection::Many(vec![
                "sensor_attribute".to_string(),
                "power_supply_attribute".to_string(),
            ]),
            &metadata,
            true,
        )
        .unwrap();
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_nested_mapping_selection() {
        let metadata = test_metadata();
        let selection: Selection = serde_json::from_value(serde_json::json!({
            "sensor_attribute": {
                "temperature": ["s2"]
            }
        }))
        .unwrap();
        let mapping = resolve(&selection, &metadata, true).unwrap();
        assert_eq!(mapping.len(), 1);
        let measurements = &mapping[&DeviceType::SensorAttribute];
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements["temperature"], vec!["s2"]);
    }

    #[test]
    fn test_strict_mode_raises_on_unknown_names() {
        let metadata = test_metadata();
        let unknown_type = Selection::One("rack_attribute".to_string());
        assert!(matches!(
            resolve(&unknown_type, &metadata, true),
            Err(EngineError::RecordNotExists(_))
        ));

        // controller_attribute is a valid kind but absent from this
        // datacenter's metadata
        let absent_type = Selection::One("controller_attribute".to_string());
        assert!(matches!(
            resolve(&absent_type, &metadata, true),
            Err(EngineError::RecordNotExists(_))
        ));

        let unknown_measurement: Selection = serde_json::from_value(serde_json::json!({
            "sensor_attribute": "pressure"
        }))
        .unwrap();
        assert!(matches!(
            resolve(&unknown_measurement, &metadata, true),
            Err(EngineError::RecordNotExists(_))
        ));

        let unknown_device: Selection = serde_json::from_value(serde_json::json!({
            "sensor_attribute": {"temperature": "s9"}
        }))
        .unwrap();
        assert!(matches!(
            resolve(&unknown_device, &metadata, true),
            Err(EngineError::RecordNotExists(_))
        ));
    }

    #[test]
    fn test_lenient_mode_skips_unknown_names() {
        let metadata = test_metadata();
        let selection: Selection = serde_json::from_value(serde_json::json!({
            "rack_attribute": null,
            "sensor_attribute": {
                "temperature": ["s1", "s9"],
                "pressure": null
            }
        }))
        .unwrap();
        let mapping = resolve(&selection, &metadata, false).unwrap();
        assert_eq!(mapping.len(), 1);
        let measurements = &mapping[&DeviceType::SensorAttribute];
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements["temperature"], vec!["s1"]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let metadata = test_metadata();
        let first = resolve(&Selection::All, &metadata, true).unwrap();
        let second = resolve(&Selection::All, &metadata, true).unwrap();
        let first_keys: Vec<_> = first.keys().collect();
        let second_keys: Vec<_> = second.keys().collect();
        assert_eq!(first_keys, second_keys);
        assert_eq!(first, second);
    }

    #[test]
    fn test_devices_are_subset_of_declared() {
        let metadata = test_metadata();
        let mapping = resolve(&Selection::All, &metadata, true).unwrap();
        for (device_type, measurements) in &mapping {
            for (measurement, devices) in measurements {
                let declared = &metadata.device_types[device_type][measurement].devices;
                assert!(devices.iter().all(|d| declared.contains(d)));
            }
        }
    }
}
