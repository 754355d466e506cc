//! Per-datacenter metadata: the statistical/unit description of every
//! measurement, used to resolve selections and to normalize/denormalize
//! values.
//!
//! Metadata is read at the start of every query/transform/training session
//! and may be rewritten wholesale by a statistics refresh; it is never
//! partially mutated mid-session.

pub mod resolver;
pub mod stats;
pub mod store;

pub use resolver::{resolve, DeviceTypeMapping, Selection};
pub use stats::{refresh_statistics, StatsWindow};
pub use store::{MemoryMetadataStore, MetadataSession, MetadataStore};

use crate::error::{EngineError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The six fixed equipment categories carrying measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    SensorAttribute,
    ControllerAttribute,
    ControllerParameter,
    PowerSupplyAttribute,
    ControllerPowerSupplyAttribute,
    EnvironmentSensorAttribute,
}

impl DeviceType {
    pub const ALL: [DeviceType; 6] = [
        DeviceType::SensorAttribute,
        DeviceType::ControllerAttribute,
        DeviceType::ControllerParameter,
        DeviceType::PowerSupplyAttribute,
        DeviceType::ControllerPowerSupplyAttribute,
        DeviceType::EnvironmentSensorAttribute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::SensorAttribute => "sensor_attribute",
            DeviceType::ControllerAttribute => "controller_attribute",
            DeviceType::ControllerParameter => "controller_parameter",
            DeviceType::PowerSupplyAttribute => "power_supply_attribute",
            DeviceType::ControllerPowerSupplyAttribute => "controller_power_supply_attribute",
            DeviceType::EnvironmentSensorAttribute => "environment_sensor_attribute",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        DeviceType::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| EngineError::RecordNotExists(format!("device type {s} does not exist")))
    }
}

/// Declared value type of a measurement; determines which conversion and
/// format functions are legal to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Binary,
    Continuous,
    Integer,
    Discrete,
}

/// Statistical/unit attributes of one measurement.
///
/// The statistical fields are populated only after a statistics refresh;
/// normalize/denormalize are unsound without them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSummary {
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
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub differentiation_max: Option<f64>,
    #[serde(default)]
    pub differentiation_min: Option<f64>,
    /// Optional regex matching alternative measurement spellings, e.g.
    /// names written by downstream prediction jobs.
    #[serde(default)]
    pub pattern: Option<String>,
}

impl AttributeSummary {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            unit: None,
            mean: None,
            deviation: None,
            differentiation_mean: None,
            differentiation_deviation: None,
            max: None,
            min: None,
            differentiation_max: None,
            differentiation_min: None,
            pattern: None,
        }
    }
}

/// One measurement: the ordered set of devices carrying it plus its
/// attribute record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementMetadata {
    pub devices: Vec<String>,
    pub attribute: AttributeSummary,
}

/// Measurement name -> measurement metadata for one device type.
pub type DeviceTypeMetadata = IndexMap<String, MeasurementMetadata>;

/// Everything known about one datacenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterMetadata {
    /// Sampling cadence in seconds
    pub time_interval: u64,
    /// Model-type name -> config file reference
    #[serde(default)]
    pub models: IndexMap<String, String>,
    /// Opaque key/value properties
    #[serde(default)]
    pub properties: IndexMap<String, serde_json::Value>,
    /// Keys are drawn from the fixed closed set of device-type kinds
    #[serde(default)]
    pub device_types: IndexMap<DeviceType, DeviceTypeMetadata>,
}

impl DatacenterMetadata {
    pub fn new(time_interval: u64) -> Self {
        Self {
            time_interval,
            models: IndexMap::new(),
            properties: IndexMap::new(),
            device_types: IndexMap::new(),
        }
    }

    pub fn device_type(&self, device_type: DeviceType) -> Result<&DeviceTypeMetadata> {
        self.device_types.get(&device_type).ok_or_else(|| {
            EngineError::RecordNotExists(format!("device type {device_type} does not exist"))
        })
    }

    pub fn measurement(
        &self,
        device_type: DeviceType,
        measurement: &str,
    ) -> Result<&MeasurementMetadata> {
        self.device_type(device_type)?.get(measurement).ok_or_else(|| {
            EngineError::RecordNotExists(format!(
                "measurement {measurement} does not exist in device type {device_type}"
            ))
        })
    }
}
