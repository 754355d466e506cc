//! Integration tests for the resolve -> query -> shape -> pipeline flow

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use predictor_engine::metadata::{
    resolve, AttributeSummary, DatacenterMetadata, MeasurementMetadata, MemoryMetadataStore,
    MetadataSession, MetadataStore, Selection, ValueType,
};
use predictor_engine::nodes::{Node, NodeSet};
use predictor_engine::query::{Filter, QuerySpec, TimePrecision};
use predictor_engine::series::{convert_unit, shape_series, SeriesKey, SeriesTable, Value};
use predictor_engine::tsdb::{MemoryStore, Point, PointBatch, TimeSeriesStore};
use predictor_engine::write::write_series;
use predictor_engine::{pipeline, DeviceType};

fn datacenter_metadata() -> DatacenterMetadata {
    let mut attribute = AttributeSummary::new(ValueType::Continuous);
    attribute.unit = Some("C".to_string());
    attribute.mean = Some(20.0);
    attribute.deviation = Some(2.0);
    let mut metadata = DatacenterMetadata::new(60);
    metadata
        .device_types
        .entry(DeviceType::SensorAttribute)
        .or_default()
        .insert(
            "temperature".to_string(),
            MeasurementMetadata {
                devices: vec!["s1".to_string(), "s2".to_string()],
                attribute,
            },
        );
    metadata
}

fn sensor_key(device: &str) -> SeriesKey {
    SeriesKey::new(DeviceType::SensorAttribute, "temperature", device)
}

async fn seed(store: &MemoryStore, device: &str, value: f64) {
    let mut tags = IndexMap::new();
    tags.insert("datacenter".to_string(), "dc1".to_string());
    tags.insert("device".to_string(), device.to_string());
    store
        .write_points(
            &PointBatch {
                measurement: "temperature".to_string(),
                tags,
                points: vec![Point {
                    time: Utc::now(),
                    value: Value::Float(value),
                }],
            },
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_resolve_query_shape_normalize_denormalize() {
    let metadata_store = MemoryMetadataStore::new();
    metadata_store.insert("dc1", datacenter_metadata()).await;
    let session = MetadataSession::begin(&metadata_store);
    let metadata = session.datacenter_metadata("dc1").await.unwrap();
    session.rollback();

    // an empty selection resolves to everything the metadata declares
    let mapping = resolve(&Selection::All, &metadata, true).unwrap();
    let devices = &mapping[&DeviceType::SensorAttribute]["temperature"];
    assert_eq!(devices, &vec!["s1".to_string(), "s2".to_string()]);

    let store = MemoryStore::new();
    seed(&store, "s1", 21.0).await;
    seed(&store, "s2", 19.0).await;

    let mut spec = QuerySpec::new("temperature");
    spec.filter = Some(
        Filter::time_range(Some("-1h"), Some("now()"))
            .tag("datacenter", "dc1")
            .tag("device", devices.clone()),
    );
    spec.group_by = vec!["time(60s)".to_string()];
    spec.order_by = vec!["time".to_string()];
    spec.aggregation = Some("mean".to_string());

    let raw = store.query(&spec.compile().unwrap(), None).await.unwrap();
    let table = shape_series(
        &raw,
        DeviceType::SensorAttribute,
        "temperature",
        devices,
        ValueType::Continuous,
        None,
        None,
    )
    .unwrap();

    let timestamp = *table
        .column(&sensor_key("s1"))
        .unwrap()
        .keys()
        .next()
        .unwrap();
    assert_eq!(
        table.column(&sensor_key("s1")).unwrap()[&timestamp],
        Value::Float(21.0)
    );
    assert_eq!(
        table.column(&sensor_key("s2")).unwrap()[&timestamp],
        Value::Float(19.0)
    );

    // z-score against the declared statistics, then invert with the guard
    let attribute = &metadata
        .measurement(DeviceType::SensorAttribute, "temperature")
        .unwrap()
        .attribute;
    let nodes: Vec<Node> = devices
        .iter()
        .map(|device| Node::simple(sensor_key(device), attribute))
        .collect();
    let set = NodeSet::new(nodes, Vec::new());

    let normalized = pipeline::normalize(&table, &set, &set.input).unwrap();
    let value = normalized.column(&sensor_key("s1")).unwrap()[&timestamp]
        .as_f64()
        .unwrap();
    assert!((value - 0.5).abs() < 1e-9);

    let recovered = pipeline::denormalize(&normalized, &set, &set.input).unwrap();
    let value = recovered.column(&sensor_key("s1")).unwrap()[&timestamp]
        .as_f64()
        .unwrap();
    assert!((value - 21.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_write_then_read_round_trip_rounds_continuous_values() {
    let store = MemoryStore::new();
    let metadata = datacenter_metadata();
    let mut table = SeriesTable::new();
    let base = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
    for (i, value) in [21.011, 19.499, 20.0].iter().enumerate() {
        table.insert_value(
            &sensor_key("s1"),
            base + chrono::Duration::seconds(60 * i as i64),
            Value::Float(*value),
        );
    }

    let status = write_series(&store, &table, &metadata, "dc1", &IndexMap::new(), None)
        .await
        .unwrap();
    assert!(status);

    let mut spec = QuerySpec::new("temperature");
    spec.filter = Some(Filter::time_range(
        Some("1970-01-01 00:00:00"),
        Some("1970-01-01 01:00:00"),
    ));
    let raw = store
        .query(&spec.compile().unwrap(), Some(TimePrecision::Seconds))
        .await
        .unwrap();
    let read = shape_series(
        &raw,
        DeviceType::SensorAttribute,
        "temperature",
        &["s1".to_string()],
        ValueType::Continuous,
        None,
        Some(TimePrecision::Seconds),
    )
    .unwrap();

    let column = read.column(&sensor_key("s1")).unwrap();
    let values: Vec<f64> = column.values().filter_map(Value::as_f64).collect();
    assert_eq!(values, vec![21.01, 19.5, 20.0]);
}

#[test]
fn test_unit_conversion_is_invertible() {
    for value in [0.0, 1.0, 1500.0, -42.5] {
        let converted = convert_unit(value, "w", "kw");
        assert!((convert_unit(converted, "kw", "w") - value).abs() < 1e-9);
    }
}
