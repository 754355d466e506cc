//! Write path, the inverse of result shaping: a series table goes back to
//! the store as tagged point batches.

use crate::error::Result;
use crate::metadata::DatacenterMetadata;
use crate::query::TimePrecision;
use crate::series::{format_value, SeriesTable};
use crate::tsdb::{Point, PointBatch, TimeSeriesStore};
use indexmap::IndexMap;
use tracing::{info, warn};

/// Write every column of `table` as one point batch tagged with the
/// datacenter, device type, device, and any caller tags. Missing values are
/// simply absent from the batch. Returns the logical AND of the per-batch
/// write statuses.
pub async fn write_series(
    store: &dyn TimeSeriesStore,
    table: &SeriesTable,
    metadata: &DatacenterMetadata,
    datacenter: &str,
    tags: &IndexMap<String, String>,
    precision: Option<TimePrecision>,
) -> Result<bool> {
    let mut status = true;
    for (key, series) in table.iter() {
        let device_types = match metadata.device_type(key.device_type) {
            Ok(device_types) => device_types,
            Err(_) => {
                warn!(node = %key, "no metadata for device type, column skipped");
                continue;
            }
        };
        let Some(measurement) = device_types.get(&key.measurement) else {
            warn!(node = %key, "no metadata for measurement, column skipped");
            continue;
        };

        let mut batch_tags = IndexMap::new();
        batch_tags.insert("datacenter".to_string(), datacenter.to_string());
        batch_tags.insert(
            "device_type".to_string(),
            key.device_type.as_str().to_string(),
        );
        batch_tags.insert("device".to_string(), key.device.clone());
        for (tag, value) in tags {
            batch_tags.insert(tag.clone(), value.clone());
        }

        let value_type = measurement.attribute.value_type;
        let points: Vec<Point> = series
            .iter()
            .map(|(timestamp, value)| Point {
                time: *timestamp,
                value: format_value(value, value_type, None),
            })
            .collect();
        if points.is_empty() {
            continue;
        }
        let batch = PointBatch {
            measurement: key.measurement.clone(),
            tags: batch_tags,
            points,
        };
        status &= store.write_points(&batch, precision).await?;
    }
    info!(datacenter, columns = table.column_count(), status, "series written");
    Ok(status)
}
