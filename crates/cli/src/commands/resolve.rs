//! `dcp resolve` - expand a selection into a device-type mapping

use crate::output::{print_table, OutputFormat};
use anyhow::Result;
use predictor_engine::metadata::resolve;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct MappingRow {
    #[tabled(rename = "DEVICE TYPE")]
    device_type: String,
    #[tabled(rename = "MEASUREMENT")]
    measurement: String,
    #[tabled(rename = "DEVICES")]
    devices: String,
}

pub async fn run(
    metadata_path: &str,
    datacenter: &str,
    selection: Option<&str>,
    lenient: bool,
    format: OutputFormat,
) -> Result<()> {
    let metadata = super::load_datacenter(metadata_path, datacenter).await?;
    let selection = super::parse_selection(selection)?;
    let mapping = resolve(&selection, &metadata, !lenient)?;

    let rows: Vec<MappingRow> = mapping
        .iter()
        .flat_map(|(device_type, measurements)| {
            measurements.iter().map(|(measurement, devices)| MappingRow {
                device_type: device_type.to_string(),
                measurement: measurement.clone(),
                devices: devices.join(", "),
            })
        })
        .collect();
    print_table(&rows, format);
    Ok(())
}
