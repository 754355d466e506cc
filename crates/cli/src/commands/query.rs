//! `dcp query` - print the store queries a selection compiles to

use crate::output::print_info;
use anyhow::Result;
use predictor_engine::metadata::resolve;
use predictor_engine::query::{measurement_selector, Filter, QuerySpec};

pub async fn run(
    metadata_path: &str,
    datacenter: &str,
    selection: Option<&str>,
    starttime: &str,
    endtime: &str,
    aggregation: Option<&str>,
) -> Result<()> {
    let metadata = super::load_datacenter(metadata_path, datacenter).await?;
    let selection = super::parse_selection(selection)?;
    let mapping = resolve(&selection, &metadata, true)?;

    print_info(&format!(
        "{} queries at {}s cadence",
        mapping.values().map(|m| m.len()).sum::<usize>(),
        metadata.time_interval
    ));
    for (device_type, measurements) in &mapping {
        for (measurement, devices) in measurements {
            let attribute = &metadata.measurement(*device_type, measurement)?.attribute;
            let mut spec = QuerySpec::new(&measurement_selector(
                measurement,
                attribute.pattern.as_deref(),
            ));
            spec.filter = Some(
                Filter::time_range(Some(starttime), Some(endtime))
                    .tag("datacenter", datacenter)
                    .tag("device_type", device_type.as_str())
                    .tag("device", devices.clone()),
            );
            spec.order_by = vec!["time".to_string()];
            if let Some(aggregation) = aggregation {
                spec.aggregation = Some(aggregation.to_string());
                spec.group_by = vec![format!("time({}s)", metadata.time_interval)];
            }
            println!("{}", spec.compile()?);
        }
    }
    Ok(())
}
