//! `dcp nodes` - inspect a persisted node-set file

use crate::output::{print_table, OutputFormat};
use anyhow::{Context, Result};
use predictor_engine::nodes::{NodeSet, NodeSetDocument, NodeSpec};
use serde::Serialize;
use std::fs;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct NodeRow {
    #[tabled(rename = "LIST")]
    list: &'static str,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "MEAN")]
    mean: String,
    #[tabled(rename = "DEVIATION")]
    deviation: String,
}

fn stat(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

fn rows(set: &NodeSet, keys: &[predictor_engine::SeriesKey], list: &'static str) -> Vec<NodeRow> {
    keys.iter()
        .filter_map(|key| set.arena.get(key).ok())
        .map(|node| {
            let kind = match &node.spec {
                NodeSpec::Simple => "simple".to_string(),
                NodeSpec::Composite { children } => format!("composite({})", children.len()),
                NodeSpec::Derived { base, transform, .. } => {
                    format!("{transform:?} of {base}").to_lowercase()
                }
            };
            NodeRow {
                list,
                node: node.key.to_string(),
                kind,
                mean: stat(node.stats.mean),
                deviation: stat(node.stats.deviation),
            }
        })
        .collect()
}

pub fn run(file: &str, format: OutputFormat) -> Result<()> {
    let text = fs::read_to_string(file).with_context(|| format!("cannot read {file}"))?;
    let document: NodeSetDocument =
        serde_json::from_str(&text).with_context(|| format!("cannot parse {file}"))?;
    let set = NodeSet::from_document(document);

    let mut table = rows(&set, &set.input, "input");
    table.extend(rows(&set, &set.output, "output"));
    print_table(&table, format);
    Ok(())
}
