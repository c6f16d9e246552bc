use anyhow::{Context, Result};

use crate::api::{HttpVmApi, NodeSummary, VmApi};
use crate::config::AppConfig;
use crate::ui::{format_percent, format_uptime, print_table};

const HEADERS: [&str; 5] = ["NODE", "STATUS", "CPU%", "RAM%", "UPTIME"];

pub(crate) async fn run(config: &AppConfig) -> Result<()> {
    let api = HttpVmApi::new(config.api_url.clone());
    let mut nodes = api.list_nodes().await.context("failed to list nodes")?;
    nodes.sort_by(|a, b| a.node.cmp(&b.node));

    if nodes.is_empty() {
        println!("No nodes.");
        return Ok(());
    }

    print_table(&HEADERS, &table_rows(&nodes), None);
    Ok(())
}

fn table_rows(nodes: &[NodeSummary]) -> Vec<Vec<String>> {
    nodes
        .iter()
        .map(|node| {
            let memory = match (node.mem, node.maxmem) {
                (Some(used), Some(max)) if max > 0.0 => Some(used / max * 100.0),
                _ => None,
            };
            vec![
                node.node.clone(),
                node.status.clone().unwrap_or_else(|| "unknown".to_string()),
                format_percent(node.cpu.map(|fraction| fraction * 100.0)),
                format_percent(memory),
                format_uptime(node.uptime),
            ]
        })
        .collect()
}
