use anyhow::{Context, Result};

use crate::api::{HttpVmApi, VmApi, VmSummary};
use crate::config::AppConfig;
use crate::gauges::{cpu_percent, memory_percent};
use crate::ui::{format_megabytes, format_percent, print_table};

const HEADERS: [&str; 7] = ["VMID", "NAME", "NODE", "STATUS", "CPU%", "RAM(MB)", "RAM%"];
const STATUS_COLUMN: usize = 3;

pub(crate) async fn run(config: &AppConfig, node: Option<String>) -> Result<()> {
    let api = HttpVmApi::new(config.api_url.clone());
    let node = config.node_filter(node);
    let vms = api
        .list_vms(node.as_deref())
        .await
        .context("failed to list VMs")?;
    print_vm_table(vms);

    Ok(())
}

fn print_vm_table(mut vms: Vec<VmSummary>) {
    vms.sort_by(|a, b| natural_id_order(&a.vmid, &b.vmid));

    if vms.is_empty() {
        println!("No virtual machines.");
        return;
    }

    print_table(&HEADERS, &table_rows(&vms), Some(STATUS_COLUMN));
}

fn table_rows(vms: &[VmSummary]) -> Vec<Vec<String>> {
    vms.iter()
        .map(|vm| {
            vec![
                vm.vmid.clone(),
                vm.name.clone().unwrap_or_else(|| "-".to_string()),
                vm.node.clone().unwrap_or_else(|| "-".to_string()),
                vm.status.clone().unwrap_or_else(|| "unknown".to_string()),
                format_percent(cpu_percent(vm)),
                format_megabytes(vm.mem),
                format_percent(memory_percent(vm)),
            ]
        })
        .collect()
}

/// Numeric ids sort numerically, anything else after them lexically.
fn natural_id_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
