use clap::{Args, Parser, Subcommand};

const BUILD_VERSION: &str = env!("VMDECK_BUILD_VERSION");
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
USAGE:
  {usage}

COMMANDS:
{subcommands}

OPTIONS:
{options}
{after-help}
";
const HELP_AFTER: &str = "\
Quick Command Map
  Dashboard:
    ui
  Inventory:
    list/ls, nodes
  Lifecycle:
    start, stop, delete/rm

Environment
  VMDECK_API_URL        backend origin (default http://127.0.0.1:5000)
  VMDECK_NODE           default node filter for list and ui
  VMDECK_HOME           data directory (log file lives here)
  VMDECK_ALERT_TTL_MS   how long dashboard alerts stay up (default 5000)
  VMDECK_ALERT_FADE_MS  alert fade-out delay (default 150)

Examples
  vmdeck nodes
  vmdeck ls --node pve1
  vmdeck start 101 --node pve1
  vmdeck rm 101 --node pve1 --yes
";

#[derive(Debug, Parser)]
#[command(
    name = "vmdeck",
    version = BUILD_VERSION,
    about = "Virtual machine dashboard",
    help_template = HELP_TEMPLATE,
    after_help = HELP_AFTER
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Args)]
pub struct VmTarget {
    /// VM id as the backend knows it
    #[arg(value_parser = non_empty)]
    pub vmid: String,
    /// Node hosting the VM (see `vmdeck nodes`)
    #[arg(long, value_parser = non_empty)]
    pub node: String,
}

fn non_empty(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err("value must not be empty".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Interactive terminal dashboard
    Ui {
        #[arg(long)]
        node: Option<String>,
    },
    /// List VMs with status and usage
    #[command(visible_alias = "ls")]
    List {
        #[arg(long)]
        node: Option<String>,
    },
    /// List hypervisor nodes usable with --node
    Nodes,
    /// Power on a VM
    Start {
        #[command(flatten)]
        target: VmTarget,
    },
    /// Power off a VM
    Stop {
        #[command(flatten)]
        target: VmTarget,
    },
    /// Delete a VM and its disks permanently
    #[command(visible_alias = "rm")]
    Delete {
        #[command(flatten)]
        target: VmTarget,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },
}
