//! Command-line argument parsing.

use clap::{Parser, Subcommand};

/// ponyvirt-ctl - domain and disk lifecycle control
#[derive(Parser, Debug)]
#[command(name = "ponyvirt-ctl")]
#[command(about = "ponyvirt-ctl - domain and disk lifecycle control")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PONYVIRT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Hypervisor connection URI (e.g., qemu:///system)
    #[arg(long, env = "PONYVIRT_URI")]
    pub uri: Option<String>,

    /// Domain template document used by `define`
    #[arg(long)]
    pub template: Option<String>,

    /// Enable development mode (in-memory mock hypervisor)
    #[arg(long)]
    pub dev: bool,

    /// Treat DOMAIN arguments as names even when they are all digits
    #[arg(long, global = true)]
    pub by_name: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the names of running domains
    List,
    /// Count running plus defined domains
    Count,
    /// Show state, memory, vCPUs, disks, console and VNC port of a domain
    Info {
        /// Domain name or numeric id
        domain: String,
    },
    /// Start a defined domain
    Start { domain: String },
    /// Request a graceful shutdown
    Shutdown { domain: String },
    /// Power a domain off immediately
    Destroy { domain: String },
    /// Pause a running domain
    Suspend { domain: String },
    /// Resume a paused domain
    Resume { domain: String },
    /// Destroy (if running) and undefine a domain
    Delete { domain: String },
    /// Define a domain from a YAML manifest
    Define {
        /// Path to the domain manifest
        manifest: String,
        /// Start the domain once defined
        #[arg(long)]
        start: bool,
    },
    /// Hot-plug a disk described by a YAML file into a running domain
    AttachDisk {
        domain: String,
        /// Path to the disk spec
        disk: String,
    },
    /// Hot-unplug the disk at a target (e.g. vdb) from a running domain
    DetachDisk { domain: String, target: String },
}
