//! # ponyvirt-ctl
//!
//! Command-line front end to the `ponyvirt` registry: list, inspect, define
//! and drive domains, and hot-plug their disks. Results are printed to stdout
//! as JSON; logs go to stderr.
//!
//! ## Usage
//! ```bash
//! ponyvirt-ctl --uri qemu:///system list
//! ponyvirt-ctl define web1.yaml --start
//! ponyvirt-ctl attach-disk web1 data-disk.yaml
//! ponyvirt-ctl detach-disk web1 vdb
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use ponyvirt::{Backend, Hypervisor, MockBackend, Template};

mod cli;
mod commands;
mod config;
mod logging;
mod manifest;

use cli::Args;
use config::{BackendKind, Config};

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::resolve(&args)?;

    // Initialize logging
    logging::init_logging(&config.log_level, config.log_format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.connection.backend,
        uri = %config.connection.uri,
        "ponyvirt-ctl configured"
    );

    let template = match &config.template {
        Some(path) => Template::load(path).with_context(|| "Failed to load domain template")?,
        None => Template::builtin(),
    };

    let result = match config.connection.backend {
        BackendKind::Mock => {
            info!("Using in-memory mock hypervisor (development mode)");
            execute(MockBackend::new(), template, &args)
        }
        BackendKind::Libvirt => connect_libvirt(&config.connection.uri)
            .and_then(|backend| execute(backend, template, &args)),
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

fn execute<B: Backend>(backend: B, template: Template, args: &Args) -> Result<()> {
    let hypervisor = Hypervisor::new(backend).with_template(template);

    let resolve = commands::Resolve { by_name: args.by_name };
    let output = commands::run(&hypervisor, &args.command, resolve)?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    hypervisor.close()?;
    Ok(())
}

#[cfg(feature = "libvirt")]
fn connect_libvirt(uri: &str) -> Result<ponyvirt::LibvirtBackend> {
    ponyvirt::LibvirtBackend::connect(uri)
        .with_context(|| format!("Failed to connect to libvirt at {}", uri))
}

#[cfg(not(feature = "libvirt"))]
fn connect_libvirt(uri: &str) -> Result<MockBackend> {
    anyhow::bail!(
        "Cannot connect to {}: built without the `libvirt` feature (use --dev for the mock backend)",
        uri
    )
}
