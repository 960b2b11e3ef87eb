//! Subcommand execution against any backend.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use ponyvirt::{Backend, DiskSpec, DomainRef, Error, Hypervisor};

use crate::cli::Command;
use crate::manifest::{read_yaml, DomainManifest};

/// How DOMAIN arguments are resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolve {
    /// Never treat an argument as a numeric id.
    pub by_name: bool,
}

impl Resolve {
    fn domain(&self, value: &str) -> DomainRef {
        if self.by_name {
            DomainRef::Name(value.to_string())
        } else {
            DomainRef::parse(value)
        }
    }
}

/// Run one subcommand and return its JSON result.
pub fn run<B: Backend>(hypervisor: &Hypervisor<B>, command: &Command, resolve: Resolve) -> Result<Value> {
    debug!(?command, ?resolve, "Running command");

    let output = match command {
        Command::List => json!(hypervisor.list()?),
        Command::Count => json!(hypervisor.len()?),
        Command::Info { domain } => info(hypervisor, resolve.domain(domain))?,
        Command::Start { domain } => {
            hypervisor.lookup(resolve.domain(domain))?.start()?;
            json!({ "domain": domain, "started": true })
        }
        Command::Shutdown { domain } => {
            hypervisor.lookup(resolve.domain(domain))?.shutdown()?;
            json!({ "domain": domain, "shutdown_requested": true })
        }
        Command::Destroy { domain } => {
            hypervisor.lookup(resolve.domain(domain))?.destroy()?;
            json!({ "domain": domain, "destroyed": true })
        }
        Command::Suspend { domain } => {
            hypervisor.lookup(resolve.domain(domain))?.suspend()?;
            json!({ "domain": domain, "suspended": true })
        }
        Command::Resume { domain } => {
            hypervisor.lookup(resolve.domain(domain))?.resume()?;
            json!({ "domain": domain, "resumed": true })
        }
        Command::Delete { domain } => {
            hypervisor.remove(resolve.domain(domain))?;
            json!({ "domain": domain, "deleted": true })
        }
        Command::Define { manifest, start } => {
            let manifest: DomainManifest = read_yaml(manifest)?;
            let definition = manifest.into_definition();
            let domain = hypervisor.define(&definition)?;
            if *start {
                domain.start()?;
            }
            json!({
                "domain": definition.name,
                "uuid": definition.uuid,
                "disks": domain.get_disks()?,
                "state": domain.state()?,
            })
        }
        Command::AttachDisk { domain, disk } => {
            let spec: DiskSpec = read_yaml(disk)?;
            let mut domain = hypervisor.lookup(resolve.domain(domain))?;
            json!(domain.attach_disk(&spec)?)
        }
        Command::DetachDisk { domain, target } => {
            let mut controller = hypervisor.lookup(resolve.domain(domain))?;
            let disk = controller
                .get_disks()?
                .into_iter()
                .find(|d| &d.target == target)
                .with_context(|| format!("Domain {} has no disk at {}", domain, target))?;

            controller.detach_disk(&disk)?;
            json!({ "domain": domain, "detached": target })
        }
    };

    Ok(output)
}

fn info<B: Backend>(hypervisor: &Hypervisor<B>, domain: DomainRef) -> Result<Value> {
    let domain = hypervisor.lookup(domain)?;
    let info = domain.info()?;

    let console = optional(domain.get_console_device())?;
    let vnc_port = optional(domain.get_vnc_port())?;

    Ok(json!({
        "name": domain.name()?,
        "info": info,
        "active": info.state.is_active(),
        "disks": domain.get_disks()?,
        "free_slots": domain.slots().len(),
        "console": console,
        "vnc_port": vnc_port,
    }))
}

/// Treat a missing device as an absent value.
fn optional<T>(result: ponyvirt::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::DeviceNotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ponyvirt::MockBackend;
    use std::io::Write;

    fn yaml_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn path(file: &tempfile::NamedTempFile) -> String {
        file.path().display().to_string()
    }

    #[test]
    fn test_define_attach_detach() {
        let hv = Hypervisor::new(MockBackend::new());

        let manifest = yaml_file(
            "name: web1\ndisks:\n  - format: raw\n    source: { type: file, path: /img/web1.img }\n",
        );
        let out = run(
            &hv,
            &Command::Define {
                manifest: path(&manifest),
                start: true,
            },
            Resolve::default(),
        )
        .unwrap();
        assert_eq!(out["disks"][0]["target"], "vda");
        assert_eq!(out["state"], "RUNNING");

        let disk = yaml_file("format: qcow2\nsource: { type: file, path: /img/data.qcow2 }\n");
        let out = run(
            &hv,
            &Command::AttachDisk {
                domain: "web1".into(),
                disk: path(&disk),
            },
            Resolve::default(),
        )
        .unwrap();
        assert_eq!(out["target"], "vdb");

        run(
            &hv,
            &Command::DetachDisk {
                domain: "web1".into(),
                target: "vdb".into(),
            },
            Resolve::default(),
        )
        .unwrap();

        let missing = run(
            &hv,
            &Command::DetachDisk {
                domain: "web1".into(),
                target: "vdq".into(),
            },
            Resolve::default(),
        );
        assert!(missing.is_err());

        assert_eq!(run(&hv, &Command::List, Resolve::default()).unwrap(), json!(["web1"]));
    }

    #[test]
    fn test_info_without_console() {
        let hv = Hypervisor::new(MockBackend::new());
        hv.define(&ponyvirt::DomainDefinition::new("quiet")).unwrap();

        let out = run(&hv, &Command::Info { domain: "quiet".into() }, Resolve::default()).unwrap();
        assert_eq!(out["name"], "quiet");
        assert_eq!(out["active"], false);
        assert_eq!(out["console"], Value::Null);
        assert_eq!(out["vnc_port"], Value::Null);
        assert_eq!(out["free_slots"], 26);
    }

    #[test]
    fn test_unknown_domain() {
        let hv = Hypervisor::new(MockBackend::new());
        let err = run(&hv, &Command::Start { domain: "ghost".into() }, Resolve::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NoDomain { .. })
        ));
    }

    #[test]
    fn test_numeric_name_needs_by_name() {
        let hv = Hypervisor::new(MockBackend::new());
        hv.define(&ponyvirt::DomainDefinition::new("2024")).unwrap();

        // As an id, "2024" does not resolve: no domain is running.
        let err = run(&hv, &Command::Start { domain: "2024".into() }, Resolve::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NoDomain { .. })
        ));

        let by_name = Resolve { by_name: true };
        let out = run(&hv, &Command::Start { domain: "2024".into() }, by_name).unwrap();
        assert_eq!(out["started"], true);

        let out = run(&hv, &Command::Info { domain: "2024".into() }, by_name).unwrap();
        assert_eq!(out["name"], "2024");
        assert_eq!(out["active"], true);
    }
}
