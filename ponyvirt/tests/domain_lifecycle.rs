//! Integration tests for domain lifecycle and disk hot-plug.
//!
//! These tests drive the public API against the in-memory mock backend.

use ponyvirt::{
    Backend, BackendError, DiskDevice, DiskFormat, DiskSource, DiskSpec, DomainDefinition, DomainRef,
    DomainState, Error, ErrorCode, Hypervisor, MockBackend, NetworkHost, NicSpec,
};

fn hypervisor() -> Hypervisor<MockBackend> {
    Hypervisor::new(MockBackend::new())
}

fn testicek() -> DomainDefinition {
    DomainDefinition::new("Testicek")
        .with_uuid("d56f7b2c-e531-405f-8fb1-e37764970231".parse().unwrap())
        .with_disk(DiskSpec::file(
            "/var/lib/libvirt/images/Test.img",
            DiskFormat::Raw,
        ))
        .with_nic(NicSpec::bridge("fa:16:3e:73:3b:f8", "virbr0"))
}

fn sheepdog(name: &str) -> DiskSpec {
    DiskSpec::network(
        "sheepdog",
        name,
        vec![NetworkHost::new("127.0.0.1", "7000")],
        DiskFormat::Raw,
    )
}

fn failure(code: ErrorCode) -> BackendError {
    BackendError::new(code, "injected")
}

/// Define, start, hot-plug and unplug a second disk.
#[test]
fn test_define_start_attach_detach() {
    let hv = hypervisor();
    let mut domain = hv.define(&testicek()).unwrap();

    assert_eq!(domain.name().unwrap(), "Testicek");
    assert_eq!(domain.state().unwrap(), DomainState::ShutOff);

    domain.start().unwrap();
    assert_eq!(domain.state().unwrap(), DomainState::Running);
    assert!(domain.is_active().unwrap());

    let disks = domain.get_disks().unwrap();
    assert_eq!(disks.len(), 1);
    assert_eq!(disks[0].target, "vda");

    let data = DiskSpec::file("/var/lib/libvirt/images/Data.img", DiskFormat::Raw);
    let attached = domain.attach_disk(&data).unwrap();
    assert_eq!(attached.target, "vdb");
    assert_eq!(attached.device, DiskDevice::Disk);

    let disks = domain.get_disks().unwrap();
    assert_eq!(disks.len(), 2);
    assert_eq!(disks[1], attached);

    domain.detach_disk(&attached).unwrap();
    assert_eq!(domain.get_disks().unwrap().len(), 1);

    // The freed slot is the lowest again.
    let again = domain.attach_disk(&data).unwrap();
    assert_eq!(again.target, "vdb");
}

/// A detach built from a disk read back from the live document works too.
#[test]
fn test_detach_disk_read_from_backend() {
    let hv = hypervisor();
    let mut domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();
    domain.attach_disk(&sheepdog("Alice")).unwrap();

    let disk = domain
        .get_disks()
        .unwrap()
        .into_iter()
        .find(|d| d.target == "vdb")
        .unwrap();
    assert!(matches!(disk.source, Some(DiskSource::Network { .. })));

    domain.detach_disk(&disk).unwrap();
    assert!(domain.slots().is_free("vdb"));
}

#[test]
fn test_lifecycle_transitions() {
    let hv = hypervisor();
    let domain = hv.define(&testicek()).unwrap();

    assert!(matches!(
        domain.shutdown(),
        Err(Error::InvalidOperation { operation: "shutdown", .. })
    ));

    domain.start().unwrap();
    assert!(matches!(
        domain.start(),
        Err(Error::InvalidOperation { operation: "start", .. })
    ));
    assert!(matches!(domain.resume(), Err(Error::InvalidOperation { .. })));

    domain.suspend().unwrap();
    assert_eq!(domain.state().unwrap(), DomainState::Paused);
    assert!(domain.is_active().unwrap());
    domain.resume().unwrap();

    domain.destroy().unwrap();
    assert_eq!(domain.state().unwrap(), DomainState::ShutOff);
    assert!(matches!(domain.destroy(), Err(Error::InvalidOperation { .. })));
}

#[test]
fn test_info_reports_definition() {
    let hv = hypervisor();
    let domain = hv
        .define(&DomainDefinition::new("sized").with_memory(512).with_vcpus(2))
        .unwrap();

    let info = domain.info().unwrap();
    assert_eq!(info.state, DomainState::ShutOff);
    assert_eq!(info.max_memory_kib, 512 * 1024);
    assert_eq!(info.vcpus, 2);
}

#[test]
fn test_delete_stopped_domain() {
    let hv = hypervisor();
    hv.define(&testicek()).unwrap().delete().unwrap();

    assert!(!hv.contains("Testicek").unwrap());
    assert_eq!(hv.len().unwrap(), 0);
}

#[test]
fn test_delete_running_domain() {
    let hv = hypervisor();
    let domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();

    hv.remove("Testicek").unwrap();
    assert!(!hv.contains("Testicek").unwrap());
}

#[test]
fn test_delete_vanished_domain_fails() {
    let hv = hypervisor();
    let domain = hv.define(&testicek()).unwrap();
    assert!(hv.backend().vanish("Testicek"));

    assert!(matches!(domain.delete(), Err(Error::NoDomain { .. })));
}

#[test]
fn test_vanished_domain() {
    let hv = hypervisor();
    let domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();
    hv.backend().vanish("Testicek");

    assert_eq!(domain.state().unwrap(), DomainState::NoState);
    assert!(!domain.is_active().unwrap());
    assert!(matches!(
        domain.start(),
        Err(Error::NoDomain { operation: "start", .. })
    ));
    assert!(matches!(domain.get_disks(), Err(Error::NoDomain { .. })));
}

#[test]
fn test_lookup_by_id_and_name() {
    let hv = hypervisor();
    hv.define(&testicek()).unwrap().start().unwrap();

    let by_id = hv.lookup(1u32).unwrap();
    assert_eq!(by_id.name().unwrap(), "Testicek");

    let by_ref = hv.lookup(DomainRef::parse("Testicek")).unwrap();
    assert_eq!(by_ref.handle(), by_id.handle());
}

#[test]
fn test_stale_id_does_not_resolve() {
    let hv = hypervisor();
    let domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();
    domain.destroy().unwrap();

    assert!(matches!(hv.lookup(1u32), Err(Error::NoDomain { .. })));
    assert!(!hv.contains(1u32).unwrap());
    assert!(hv.contains("Testicek").unwrap());
}

#[test]
fn test_contains_propagates_other_errors() {
    let hv = hypervisor();
    hv.backend().fail_next(
        "lookup_by_name",
        failure(ErrorCode::Other("AuthFailed".into())),
    );

    assert!(matches!(hv.contains("anything"), Err(Error::Backend { .. })));
}

#[test]
fn test_list_and_len() {
    let hv = hypervisor();
    hv.define(&DomainDefinition::new("alpha")).unwrap().start().unwrap();
    hv.define(&DomainDefinition::new("beta")).unwrap();
    hv.define(&DomainDefinition::new("gamma")).unwrap().start().unwrap();

    let mut names = hv.list().unwrap();
    names.sort();
    assert_eq!(names, vec!["alpha", "gamma"]);
    assert_eq!(hv.len().unwrap(), 3);
    assert!(!hv.is_empty().unwrap());
}

#[test]
fn test_list_skips_domains_stopping_mid_listing() {
    let hv = hypervisor();
    hv.define(&DomainDefinition::new("alpha")).unwrap().start().unwrap();
    hv.define(&DomainDefinition::new("beta")).unwrap().start().unwrap();

    hv.backend()
        .fail_next("lookup_by_id", failure(ErrorCode::NoDomain));

    assert_eq!(hv.list().unwrap(), vec!["beta"]);
}

#[test]
fn test_list_propagates_other_errors() {
    let hv = hypervisor();
    hv.define(&DomainDefinition::new("alpha")).unwrap().start().unwrap();
    hv.backend().fail_next(
        "lookup_by_id",
        failure(ErrorCode::Other("InternalError".into())),
    );

    assert!(matches!(hv.list(), Err(Error::Backend { .. })));
}

#[test]
fn test_failed_attach_returns_slot() {
    let hv = hypervisor();
    let mut domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();

    hv.backend().fail_next(
        "attach_device_live",
        failure(ErrorCode::Other("OperationFailed".into())),
    );
    assert!(matches!(
        domain.attach_disk(&sheepdog("Alice")),
        Err(Error::Backend { .. })
    ));
    assert!(domain.slots().is_free("vdb"));

    assert_eq!(domain.attach_disk(&sheepdog("Alice")).unwrap().target, "vdb");
}

#[test]
fn test_attach_to_stopped_domain() {
    let hv = hypervisor();
    let mut domain = hv.define(&testicek()).unwrap();

    assert!(matches!(
        domain.attach_disk(&sheepdog("Alice")),
        Err(Error::InvalidOperation { .. })
    ));
    assert_eq!(domain.slots().len(), 25);
}

#[test]
fn test_failed_detach_keeps_slot() {
    let hv = hypervisor();
    let mut domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();
    let disk = domain.attach_disk(&sheepdog("Alice")).unwrap();

    hv.backend().fail_next(
        "detach_device_live",
        failure(ErrorCode::Other("OperationFailed".into())),
    );
    assert!(domain.detach_disk(&disk).is_err());
    assert!(!domain.slots().is_free("vdb"));

    domain.detach_disk(&disk).unwrap();
    assert!(domain.slots().is_free("vdb"));
}

#[test]
fn test_slot_exhaustion() {
    let hv = hypervisor();
    let mut domain = hv.define(&DomainDefinition::new("many")).unwrap();
    domain.start().unwrap();

    let mut attached = Vec::new();
    for i in 0..26 {
        let disk = domain
            .attach_disk(&DiskSpec::file(format!("/img/{}.img", i), DiskFormat::Raw))
            .unwrap();
        attached.push(disk);
    }
    assert_eq!(attached.first().unwrap().target, "vda");
    assert_eq!(attached.last().unwrap().target, "vdz");
    assert!(domain.slots().is_empty());

    let extra = DiskSpec::file("/img/extra.img", DiskFormat::Raw);
    assert!(matches!(
        domain.attach_disk(&extra),
        Err(Error::SlotsExhausted { .. })
    ));

    domain.detach_disk(&attached[12]).unwrap();
    assert_eq!(domain.attach_disk(&extra).unwrap().target, "vdm");
    assert!(matches!(
        domain.attach_disk(&extra),
        Err(Error::SlotsExhausted { .. })
    ));
}

#[test]
fn test_controller_snapshots_existing_disks() {
    let hv = hypervisor();
    let definition = testicek().with_disk(DiskSpec::file("/img/data.img", DiskFormat::Qcow2));
    hv.define(&definition).unwrap().start().unwrap();

    let mut domain = hv.lookup("Testicek").unwrap();
    assert!(!domain.slots().is_free("vda"));
    assert!(!domain.slots().is_free("vdb"));
    assert_eq!(domain.attach_disk(&sheepdog("Alice")).unwrap().target, "vdc");
}

#[test]
fn test_console_and_vnc() {
    let hv = hypervisor();
    let domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();

    // Nothing assigned until the hypervisor allocates a pty and a port.
    assert!(matches!(
        domain.get_console_device(),
        Err(Error::DeviceNotFound { .. })
    ));
    assert!(matches!(
        domain.get_vnc_port(),
        Err(Error::DeviceNotFound { .. })
    ));

    hv.backend().set_live_document(
        "Testicek",
        r#"<domain type='kvm' id='1'>
  <name>Testicek</name>
  <devices>
    <console type='pty' tty='/dev/pts/7'>
      <target type='serial' port='0'/>
    </console>
    <graphics type='vnc' port='5900' autoport='yes'/>
  </devices>
</domain>"#,
    );

    assert_eq!(domain.get_console_device().unwrap(), "/dev/pts/7");
    assert_eq!(domain.get_vnc_port().unwrap(), 5900);
}

#[test]
fn test_malformed_live_document() {
    let hv = hypervisor();
    let domain = hv.define(&testicek()).unwrap();
    domain.start().unwrap();

    hv.backend().set_live_document(
        "Testicek",
        "<domain><devices><graphics type='vnc' port='auto'/></devices></domain>",
    );
    assert!(matches!(
        domain.get_vnc_port(),
        Err(Error::MalformedConfig { ref domain, operation: "get_vnc_port", .. }) if domain == "Testicek"
    ));

    hv.backend()
        .set_live_document("Testicek", "<domain><name>Testicek</name></domain>");
    let err = domain.get_disks().unwrap_err();
    assert!(matches!(
        err,
        Error::MalformedConfig { ref domain, operation: "get_disks", .. } if domain == "Testicek"
    ));
    assert!(err.to_string().contains("Testicek"));

    // A fresh lookup reads the same document and names the domain too.
    let err = hv.lookup("Testicek").err().unwrap();
    assert!(matches!(
        err,
        Error::MalformedConfig { ref domain, operation: "lookup", .. } if domain == "Testicek"
    ));
}

/// Storage-pool volumes and floppy drives are ordinary libvirt disks.
#[test]
fn test_domain_with_pool_volume_and_floppy() {
    let hv = hypervisor();
    hv.backend()
        .define_persistent(
            r#"<domain type='kvm'>
  <name>pooled</name>
  <uuid>5b0c1e9a-3c3f-4b0e-9d8e-0a8f6b1f2c11</uuid>
  <memory unit='MiB'>256</memory>
  <vcpu>1</vcpu>
  <devices>
    <disk type='volume' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source pool='default' volume='pooled.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='floppy'>
      <driver name='qemu' type='raw'/>
      <source file='/var/lib/libvirt/images/boot.flp'/>
      <target dev='fda' bus='fdc'/>
    </disk>
  </devices>
</domain>"#,
        )
        .unwrap();

    assert!(hv.contains("pooled").unwrap());
    assert_eq!(hv.list().unwrap(), Vec::<String>::new());

    let mut domain = hv.lookup("pooled").unwrap();
    assert!(!domain.slots().is_free("vda"));
    assert!(domain.slots().is_free("vdb"));

    let disks = domain.get_disks().unwrap();
    assert_eq!(disks.len(), 2);
    assert_eq!(disks[0].source.as_ref().map(DiskSource::kind), Some("volume"));
    assert_eq!(disks[1].device, DiskDevice::Other("floppy".into()));

    domain.start().unwrap();
    let data = domain.attach_disk(&sheepdog("Data")).unwrap();
    assert_eq!(data.target, "vdb");

    let volume = domain.get_disks().unwrap().remove(0);
    domain.detach_disk(&volume).unwrap();
    assert_eq!(domain.get_disks().unwrap().len(), 2);
    assert!(domain.slots().is_free("vda"));

    hv.remove("pooled").unwrap();
    assert!(!hv.contains("pooled").unwrap());
}

#[test]
fn test_redefine_with_other_uuid_fails() {
    let hv = hypervisor();
    hv.define(&testicek()).unwrap();

    let clash = DomainDefinition::new("Testicek");
    assert!(matches!(hv.define(&clash), Err(Error::Backend { .. })));
}

#[test]
fn test_close() {
    let hv = hypervisor();
    hv.define(&testicek()).unwrap();
    hv.close().unwrap();
}
