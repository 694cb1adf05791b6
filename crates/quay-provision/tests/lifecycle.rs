//! Install, update, rollback and history of a whole installation.

mod common;

use std::path::PathBuf;

use common::{World, CHANNEL, REPOSITORY};
use quay_cache::ArtifactCache;
use quay_core::CoreError;
use quay_history::RevisionKind;
use quay_provision::{
    CopyProvisioner, Installation, InstallationConfig, LocalRepository, ProvisionError, Services,
    UpdateOptions,
};
use quay_trust::{CertificateInfo, SignatureCheckResult};

fn accept_all(_: &CertificateInfo) -> bool {
    true
}

#[test]
fn update_then_rollback_from_cache() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0"), ("m2", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);

    let mut installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    let first = installation.revisions()[0].clone();
    assert_eq!(first.kind, RevisionKind::Install);
    assert_eq!(first.parent, None);
    assert_eq!(installation.trust().list_certificates().len(), 1);
    assert!(world.installed("modules/m1-1.0.0.jar"));
    assert!(world.installed("modules/m2-1.0.0.jar"));

    // Only M1 moves; its old version disappears from the repository.
    world.publish_component("m1", "1.0.1", &world.signer);
    world.publish_manifest("1.0.1", &[("m1", "1.0.1"), ("m2", "1.0.0")]);
    let old_m1 = World::component("m1", "1.0.0");
    assert!(world.repo.withdraw(REPOSITORY, &old_m1).expect("withdraw"));

    let second = installation
        .update(services, UpdateOptions::default())
        .expect("update")
        .expect("update has changes");
    assert_eq!(second.kind, RevisionKind::Update);
    assert_eq!(second.parent.as_deref(), Some(first.id.as_str()));
    assert!(world.installed("modules/m1-1.0.1.jar"));
    assert!(!world.installed("modules/m1-1.0.0.jar"));
    assert!(world.installed("modules/m2-1.0.0.jar"));
    assert_eq!(installation.channel_versions()[CHANNEL].physical(), Some("1.0.1"));
    assert_eq!(installation.channel_versions()[CHANNEL].logical(), Some("1.0.1"));

    let diff = installation.compare(&first.id).expect("compare");
    assert_eq!(diff.artifacts.len(), 1, "{}", diff.render());
    assert_eq!(diff.artifacts[0].old_version(), Some("1.0.0"));
    assert_eq!(diff.artifacts[0].new_version(), Some("1.0.1"));
    assert!(diff.channels.is_empty());

    // No repository reachable: the rollback is served from the cache.
    let offline = LocalRepository::new();
    let offline_services = Services::new(&offline, &provisioner, &accept_all);
    let third = installation
        .rollback(&first.id[..12], offline_services)
        .expect("rollback");
    assert_eq!(third.kind, RevisionKind::Rollback);
    assert!(world.installed("modules/m1-1.0.0.jar"));
    assert!(!world.installed("modules/m1-1.0.1.jar"));
    assert_eq!(installation.channel_versions()[CHANNEL].physical(), Some("1.0.0"));
    assert!(installation.compare(&first.id).expect("compare").is_empty());

    // Without the cached copy nothing can supply M1 1.0.0.
    assert!(installation.cache().remove(&old_m1).expect("remove"));
    let err = installation
        .rollback(&first.id, offline_services)
        .expect_err("unresolvable rollback");
    match err {
        ProvisionError::UnresolvedMetadata { missing } => assert_eq!(missing, vec![old_m1]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(installation.revisions().len(), 3);
    assert!(world.installed("modules/m1-1.0.0.jar"));
}

#[test]
fn update_without_changes_records_nothing() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);

    let mut installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    assert!(installation
        .prepare_update(services)
        .expect("prepare")
        .is_empty());
    assert_eq!(
        installation
            .update(services, UpdateOptions::default())
            .expect("update"),
        None
    );
    assert_eq!(installation.revisions().len(), 1);
}

#[test]
fn downgrade_needs_explicit_permission() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    world.release("1.0.1", &[("m1", "1.0.1")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);

    let mut installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    assert_eq!(installation.channel_versions()[CHANNEL].physical(), Some("1.0.1"));

    world
        .repo
        .withdraw(REPOSITORY, &World::manifest("1.0.1"))
        .expect("withdraw");
    let staged = installation.prepare_update(services).expect("prepare");
    assert!(staged.is_downgrade());
    assert_eq!(staged.changes().len(), 1);

    let err = installation
        .update(services, UpdateOptions::default())
        .expect_err("downgrade refused");
    match err {
        ProvisionError::Downgrade { changes } => assert_eq!(changes[0].channel, CHANNEL),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(installation.revisions().len(), 1);
    assert!(world.installed("modules/m1-1.0.1.jar"));

    installation
        .update(
            services,
            UpdateOptions {
                allow_downgrade: true,
            },
        )
        .expect("update")
        .expect("downgrade applied");
    assert_eq!(installation.channel_versions()[CHANNEL].physical(), Some("1.0.0"));
    assert!(world.installed("modules/m1-1.0.0.jar"));
    assert!(!world.installed("modules/m1-1.0.1.jar"));
}

#[test]
fn installation_lock_and_lifecycle_errors() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);

    let empty = tempfile::tempdir().expect("tempdir");
    assert!(matches!(
        Installation::open(empty.path(), world.backend()),
        Err(ProvisionError::NotInstalled { .. })
    ));

    let installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    assert!(matches!(
        Installation::open(&world.install_root, world.backend()),
        Err(ProvisionError::Locked { .. })
    ));
    installation.close();

    assert!(matches!(
        Installation::install(&world.install_root, world.config(), world.backend(), services),
        Err(ProvisionError::AlreadyInstalled { .. })
    ));
    let reopened = Installation::open(&world.install_root, world.backend()).expect("open");
    assert_eq!(reopened.revisions().len(), 1);
    assert_eq!(reopened.channel_versions()[CHANNEL].physical(), Some("1.0.0"));
    assert_eq!(reopened.tracked_files().len(), 1);
}

#[test]
fn config_change_is_a_revision() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);

    let mut installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    let mut config = installation.config().clone();
    config.settings.verify_threads = 2;
    let revision = installation.change_config(config).expect("change config");
    assert_eq!(revision.kind, RevisionKind::ConfigChange);

    let invalid = InstallationConfig {
        settings: quay_provision::Settings {
            verify_threads: 0,
            ..Default::default()
        },
        ..installation.config().clone()
    };
    assert!(matches!(
        installation.change_config(invalid),
        Err(ProvisionError::InvalidConfig { .. })
    ));
    installation.close();

    let reopened = Installation::open(&world.install_root, world.backend()).expect("open");
    assert_eq!(reopened.config().settings.verify_threads, 2);
    assert_eq!(reopened.revisions().len(), 2);
}

#[test]
fn origin_audit_of_installed_tree() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0"), ("m2", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);

    let installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    let report = installation.verify_origin().expect("verify");
    assert!(report.is_clean(), "{report:?}");

    std::fs::write(world.install_root.join("modules/m2-1.0.0.jar"), b"patched\0").expect("tamper");
    std::fs::write(world.install_root.join("modules/extra.so"), b"\0\x7fELF").expect("drop binary");
    std::fs::write(world.install_root.join("README.txt"), b"notes").expect("drop text");

    let report = installation.verify_origin().expect("verify");
    let invalid: Vec<_> = report
        .invalid_binaries
        .iter()
        .map(|b| (b.path.clone(), b.coordinate.clone(), b.result))
        .collect();
    assert_eq!(
        invalid,
        vec![
            (PathBuf::from("modules/extra.so"), None, SignatureCheckResult::NoSignature),
            (
                PathBuf::from("modules/m2-1.0.0.jar"),
                Some(World::component("m2", "1.0.0")),
                SignatureCheckResult::Invalid
            ),
        ]
    );
    assert_eq!(report.modified_files, vec![PathBuf::from("README.txt")]);
}

#[test]
fn manifest_with_unrepresentable_stream_is_rejected_before_writes() {
    let world = World::new();
    world.publish_component("m1", "1.0.0", &world.signer);
    world.publish_manifest("1.0.0", &[("m1", "1.0.0"), ("m2", "1.0:b")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);

    let err = Installation::install(&world.install_root, world.config(), world.backend(), services)
        .expect_err("stream version with ':'");
    assert!(
        matches!(err, ProvisionError::Core(CoreError::InvalidManifest { .. })),
        "{err}"
    );
    assert!(!world.install_root.join("modules").exists());
    let cache = ArtifactCache::open(&world.install_root).expect("cache index still readable");
    assert!(cache.is_empty());
    assert!(matches!(
        Installation::open(&world.install_root, world.backend()),
        Err(ProvisionError::NotInstalled { .. })
    ));
}
