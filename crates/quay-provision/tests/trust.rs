//! Signature enforcement during install and update.

mod common;

use std::cell::Cell;
use std::path::Path;

use common::{tree, World};
use quay_core::{Repository, METADATA_DIR};
use quay_history::RevisionKind;
use quay_provision::{
    CopyProvisioner, Installation, ProvisionError, ProvisionedArtifact, Provisioner, Services,
    TrackedFile, UpdateOptions,
};
use quay_trust::{
    CertificateInfo, Ed25519Backend, KeyPair, SignatureCheckResult, TrustError, TrustStore,
    KEYRING_FILE,
};

fn accept_all(_: &CertificateInfo) -> bool {
    true
}

fn signature_failure(err: ProvisionError) -> SignatureCheckResult {
    match err {
        ProvisionError::Trust(TrustError::SignatureFailure { result, .. }) => result,
        other => panic!("expected a signature failure, got: {other}"),
    }
}

#[test]
fn rejected_signature_leaves_installation_untouched() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0"), ("m2", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);
    let mut installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");

    // M1 1.0.1 is signed by a key nobody publishes a certificate for.
    let intruder = KeyPair::from_seed(&[9; 32], "Intruder <intruder@example.net>");
    world.publish_component("m1", "1.0.1", &intruder);
    world.publish_manifest("1.0.1", &[("m1", "1.0.1"), ("m2", "1.0.0")]);

    let before = tree(&world.install_root);
    let err = installation
        .update(services, UpdateOptions::default())
        .expect_err("untrusted signer");
    assert_eq!(signature_failure(err), SignatureCheckResult::NoMatchingCert);
    assert_eq!(tree(&world.install_root), before);
    assert_eq!(installation.revisions().len(), 1);
    assert_eq!(installation.trust().list_certificates().len(), 1);
}

#[test]
fn declined_certificate_aborts_install() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let decline = |_: &CertificateInfo| false;
    let services = Services::new(&world.repo, &provisioner, &decline);

    let err = Installation::install(&world.install_root, world.config(), world.backend(), services)
        .expect_err("declined signer");
    assert_eq!(signature_failure(err), SignatureCheckResult::NoMatchingCert);
    assert!(!world.install_root.join("modules").exists());
    assert!(matches!(
        Installation::open(&world.install_root, world.backend()),
        Err(ProvisionError::NotInstalled { .. })
    ));
}

#[test]
fn new_signer_is_confirmed_once() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0"), ("m2", "1.0.0"), ("m3", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let asked = Cell::new(0);
    let accept = |candidate: &CertificateInfo| {
        asked.set(asked.get() + 1);
        candidate.key_id == world.signer.key_id()
    };
    let services = Services::new(&world.repo, &provisioner, &accept);

    let installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    assert_eq!(asked.get(), 1);
    assert!(installation
        .trust()
        .get_certificate(&world.signer.key_id())
        .is_some());
    installation.close();

    // Already trusted: no question on the next operation.
    let mut installation =
        Installation::open(&world.install_root, world.backend()).expect("open");
    world.release("1.0.1", &[("m1", "1.0.1"), ("m2", "1.0.0"), ("m3", "1.0.0")]);
    let revision = installation
        .update(services, UpdateOptions::default())
        .expect("update")
        .expect("changes");
    assert_eq!(revision.kind, RevisionKind::Update);
    assert_eq!(asked.get(), 1);
}

#[test]
fn revoked_signer_blocks_update() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);
    let mut installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");

    installation
        .trust_mut()
        .revoke_certificate(&world.signer.revoke(Some("key compromised")))
        .expect("revoke");
    world.release("1.0.1", &[("m1", "1.0.1")]);

    let err = installation
        .update(services, UpdateOptions::default())
        .expect_err("revoked signer");
    assert_eq!(signature_failure(err), SignatureCheckResult::Revoked);
    assert!(world.installed("modules/m1-1.0.0.jar"));
    assert!(!world.installed("modules/m1-1.0.1.jar"));
}

#[test]
fn local_repository_needs_no_signatures() {
    let world = World::new();
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);
    let coordinate = World::component("m1", "1.0.0");
    world
        .repo
        .publish(common::REPOSITORY, &coordinate, b"unsigned\0", None)
        .expect("publish");
    world.publish_manifest("1.0.0", &[("m1", "1.0.0")]);

    let mut config = world.config();
    for repository in &mut config.channels[0].repositories {
        repository.url = "file:/srv/mirror".into();
    }
    let installation = Installation::install(&world.install_root, config, world.backend(), services)
        .expect("install from local mirror");
    assert!(world.installed("modules/m1-1.0.0.jar"));
    assert!(installation.trust().list_certificates().is_empty());

    let report = installation.verify_origin().expect("audit");
    assert!(report.is_clean(), "{report:?}");
}

#[test]
fn mirrored_artifact_is_trusted_from_cache() {
    let world = World::new();
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);
    let mirrored = World::component("m1", "1.0.0");
    world
        .repo
        .publish(common::MIRROR, &mirrored, b"mirrored\0", None)
        .expect("publish to mirror");
    world.publish_component("m2", "1.0.0", &world.signer);
    world.publish_manifest("1.0.0", &[("m1", "1.0.0"), ("m2", "1.0.0")]);

    // Signatures stay required: the channel also has a remote repository.
    let mut config = world.config();
    config.channels[0]
        .repositories
        .insert(0, Repository::new(common::MIRROR, "file:/srv/mirror"));
    let mut installation =
        Installation::install(&world.install_root, config, world.backend(), services)
            .expect("install with mirror");

    world.publish_component("m2", "1.0.1", &world.signer);
    world.publish_manifest("1.0.1", &[("m1", "1.0.0"), ("m2", "1.0.1")]);
    assert!(world
        .repo
        .withdraw(common::MIRROR, &mirrored)
        .expect("withdraw"));

    installation
        .update(services, UpdateOptions::default())
        .expect("unsigned mirror artifact served from cache")
        .expect("changes");
    assert!(world.installed("modules/m1-1.0.0.jar"));
    assert!(world.installed("modules/m2-1.0.1.jar"));

    let report = installation.verify_origin().expect("audit");
    assert!(report.is_clean(), "{report:?}");
}

#[test]
fn rollback_after_certificate_removal_asks_again() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    let provisioner = CopyProvisioner::default();
    let services = Services::new(&world.repo, &provisioner, &accept_all);
    let mut installation =
        Installation::install(&world.install_root, world.config(), world.backend(), services)
            .expect("install");
    world.release("1.0.1", &[("m1", "1.0.1")]);
    installation
        .update(services, UpdateOptions::default())
        .expect("update")
        .expect("changes");
    let first = installation.revisions()[0].id.clone();

    installation
        .trust_mut()
        .remove_certificate(&world.signer.key_id())
        .expect("remove certificate");

    let decline = |_: &CertificateInfo| false;
    let declining = Services::new(&world.repo, &provisioner, &decline);
    let before = tree(&world.install_root);
    let err = installation
        .rollback(&first, declining)
        .expect_err("declined signer");
    assert_eq!(signature_failure(err), SignatureCheckResult::NoMatchingCert);
    assert_eq!(tree(&world.install_root), before);
    assert_eq!(installation.revisions().len(), 2);
    assert!(installation
        .trust()
        .get_certificate(&world.signer.key_id())
        .is_none());

    let asked = Cell::new(0);
    let accept = |_: &CertificateInfo| {
        asked.set(asked.get() + 1);
        true
    };
    let accepting = Services::new(&world.repo, &provisioner, &accept);
    let revision = installation.rollback(&first, accepting).expect("rollback");
    assert_eq!(revision.kind, RevisionKind::Rollback);
    assert_eq!(asked.get(), 1);
    assert!(installation
        .trust()
        .get_certificate(&world.signer.key_id())
        .is_some());
    assert!(world.installed("modules/m1-1.0.0.jar"));
    assert!(!world.installed("modules/m1-1.0.1.jar"));
}

struct FailingProvisioner;

impl Provisioner for FailingProvisioner {
    fn provision(
        &self,
        _root: &Path,
        _artifacts: &[ProvisionedArtifact],
    ) -> quay_provision::Result<Vec<TrackedFile>> {
        Err(ProvisionError::Provision {
            detail: "disk full".into(),
        })
    }
}

#[test]
fn failed_write_phase_trusts_nobody() {
    let world = World::new();
    world.release("1.0.0", &[("m1", "1.0.0")]);
    let services = Services::new(&world.repo, &FailingProvisioner, &accept_all);

    let err = Installation::install(&world.install_root, world.config(), world.backend(), services)
        .expect_err("provisioning fails");
    assert!(matches!(err, ProvisionError::Provision { .. }), "{err}");
    assert!(matches!(
        Installation::open(&world.install_root, world.backend()),
        Err(ProvisionError::NotInstalled { .. })
    ));

    let keyring = world.install_root.join(METADATA_DIR).join(KEYRING_FILE);
    let trust = TrustStore::open(&keyring, std::sync::Arc::new(Ed25519Backend)).expect("keyring");
    assert!(trust.list_certificates().is_empty());
}
