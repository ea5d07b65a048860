// tests/uninstall.rs

//! Removal closure, directory pruning and config protection on uninstall

mod common;

use common::{TestEnv, opts, pkg, r, refs, world};
use quarry::{Error, Finalizer, UninstallOpts};

fn installed_chain() -> TestEnv {
    let mut env = TestEnv::new();
    env.add_package(
        pkg("app/foo@1.0").with_requires(vec![r("lib/bar>=1.0")]),
        &[("usr/bin/foo", b"foo"), ("usr/share/foo/data", b"d")],
    );
    env.add_package(pkg("lib/bar@1.0"), &[("usr/lib/libbar.so", b"bar")]);
    env.add_package(pkg("app/other@1.0"), &[("usr/bin/other", b"other")]);
    env.publish();
    env.installer()
        .install(opts(), &refs(&["app/foo", "app/other"]))
        .unwrap();
    env
}

#[test]
fn test_uninstall_takes_dependents() {
    let env = installed_chain();
    let installer = env.installer();

    let summary = installer
        .uninstall(UninstallOpts::default(), &refs(&["lib/bar"]))
        .unwrap();

    // Dependents go first
    let removed: Vec<String> = summary.removed.iter().map(|p| p.fingerprint()).collect();
    assert_eq!(removed, vec!["app/foo@1.0", "lib/bar@1.0"]);
    assert_eq!(world(&installer), vec!["app/other@1.0"]);
    assert!(!env.rootfs().join("usr/bin/foo").exists());
    assert!(!env.rootfs().join("usr/lib/libbar.so").exists());
    assert_eq!(env.read_rootfs("usr/bin/other"), b"other");
}

#[test]
fn test_uninstall_nodeps_removes_only_matched() {
    let env = installed_chain();
    let installer = env.installer();

    let uninstall = UninstallOpts {
        no_deps: true,
        ..Default::default()
    };
    let summary = installer.uninstall(uninstall, &refs(&["lib/bar"])).unwrap();

    let removed: Vec<String> = summary.removed.iter().map(|p| p.fingerprint()).collect();
    assert_eq!(removed, vec!["lib/bar@1.0"]);
    // The dependent stays, with its requirement now unmet
    assert_eq!(world(&installer), vec!["app/foo@1.0", "app/other@1.0"]);
    assert!(!env.rootfs().join("usr/lib/libbar.so").exists());
    assert_eq!(env.read_rootfs("usr/bin/foo"), b"foo");
}

#[test]
fn test_uninstall_full_takes_unneeded_dependencies() {
    let env = installed_chain();
    let installer = env.installer();

    let uninstall = UninstallOpts {
        full: true,
        ..Default::default()
    };
    installer.uninstall(uninstall, &refs(&["app/foo"])).unwrap();
    assert_eq!(world(&installer), vec!["app/other@1.0"]);
}

#[test]
fn test_uninstall_missing_package() {
    let env = installed_chain();
    let installer = env.installer();

    assert!(matches!(
        installer.uninstall(UninstallOpts::default(), &refs(&["app/ghost"])),
        Err(Error::NotFoundError(_))
    ));

    let forced = UninstallOpts {
        force: true,
        ..Default::default()
    };
    installer
        .uninstall(forced, &refs(&["app/ghost", "app/other"]))
        .unwrap();
    assert_eq!(world(&installer), vec!["app/foo@1.0", "lib/bar@1.0"]);
}

#[test]
fn test_prune_keeps_foreign_files_and_rootfs() {
    let env = installed_chain();
    env.write_rootfs("usr/share/foo/notes.txt", b"mine");
    let installer = env.installer();

    installer
        .uninstall(UninstallOpts::default(), &refs(&["app/foo"]))
        .unwrap();

    assert!(!env.rootfs().join("usr/share/foo/data").exists());
    assert_eq!(env.read_rootfs("usr/share/foo/notes.txt"), b"mine");
    // Still holds app/other's binary
    assert!(env.rootfs().join("usr/bin").is_dir());
    assert!(env.rootfs().is_dir());
}

#[test]
fn test_prune_removes_emptied_directories() {
    let env = installed_chain();
    let installer = env.installer();

    installer
        .uninstall(UninstallOpts::default(), &refs(&["lib/bar"]))
        .unwrap();
    assert!(!env.rootfs().join("usr/lib").exists());
    assert!(!env.rootfs().join("usr/share/foo").exists());
    assert!(env.rootfs().join("usr/bin/other").exists());
}

#[test]
fn test_protected_file_survives_uninstall() {
    let mut env = TestEnv::new();
    env.add_package(
        pkg("app/tool@1.0").with_annotation("config_protect", "/etc/tool"),
        &[("etc/tool/tool.conf", b"shipped"), ("usr/bin/tool", b"t")],
    );
    env.publish();
    let installer = env.installer();
    installer.install(opts(), &refs(&["app/tool"])).unwrap();

    installer
        .uninstall(UninstallOpts::default(), &refs(&["app/tool"]))
        .unwrap();
    assert_eq!(env.read_rootfs("etc/tool/tool.conf"), b"shipped");
    assert!(!env.rootfs().join("usr/bin/tool").exists());
    assert!(world(&installer).is_empty());
}

#[cfg(unix)]
#[test]
fn test_uninstall_finalizer_runs_after_file_removal() {
    let mut env = TestEnv::new();
    env.config.general.finalizers_outside_root = true;
    env.add_package_with(
        pkg("app/foo@1.0"),
        &[("usr/bin/foo", b"foo")],
        Some(Finalizer {
            uninstall: vec!["test ! -e usr/bin/foo && echo gone > uninstalled-marker".to_string()],
            ..Default::default()
        }),
    );
    env.publish();
    let installer = env.installer();
    installer.install(opts(), &refs(&["app/foo"])).unwrap();

    installer
        .uninstall(UninstallOpts::default(), &refs(&["app/foo"]))
        .unwrap();
    assert_eq!(env.read_rootfs("uninstalled-marker"), b"gone\n");
}
