// tests/query.rs

//! Orphans, file ownership and catalog searches

mod common;

use common::{TestEnv, opts, pkg, r, refs};
use quarry::installer::find_incomplete;
use quarry::{Solver, SolverOptions};

#[test]
fn test_orphans_listed_once() {
    let mut env = TestEnv::new();
    env.add_package(
        pkg("app/foo@1.0").with_requires(vec![r("lib/bar")]),
        &[("usr/bin/foo", b"foo")],
    );
    env.add_package(pkg("lib/bar@1.0"), &[("usr/lib/libbar.so", b"bar")]);
    env.add_package(pkg("lib/bar@0.9"), &[("usr/lib/libbar.so", b"old")]);
    env.publish();
    env.installer().install(opts(), &refs(&["app/foo"])).unwrap();

    let installer = env.installer();
    let solver = Solver::new(
        installer.database(),
        installer.repositories(),
        SolverOptions::from_config(&env.config),
    );
    assert!(solver.orphans().unwrap().is_empty());

    // Every version of lib/bar leaves the repository
    env.drop_package(&pkg("lib/bar@1.0"));
    env.drop_package(&pkg("lib/bar@0.9"));
    env.publish();

    let installer = env.installer();
    let solver = Solver::new(
        installer.database(),
        installer.repositories(),
        SolverOptions::from_config(&env.config),
    );
    let orphans: Vec<String> = solver
        .orphans()
        .unwrap()
        .iter()
        .map(|p| p.fingerprint())
        .collect();
    assert_eq!(orphans, vec!["lib/bar@1.0"]);
}

#[test]
fn test_orphan_ignores_version() {
    let mut env = TestEnv::new();
    env.add_package(pkg("app/foo@1.0"), &[("usr/bin/foo", b"1")]);
    env.publish();
    env.installer().install(opts(), &refs(&["app/foo"])).unwrap();

    env.drop_package(&pkg("app/foo@1.0"));
    env.add_package(pkg("app/foo@2.0"), &[("usr/bin/foo", b"2")]);
    env.publish();

    let installer = env.installer();
    let solver = Solver::new(
        installer.database(),
        installer.repositories(),
        SolverOptions::from_config(&env.config),
    );
    assert!(solver.orphans().unwrap().is_empty());
}

#[test]
fn test_file_owner_lookup() {
    let mut env = TestEnv::new();
    env.add_package(pkg("app/foo@1.0"), &[("usr/bin/foo", b"foo")]);
    env.publish();
    let installer = env.installer();
    installer.install(opts(), &refs(&["app/foo"])).unwrap();

    let db = installer.database();
    let owner = db.find_file_owner("/usr/bin/foo").unwrap().unwrap();
    assert_eq!(owner.fingerprint(), "app/foo@1.0");
    assert!(db.find_file_owner("/usr/bin/bar").unwrap().is_none());

    let stones = db.stones().unwrap();
    assert_eq!(stones.len(), 1);
    assert_eq!(stones[0].files, vec!["usr/bin/foo"]);
}

#[test]
fn test_catalog_searches() {
    let mut env = TestEnv::new();
    env.add_package(
        pkg("app/foo@1.0").with_label("kind", "tool"),
        &[("usr/bin/foo", b"foo")],
    );
    env.add_package(pkg("app/foo@2.0"), &[("usr/bin/foo", b"foo2")]);
    env.add_package(pkg("lib/bar@1.0"), &[("usr/lib/libbar.so", b"bar")]);
    env.publish();

    let installer = env.installer();
    let repos = installer.repositories();

    let found = repos.search(&r("app/foo")).unwrap();
    let versions: Vec<String> = found.iter().map(|a| a.runtime.fingerprint()).collect();
    assert_eq!(versions, vec!["app/foo@2.0", "app/foo@1.0"]);
    assert!(found.iter().all(|a| a.repository() == Some("main")));

    assert_eq!(repos.search_category("lib").unwrap().len(), 1);
    assert_eq!(repos.search_label("kind", Some("tool")).unwrap().len(), 1);
    assert_eq!(repos.search_file("/usr/lib/libbar.so").unwrap().len(), 1);
}

#[test]
fn test_successful_transactions_leave_no_journal() {
    let mut env = TestEnv::new();
    env.add_package(pkg("app/foo@1.0"), &[("usr/bin/foo", b"foo")]);
    env.publish();
    let installer = env.installer();
    installer.install(opts(), &refs(&["app/foo"])).unwrap();

    assert!(find_incomplete(&installer.journal_dir()).unwrap().is_empty());
}
