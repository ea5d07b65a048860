// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! [`TestEnv`] lays out a private state tree (rootfs, database, caches) and
//! publishes a disk repository under the same temporary directory.

#![allow(dead_code)]

use quarry::compression::{CompressionType, pack_archive};
use quarry::hash::checksums_for_file;
use quarry::installer::AlwaysYes;
use quarry::repository::{REPOSITORY_SPEC_FILE, RepositoryFile, RepositoryType, TREE_KEY};
use quarry::{
    Config, Finalizer, InstallOpts, Installer, Package, PackageArtifact, PackageRef,
    Repositories, Repository, db,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const REPO_NAME: &str = "main";

/// Private environment with one disk repository
pub struct TestEnv {
    _base: TempDir,
    pub config: Config,
    pub repo_dir: PathBuf,
    tree_src: PathBuf,
    revision: u64,
}

impl TestEnv {
    pub fn new() -> Self {
        let base = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(base.path());
        fs::create_dir_all(&config.system.rootfs).unwrap();

        let repo_dir = base.path().join("published");
        let tree_src = base.path().join("tree-src");
        fs::create_dir_all(repo_dir.join("packages")).unwrap();
        fs::create_dir_all(&tree_src).unwrap();

        let descriptor = Repository::new(
            REPO_NAME,
            RepositoryType::Disk,
            vec![repo_dir.to_string_lossy().to_string()],
        );
        descriptor
            .write(&config.repos_confdir[0].join(format!("{}.yaml", REPO_NAME)))
            .unwrap();

        Self {
            _base: base,
            config,
            repo_dir,
            tree_src,
            revision: 0,
        }
    }

    pub fn rootfs(&self) -> &Path {
        &self.config.system.rootfs
    }

    /// Build an artifact from `files` and add it to the repository tree
    pub fn add_package(&self, pkg: Package, files: &[(&str, &[u8])]) -> PackageArtifact {
        self.add_package_with(pkg, files, None)
    }

    pub fn add_package_with(
        &self,
        pkg: Package,
        files: &[(&str, &[u8])],
        finalizer: Option<Finalizer>,
    ) -> PackageArtifact {
        let content = tempfile::tempdir().unwrap();
        for (path, data) in files {
            let target = content.path().join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, data).unwrap();
        }

        let file_name = format!("{}-{}-{}.tar.zst", pkg.category, pkg.name, pkg.version);
        let archive = self.repo_dir.join("packages").join(&file_name);
        pack_archive(content.path(), &archive, CompressionType::Zstd).unwrap();

        let mut artifact = PackageArtifact::new(pkg.clone())
            .with_files(files.iter().map(|(p, _)| p.to_string()).collect());
        artifact.path = format!("packages/{}", file_name);
        artifact.compression_type = CompressionType::Zstd;
        artifact.checksums = checksums_for_file(&archive).unwrap();

        let dir = self
            .tree_src
            .join(&pkg.category)
            .join(&pkg.name)
            .join(pkg.version.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("metadata.yaml"),
            serde_yaml::to_string(&artifact).unwrap(),
        )
        .unwrap();
        if let Some(finalizer) = finalizer {
            fs::write(
                dir.join("finalize.yaml"),
                serde_yaml::to_string(&finalizer).unwrap(),
            )
            .unwrap();
            artifact.finalizer = Some(finalizer);
        }
        artifact
    }

    /// Take a package out of the repository tree (effective on the next publish)
    pub fn drop_package(&self, pkg: &Package) {
        let dir = self
            .tree_src
            .join(&pkg.category)
            .join(&pkg.name)
            .join(pkg.version.to_string());
        fs::remove_dir_all(dir).unwrap();
    }

    /// Pack the tree and write a new `repository.yaml` revision
    pub fn publish(&mut self) {
        self.revision += 1;
        let tree = self.repo_dir.join("tree.tar.gz");
        pack_archive(&self.tree_src, &tree, CompressionType::Gzip).unwrap();

        let mut identity = Repository::new(REPO_NAME, RepositoryType::Disk, vec![]);
        identity.revision = self.revision;
        identity.last_update = format!("2024-05-01T10:00:{:02}+00:00", self.revision % 60);
        identity.repo_files.insert(
            TREE_KEY.to_string(),
            RepositoryFile {
                filename: "tree.tar.gz".to_string(),
                compression_type: CompressionType::Gzip,
                checksums: checksums_for_file(&tree).unwrap(),
            },
        );
        identity.write(&self.repo_dir.join(REPOSITORY_SPEC_FILE)).unwrap();

        // Drop the synced copy so the next catalog load resyncs
        let _ = fs::remove_dir_all(self.config.system.repos_database_path.join(REPO_NAME));
    }

    pub fn installer(&self) -> Installer {
        let db = db::open_database(&self.config).unwrap();
        let repos = Repositories::load(&self.config).unwrap();
        Installer::new(&self.config, db, repos)
            .unwrap()
            .with_confirm(Box::new(AlwaysYes))
    }

    pub fn write_rootfs(&self, path: &str, data: &[u8]) {
        let target = self.rootfs().join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, data).unwrap();
    }

    pub fn read_rootfs(&self, path: &str) -> Vec<u8> {
        fs::read(self.rootfs().join(path)).unwrap()
    }
}

pub fn pkg(s: &str) -> Package {
    Package::parse(s).unwrap()
}

pub fn r(s: &str) -> PackageRef {
    PackageRef::parse(s).unwrap()
}

pub fn refs(list: &[&str]) -> Vec<PackageRef> {
    list.iter().map(|s| r(s)).collect()
}

pub fn opts() -> InstallOpts {
    InstallOpts::default()
}

/// Installed fingerprints, sorted
pub fn world(installer: &Installer) -> Vec<String> {
    let mut names: Vec<String> = installer
        .database()
        .world()
        .unwrap()
        .iter()
        .map(|p| p.fingerprint())
        .collect();
    names.sort();
    names
}
