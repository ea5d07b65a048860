// src/repository/catalog.rs

//! Artifact catalogs and search across repositories

use super::artifact::PackageArtifact;
use super::client::{Client, new_client};
use super::sync::sync;
use super::{REPOSITORY_SPEC_FILE, Repository, load_repositories};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::package::{Finalizer, Package, PackageRef};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

const METADATA_FILES: [&str; 2] = ["metadata.yaml", "metadata.json"];
const DEFINITION_FILE: &str = "definition.yaml";
const FINALIZER_FILE: &str = "finalize.yaml";

/// Every artifact published by one repository
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub artifacts: Vec<PackageArtifact>,
}

impl Catalog {
    /// Load the synced catalog of a repository from `local_dir`
    ///
    /// Walks `<treepath>/<cat>/<name>/<version>/` and builds one artifact per
    /// directory holding a metadata file (looked up under `metapath` first).
    /// A `definition.yaml` in the tree is merged over the artifact's own
    /// relations, and a `finalize.yaml` is attached as its finalizer.
    pub fn load(repo: &Repository, local_dir: &Path) -> Result<Self> {
        let tree = local_dir.join(&repo.treepath);
        let meta = local_dir.join(&repo.metapath);
        if !tree.is_dir() {
            return Err(Error::NotFoundError(format!(
                "Repository '{}' has no synced tree at {}",
                repo.name,
                tree.display()
            )));
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&tree).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&tree) else {
                continue;
            };

            let metadata = METADATA_FILES
                .iter()
                .map(|f| meta.join(relative).join(f))
                .chain(METADATA_FILES.iter().map(|f| entry.path().join(f)))
                .find(|p| p.is_file());
            let Some(metadata) = metadata else {
                debug!("No artifact metadata in {}", entry.path().display());
                continue;
            };

            let mut artifact = PackageArtifact::load(&metadata)?;

            let definition = entry.path().join(DEFINITION_FILE);
            if definition.is_file() {
                let def: Package = serde_yaml::from_str(&fs::read_to_string(&definition)?)
                    .map_err(|e| {
                        Error::ParseError(format!("Invalid {}: {}", definition.display(), e))
                    })?;
                if def.same_as(&artifact.runtime) {
                    artifact.merge_definition(&def);
                } else {
                    warn!(
                        "{} describes {} but the artifact is {}, ignoring",
                        definition.display(),
                        def,
                        artifact.runtime
                    );
                }
            }

            let finalizer = entry.path().join(FINALIZER_FILE);
            if finalizer.is_file() {
                let fin: Finalizer = serde_yaml::from_str(&fs::read_to_string(&finalizer)?)?;
                artifact.finalizer = Some(fin);
            }

            artifact.runtime.repository = Some(repo.name.clone());
            artifact.priority = repo.priority;
            artifacts.push(artifact);
        }

        debug!(
            "Loaded {} artifacts from repository '{}'",
            artifacts.len(),
            repo.name
        );
        Ok(Self { artifacts })
    }

    /// Artifacts satisfying a reference, directly or through provides
    pub fn search(&self, reference: &PackageRef) -> Vec<&PackageArtifact> {
        self.artifacts
            .iter()
            .filter(|a| a.runtime.satisfies(reference))
            .collect()
    }

    pub fn search_category(&self, category: &str) -> Vec<&PackageArtifact> {
        self.artifacts
            .iter()
            .filter(|a| a.runtime.category == category)
            .collect()
    }

    /// Artifacts carrying a label, optionally with a given value
    pub fn search_label(&self, key: &str, value: Option<&str>) -> Vec<&PackageArtifact> {
        self.artifacts
            .iter()
            .filter(|a| match (a.runtime.labels.get(key), value) {
                (Some(v), Some(want)) => v == want,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .collect()
    }

    /// Artifacts shipping a file
    pub fn search_file(&self, path: &str) -> Vec<&PackageArtifact> {
        let path = path.trim_start_matches('/');
        self.artifacts
            .iter()
            .filter(|a| a.files.iter().any(|f| f.trim_start_matches('/') == path))
            .collect()
    }
}

/// The enabled repositories, sorted by priority, with lazily loaded catalogs
pub struct Repositories {
    repos: Vec<Repository>,
    config: Config,
    catalogs: RwLock<HashMap<String, Arc<Catalog>>>,
}

impl Repositories {
    /// Enabled repositories out of `repos`, sorted by priority
    pub fn new(repos: Vec<Repository>, config: &Config) -> Self {
        let mut repos: Vec<Repository> = repos.into_iter().filter(|r| r.enable).collect();
        repos.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Self {
            repos,
            config: config.clone(),
            catalogs: RwLock::new(HashMap::new()),
        }
    }

    /// Load descriptors from the configured directories
    pub fn load(config: &Config) -> Result<Self> {
        Ok(Self::new(load_repositories(&config.repos_confdir)?, config))
    }

    pub fn enabled(&self) -> &[Repository] {
        &self.repos
    }

    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Transport client for the named repository
    pub fn client(&self, name: &str) -> Result<Box<dyn Client>> {
        let repo = self
            .get(name)
            .ok_or_else(|| Error::NotFoundError(format!("repository '{}'", name)))?;
        new_client(repo, &self.config)
    }

    /// The catalog of a repository, syncing it first if it was never synced
    pub fn catalog(&self, repo: &Repository) -> Result<Arc<Catalog>> {
        if let Ok(cache) = self.catalogs.read()
            && let Some(catalog) = cache.get(&repo.name)
        {
            return Ok(Arc::clone(catalog));
        }

        let local_dir = repo.local_dir(&self.config.system.repos_database_path);
        let local_spec = local_dir.join(REPOSITORY_SPEC_FILE);
        let descriptor = if local_spec.exists() {
            let mut synced = Repository::load(&local_spec)?;
            synced.name = repo.name.clone();
            synced.priority = repo.priority;
            synced
        } else {
            debug!("Repository '{}' not synced yet", repo.name);
            sync(repo, &self.config, false)?
        };

        let catalog = Arc::new(Catalog::load(&descriptor, &local_dir)?);
        if let Ok(mut cache) = self.catalogs.write() {
            cache.insert(repo.name.clone(), Arc::clone(&catalog));
        }
        Ok(catalog)
    }

    /// Drop every loaded catalog to free memory
    pub fn clear_catalogs(&self) {
        if let Ok(mut cache) = self.catalogs.write() {
            cache.clear();
        }
    }

    fn collect<F>(&self, select: F) -> Result<Vec<PackageArtifact>>
    where
        F: Fn(&Catalog) -> Vec<&PackageArtifact>,
    {
        let mut found = Vec::new();
        for repo in &self.repos {
            let catalog = self.catalog(repo)?;
            found.extend(select(&catalog).into_iter().cloned());
        }
        sort_candidates(&mut found);
        Ok(found)
    }

    /// Artifacts satisfying a reference across every enabled repository
    ///
    /// Sorted by version descending, then repository priority.
    pub fn search(&self, reference: &PackageRef) -> Result<Vec<PackageArtifact>> {
        self.collect(|c| c.search(reference))
    }

    /// Like [`search`](Self::search), restricted to one repository
    pub fn search_in(&self, name: &str, reference: &PackageRef) -> Result<Vec<PackageArtifact>> {
        let repo = self
            .get(name)
            .ok_or_else(|| Error::NotFoundError(format!("repository '{}'", name)))?;
        let catalog = self.catalog(repo)?;
        let mut found: Vec<PackageArtifact> =
            catalog.search(reference).into_iter().cloned().collect();
        sort_candidates(&mut found);
        Ok(found)
    }

    pub fn search_category(&self, category: &str) -> Result<Vec<PackageArtifact>> {
        self.collect(|c| c.search_category(category))
    }

    pub fn search_label(&self, key: &str, value: Option<&str>) -> Result<Vec<PackageArtifact>> {
        self.collect(|c| c.search_label(key, value))
    }

    pub fn search_file(&self, path: &str) -> Result<Vec<PackageArtifact>> {
        self.collect(|c| c.search_file(path))
    }

    /// The artifact for exactly this concrete package, best repository first
    pub fn find_artifact(&self, pkg: &Package) -> Result<Option<PackageArtifact>> {
        Ok(self
            .search(&pkg.to_ref())?
            .into_iter()
            .find(|a| a.runtime.same_as(pkg)))
    }
}

/// Version descending, then repository priority ascending, then name
pub fn sort_candidates(artifacts: &mut [PackageArtifact]) {
    artifacts.sort_by(|a, b| {
        b.runtime
            .version
            .cmp(&a.runtime.version)
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.runtime.fingerprint().cmp(&b.runtime.fingerprint()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryType;
    use tempfile::TempDir;

    fn write_artifact(tree: &Path, pkg: &Package, files: &[&str]) {
        let dir = tree
            .join(&pkg.category)
            .join(&pkg.name)
            .join(pkg.version.to_string());
        fs::create_dir_all(&dir).unwrap();
        let mut artifact = PackageArtifact::new(pkg.clone())
            .with_files(files.iter().map(|f| f.to_string()).collect());
        artifact.path = format!("{}-{}-{}.tar", pkg.category, pkg.name, pkg.version);
        fs::write(
            dir.join("metadata.yaml"),
            serde_yaml::to_string(&artifact).unwrap(),
        )
        .unwrap();
    }

    fn synced_repo(root: &Path, name: &str, priority: i32, pkgs: &[(Package, &[&str])]) -> Repository {
        let repo = Repository::new(name, RepositoryType::Disk, vec!["/unused".into()])
            .with_priority(priority);
        let local = root.join("cache/repos").join(name);
        for (pkg, files) in pkgs {
            write_artifact(&local.join("treefs"), pkg, files);
        }
        repo.write(&local.join(REPOSITORY_SPEC_FILE)).unwrap();
        repo
    }

    fn pkg(s: &str) -> Package {
        Package::parse(s).unwrap()
    }

    #[test]
    fn test_search_orders_by_version_then_priority() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let main = synced_repo(
            root.path(),
            "main",
            1,
            &[(pkg("lib/bar@1.0"), &[]), (pkg("lib/bar@2.0"), &[])],
        );
        let extra = synced_repo(root.path(), "extra", 5, &[(pkg("lib/bar@2.0"), &[])]);

        let repos = Repositories::new(vec![extra, main], &config);
        let found = repos.search(&PackageRef::parse("lib/bar").unwrap()).unwrap();
        let order: Vec<(String, Option<String>)> = found
            .iter()
            .map(|a| (a.runtime.fingerprint(), a.runtime.repository.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("lib/bar@2.0".to_string(), Some("main".to_string())),
                ("lib/bar@2.0".to_string(), Some("extra".to_string())),
                ("lib/bar@1.0".to_string(), Some("main".to_string())),
            ]
        );
    }

    #[test]
    fn test_definition_merged_over_metadata() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let repo = synced_repo(root.path(), "main", 1, &[(pkg("app/foo@1.0"), &[])]);
        let def = pkg("app/foo@1.0").with_requires(vec![PackageRef::parse("lib/bar>=1").unwrap()]);
        fs::write(
            root.path().join("cache/repos/main/treefs/app/foo/1.0/definition.yaml"),
            serde_yaml::to_string(&def).unwrap(),
        )
        .unwrap();

        let repos = Repositories::new(vec![repo], &config);
        let found = repos.search(&PackageRef::parse("app/foo").unwrap()).unwrap();
        assert_eq!(found[0].runtime.requires, def.requires);
    }

    #[test]
    fn test_search_by_file_label_category() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let repo = synced_repo(
            root.path(),
            "main",
            1,
            &[
                (pkg("app/foo@1.0").with_label("kind", "tool"), &["usr/bin/foo"]),
                (pkg("lib/bar@1.0"), &["usr/lib/libbar.so"]),
            ],
        );
        let repos = Repositories::new(vec![repo], &config);

        assert_eq!(repos.search_file("/usr/bin/foo").unwrap().len(), 1);
        assert_eq!(repos.search_label("kind", Some("tool")).unwrap().len(), 1);
        assert_eq!(repos.search_label("kind", Some("lib")).unwrap().len(), 0);
        assert_eq!(repos.search_category("lib").unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_repositories_ignored_and_catalogs_cleared() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let on = synced_repo(root.path(), "on", 1, &[(pkg("app/foo@1.0"), &[])]);
        let off = synced_repo(root.path(), "off", 1, &[(pkg("app/foo@2.0"), &[])])
            .with_enabled(false);

        let repos = Repositories::new(vec![on, off], &config);
        assert_eq!(repos.enabled().len(), 1);
        let found = repos.search(&PackageRef::parse("app/foo").unwrap()).unwrap();
        assert_eq!(found.len(), 1);

        repos.clear_catalogs();
        assert_eq!(
            repos
                .search(&PackageRef::parse("app/foo").unwrap())
                .unwrap()
                .len(),
            1
        );
    }
}
