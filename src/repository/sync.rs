// src/repository/sync.rs

//! Repository synchronization
//!
//! The client downloads the repository's `repository.yaml` first and compares
//! its `revision` and `last_update` with the copy cached under
//! `<repos_database_path>/<name>/`. Only when they differ (or a resync is
//! forced) are the tree and meta tarballs fetched, verified and unpacked.

use super::client::new_client;
use super::{META_KEY, REPOSITORY_SPEC_FILE, Repository, RepositoryFile, TREE_KEY};
use crate::compression;
use crate::concurrency::{BoundedPool, aggregate};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Get current timestamp as RFC 3339 string
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Whether a cached identity matches the remote one
///
/// Timestamps are compared as instants when both parse, textually otherwise.
pub fn is_up_to_date(local: &Repository, remote: &Repository) -> bool {
    if local.revision != remote.revision {
        return false;
    }
    match (
        DateTime::parse_from_rfc3339(&local.last_update),
        DateTime::parse_from_rfc3339(&remote.last_update),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => local.last_update == remote.last_update,
    }
}

/// Synchronize one repository into the local repository database
///
/// Returns the descriptor carrying the synced revision. Settings that belong
/// to the local descriptor (priority, urls, enable, transport) are kept over
/// whatever the remote identity file says.
pub fn sync(repo: &Repository, config: &Config, force: bool) -> Result<Repository> {
    let client = new_client(repo, config)?;
    let local_dir = repo.local_dir(&config.system.repos_database_path);
    let local_spec = local_dir.join(REPOSITORY_SPEC_FILE);

    let downloaded = client.download_file(REPOSITORY_SPEC_FILE)?;
    let remote = Repository::load(&downloaded);
    let _ = fs::remove_file(&downloaded);
    let remote = remote?;

    let mut synced = remote.clone();
    synced.name = repo.name.clone();
    synced.description = if repo.description.is_empty() {
        remote.description.clone()
    } else {
        repo.description.clone()
    };
    synced.urls = repo.urls.clone();
    synced.kind = repo.kind;
    synced.priority = repo.priority;
    synced.enable = repo.enable;
    synced.authentication = repo.authentication.clone();

    if !force && local_spec.exists() && local_dir.join(&remote.treepath).is_dir() {
        let local = Repository::load(&local_spec)?;
        if is_up_to_date(&local, &remote) {
            debug!(
                "Repository '{}' is up to date (revision {})",
                repo.name, remote.revision
            );
            return Ok(synced);
        }
    }

    info!(
        "Syncing repository '{}' (revision {}, updated {})",
        repo.name,
        remote.revision,
        if remote.last_update.is_empty() {
            "never"
        } else {
            remote.last_update.as_str()
        }
    );

    fs::create_dir_all(&local_dir)?;
    let tree = remote.file(TREE_KEY).ok_or_else(|| {
        Error::ParseError(format!(
            "Repository '{}' does not publish a tree file",
            repo.name
        ))
    })?;
    fetch_tree(client.as_ref(), tree, &local_dir, &remote.treepath)?;

    if let Some(meta) = remote.file(META_KEY) {
        if remote.metapath == remote.treepath {
            // Shares the tree's directory: unpack on top of it
            let archive = client.download_file(&meta.filename)?;
            let result = verify_and_unpack(&archive, meta, &local_dir.join(&remote.metapath));
            let _ = fs::remove_file(&archive);
            result?;
        } else {
            fetch_tree(client.as_ref(), meta, &local_dir, &remote.metapath)?;
        }
    }

    synced.write(&local_spec)?;
    info!("Repository '{}' synced", repo.name);
    Ok(synced)
}

/// Download a tarball and atomically replace `local_dir/<subdir>` with its contents
fn fetch_tree(
    client: &dyn super::Client,
    file: &RepositoryFile,
    local_dir: &Path,
    subdir: &str,
) -> Result<()> {
    let archive = client.download_file(&file.filename)?;
    let staging = tempfile::Builder::new()
        .prefix(".sync-")
        .tempdir_in(local_dir)?;

    let unpacked = staging.path().join("tree");
    let result = verify_and_unpack(&archive, file, &unpacked);
    let _ = fs::remove_file(&archive);
    result?;

    let target = local_dir.join(subdir);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::rename(&unpacked, &target)?;
    Ok(())
}

fn verify_and_unpack(archive: &Path, file: &RepositoryFile, dest: &Path) -> Result<()> {
    hash::verify_file(archive, &file.checksums)?;
    let entries = compression::unpack_archive(archive, dest, file.compression_type)?;
    debug!("Unpacked {} entries from {}", entries.len(), file.filename);
    Ok(())
}

/// Synchronize every enabled repository with bounded concurrency
///
/// One task per repository; all failures are reported together.
pub fn sync_all(repos: &[Repository], config: &Config, force: bool) -> Result<Vec<Repository>> {
    let enabled: Vec<&Repository> = repos.iter().filter(|r| r.enable).collect();
    let pool = BoundedPool::new(config.general.concurrency)?;

    let results = pool.map(enabled, |repo| {
        sync(repo, config, force)
            .map_err(|e| Error::DownloadError(format!("{}: {}", repo.name, e)))
    });
    let mut synced = aggregate(results)?;
    synced.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    Ok(synced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionType;
    use crate::repository::RepositoryType;
    use tempfile::TempDir;

    /// Publish a repository with a one-file tree under `root/published`
    fn publish(root: &Path, revision: u64, marker: &str) -> Repository {
        let published = root.join("published");
        let tree_src = root.join("tree-src");
        let _ = fs::remove_dir_all(&tree_src);
        fs::create_dir_all(tree_src.join("app/foo/1.0")).unwrap();
        fs::write(tree_src.join("app/foo/1.0/marker"), marker).unwrap();
        fs::create_dir_all(&published).unwrap();

        let tree_path = published.join("tree.tar.gz");
        compression::pack_archive(&tree_src, &tree_path, CompressionType::Gzip).unwrap();

        let mut identity = Repository::new("main", RepositoryType::Disk, vec![]);
        identity.revision = revision;
        identity.last_update = "2024-05-01T10:00:00+00:00".to_string();
        identity.repo_files.insert(
            TREE_KEY.to_string(),
            RepositoryFile {
                filename: "tree.tar.gz".to_string(),
                compression_type: CompressionType::Gzip,
                checksums: hash::checksums_for_file(&tree_path).unwrap(),
            },
        );
        identity.write(&published.join(REPOSITORY_SPEC_FILE)).unwrap();

        Repository::new(
            "main",
            RepositoryType::Disk,
            vec![published.to_string_lossy().to_string()],
        )
        .with_priority(3)
    }

    #[test]
    fn test_sync_unpacks_tree_and_skips_when_current() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let repo = publish(root.path(), 1, "first");

        let synced = sync(&repo, &config, false).unwrap();
        assert_eq!(synced.revision, 1);
        assert_eq!(synced.priority, 3);

        let marker = config
            .system
            .repos_database_path
            .join("main/treefs/app/foo/1.0/marker");
        assert_eq!(fs::read_to_string(&marker).unwrap(), "first");

        // Same revision: tree is not refetched even though the content changed
        publish(root.path(), 1, "second");
        sync(&repo, &config, false).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "first");

        // Forced resync picks it up
        sync(&repo, &config, true).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "second");
    }

    #[test]
    fn test_sync_new_revision_replaces_tree() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let repo = publish(root.path(), 1, "first");
        sync(&repo, &config, false).unwrap();

        publish(root.path(), 2, "second");
        let synced = sync(&repo, &config, false).unwrap();
        assert_eq!(synced.revision, 2);
        let marker = config
            .system
            .repos_database_path
            .join("main/treefs/app/foo/1.0/marker");
        assert_eq!(fs::read_to_string(marker).unwrap(), "second");
    }

    #[test]
    fn test_sync_all_aggregates_failures() {
        let root = TempDir::new().unwrap();
        let config = Config::rooted_at(root.path());
        let good = publish(root.path(), 1, "x");
        let bad = Repository::new(
            "broken",
            RepositoryType::Disk,
            vec![root.path().join("nowhere").to_string_lossy().to_string()],
        );
        let disabled = Repository::new("off", RepositoryType::Docker, vec!["x".into()])
            .with_enabled(false);

        match sync_all(&[good.clone(), bad, disabled], &config, false) {
            Err(Error::Aggregate(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("broken"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let synced = sync_all(&[good], &config, false).unwrap();
        assert_eq!(synced.len(), 1);
    }

    #[test]
    fn test_is_up_to_date_compares_instants() {
        let mut a = Repository::new("r", RepositoryType::Disk, vec![]);
        a.revision = 2;
        a.last_update = "2024-05-01T10:00:00+00:00".to_string();
        let mut b = a.clone();
        b.last_update = "2024-05-01T12:00:00+02:00".to_string();
        assert!(is_up_to_date(&a, &b));
        b.revision = 3;
        assert!(!is_up_to_date(&a, &b));
    }
}
