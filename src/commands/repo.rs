// src/commands/repo.rs
//! Repository management commands

use super::load_config;
use anyhow::{Context, Result, bail};
use quarry::repository::{REPOSITORY_SPEC_FILE, Repository, load_repositories, sync, sync_all};
use std::path::{Path, PathBuf};
use tracing::info;

/// List configured repositories
pub fn cmd_repo_list(config_path: &Path, rootfs: Option<PathBuf>, all: bool) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let repos = load_repositories(&config.repos_confdir).context("Failed to load repositories")?;

    let shown: Vec<&Repository> = repos.iter().filter(|r| all || r.enable).collect();
    if shown.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }

    for repo in shown {
        let local = repo
            .local_dir(&config.system.repos_database_path)
            .join(REPOSITORY_SPEC_FILE);
        let synced = Repository::load(&local).ok();
        let state = match &synced {
            Some(s) => format!("revision {}", s.revision),
            None => "not synced".to_string(),
        };
        let enabled = if repo.enable { "" } else { " (disabled)" };
        println!(
            "{} [{}] priority {}, {}{}",
            repo.name, repo.kind, repo.priority, state, enabled
        );
        for url in &repo.urls {
            println!("    {}", url);
        }
    }
    Ok(())
}

/// Sync the named repositories, or every enabled one
pub fn cmd_repo_update(
    config_path: &Path,
    rootfs: Option<PathBuf>,
    names: &[String],
    force: bool,
) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let repos = load_repositories(&config.repos_confdir).context("Failed to load repositories")?;

    if names.is_empty() {
        let synced = sync_all(&repos, &config, force)?;
        for repo in &synced {
            println!("{}: revision {}", repo.name, repo.revision);
        }
        info!("Synced {} repositories", synced.len());
        return Ok(());
    }

    for name in names {
        let Some(repo) = repos.iter().find(|r| &r.name == name) else {
            bail!("Repository '{}' not found", name);
        };
        let synced = sync(repo, &config, force)
            .with_context(|| format!("Failed to sync repository '{}'", name))?;
        println!("{}: revision {}", synced.name, synced.revision);
    }
    Ok(())
}
