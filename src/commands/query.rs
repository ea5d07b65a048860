// src/commands/query.rs
//! Search and query commands

use super::{load_config, open_db};
use anyhow::{Context, Result, bail};
use quarry::db::normalize_file_path;
use quarry::{Package, PackageRef, Repositories, Solver, SolverOptions};
use std::path::{Path, PathBuf};

/// Filters of `quarry search`
#[derive(Debug, Default)]
pub struct SearchOptions {
    pub term: Option<String>,
    pub installed: bool,
    pub file: Option<String>,
    pub label: Option<String>,
    pub category: Option<String>,
    pub hidden: bool,
}

impl SearchOptions {
    fn label_filter(&self) -> Option<(&str, Option<&str>)> {
        self.label.as_deref().map(|label| match label.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (label, None),
        })
    }

    fn admits(&self, pkg: &Package, reference: Option<&PackageRef>) -> bool {
        if pkg.hidden && !self.hidden {
            return false;
        }
        if let Some(reference) = reference
            && !pkg.satisfies(reference)
        {
            return false;
        }
        if let Some(category) = &self.category
            && &pkg.category != category
        {
            return false;
        }
        if let Some((key, value)) = self.label_filter() {
            match pkg.labels.get(key) {
                Some(v) => value.is_none_or(|want| v == want),
                None => false,
            }
        } else {
            true
        }
    }
}

pub fn cmd_search(config_path: &Path, rootfs: Option<PathBuf>, opts: &SearchOptions) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let reference = opts
        .term
        .as_deref()
        .map(|t| PackageRef::parse(t).with_context(|| format!("Invalid package '{}'", t)))
        .transpose()?;

    let mut found: Vec<(Package, Option<String>)> = Vec::new();
    if opts.installed {
        let db = open_db(&config)?;
        let owners = match &opts.file {
            Some(file) => Some(db.file_owners()?.get(&normalize_file_path(file)).cloned()),
            None => None,
        };
        for pkg in db.world()? {
            if let Some(owner) = &owners
                && owner.as_deref() != Some(pkg.fingerprint().as_str())
            {
                continue;
            }
            found.push((pkg, None));
        }
    } else {
        let repos = Repositories::load(&config).context("Failed to load repositories")?;
        let artifacts = match (&opts.file, &opts.category, opts.label_filter(), &reference) {
            (Some(file), _, _, _) => repos.search_file(file)?,
            (None, Some(category), _, _) => repos.search_category(category)?,
            (None, None, Some((key, value)), _) => repos.search_label(key, value)?,
            (None, None, None, Some(reference)) => repos.search(reference)?,
            (None, None, None, None) => {
                let mut all = Vec::new();
                for repo in repos.enabled() {
                    all.extend(repos.catalog(repo)?.artifacts.iter().cloned());
                }
                quarry::repository::sort_candidates(&mut all);
                all
            }
        };
        for artifact in artifacts {
            let repo = artifact.repository().map(str::to_string);
            found.push((artifact.runtime, repo));
        }
    }

    found.retain(|(pkg, _)| opts.admits(pkg, reference.as_ref()));
    if found.is_empty() {
        println!("No packages found");
        return Ok(());
    }

    for (pkg, repo) in &found {
        match repo {
            Some(repo) => println!("{} [{}]", pkg, repo),
            None => println!("{}", pkg),
        }
        if let Some(description) = &pkg.description {
            println!("    {}", description);
        }
    }
    Ok(())
}

pub fn cmd_query_files(config_path: &Path, rootfs: Option<PathBuf>, package: &str) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let db = open_db(&config)?;
    let reference =
        PackageRef::parse(package).with_context(|| format!("Invalid package '{}'", package))?;

    let Some(pkg) = db.find_by_ref(&reference)?.into_iter().next() else {
        bail!("{} is not installed", reference);
    };
    for file in db.get_files(&pkg)? {
        println!("/{}", file);
    }
    Ok(())
}

pub fn cmd_query_owner(config_path: &Path, rootfs: Option<PathBuf>, path: &str) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let db = open_db(&config)?;

    match db.find_file_owner(path)? {
        Some(pkg) => println!("{} is owned by {}", path, pkg),
        None => println!("{} is not owned by any installed package", path),
    }
    Ok(())
}

pub fn cmd_query_orphans(config_path: &Path, rootfs: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let db = open_db(&config)?;
    let repos = Repositories::load(&config).context("Failed to load repositories")?;
    let solver = Solver::new(db.as_ref(), &repos, SolverOptions::from_config(&config));

    let orphans = solver.orphans()?;
    if orphans.is_empty() {
        println!("No orphaned packages");
    }
    for pkg in orphans {
        println!("{}", pkg);
    }
    Ok(())
}
