// src/commands/install.rs
//! Install, upgrade, reinstall and uninstall commands

use super::{load_config, notice_ok, open_installer, parse_refs};
use crate::cli::TransactionArgs;
use anyhow::Result;
use quarry::{TransactionSummary, UninstallOpts};
use std::path::{Path, PathBuf};
use tracing::info;

pub fn cmd_install(
    config_path: &Path,
    rootfs: Option<PathBuf>,
    packages: &[String],
    nodeps: bool,
    args: &TransactionArgs,
) -> Result<()> {
    let config = args.configure(load_config(config_path, rootfs)?);
    let refs = parse_refs(packages)?;
    let installer = open_installer(&config, args.yes)?;

    info!("Installing {} package(s)", refs.len());
    if let Some(summary) = notice_ok(installer.install(args.install_opts(nodeps), &refs))? {
        print_summary(&summary);
    }
    Ok(())
}

pub fn cmd_upgrade(config_path: &Path, rootfs: Option<PathBuf>, args: &TransactionArgs) -> Result<()> {
    let config = args.configure(load_config(config_path, rootfs)?);
    let installer = open_installer(&config, args.yes)?;

    if let Some(summary) = notice_ok(installer.upgrade(args.install_opts(false)))? {
        print_summary(&summary);
    }
    Ok(())
}

pub fn cmd_reinstall(
    config_path: &Path,
    rootfs: Option<PathBuf>,
    packages: &[String],
    args: &TransactionArgs,
) -> Result<()> {
    let config = args.configure(load_config(config_path, rootfs)?);
    let refs = parse_refs(packages)?;
    let installer = open_installer(&config, args.yes)?;

    if let Some(summary) = notice_ok(installer.reinstall(args.install_opts(true), &refs))? {
        print_summary(&summary);
    }
    Ok(())
}

pub fn cmd_uninstall(
    config_path: &Path,
    rootfs: Option<PathBuf>,
    packages: &[String],
    opts: UninstallOpts,
) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let refs = parse_refs(packages)?;
    let installer = open_installer(&config, !opts.ask)?;

    if let Some(summary) = notice_ok(installer.uninstall(opts, &refs))? {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &TransactionSummary) {
    if summary.pretend {
        println!("{}", summary.plan);
        return;
    }
    for pkg in &summary.removed {
        println!("Removed {}", pkg);
    }
    for pkg in &summary.installed {
        println!("Installed {}", pkg);
    }
    if !summary.protected_copies.is_empty() {
        println!(
            "{} protected configuration file(s) need merging:",
            summary.protected_copies.len()
        );
        for path in &summary.protected_copies {
            println!("  {}", path.display());
        }
    }
}
