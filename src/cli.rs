// src/cli.rs
//! CLI definitions for the Quarry package manager
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand, ValueEnum};
use quarry::config::{DEFAULT_CONFIG_PATH, SolverStrategy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(author = "Quarry Contributors")]
#[command(version)]
#[command(about = "Package manager with prioritized repositories and SAT-backed resolution", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Target root filesystem (overrides system.rootfs)
    #[arg(long, global = true)]
    pub rootfs: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SolverArg {
    Greedy,
    Sat,
}

impl From<SolverArg> for SolverStrategy {
    fn from(arg: SolverArg) -> Self {
        match arg {
            SolverArg::Greedy => SolverStrategy::Greedy,
            SolverArg::Sat => SolverStrategy::Sat,
        }
    }
}

/// Flags shared by install, upgrade and reinstall
#[derive(Args, Debug, Clone)]
pub struct TransactionArgs {
    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan without applying it
    #[arg(long)]
    pub pretend: bool,

    /// Continue past errors
    #[arg(long)]
    pub force: bool,

    /// Only download the artifacts
    #[arg(long)]
    pub download_only: bool,

    /// Do not run install finalizers
    #[arg(long)]
    pub skip_finalizers: bool,

    /// Skip checks against installed files and the rootfs
    #[arg(long)]
    pub no_check_conflicts: bool,

    /// Report file conflicts as warnings
    #[arg(long)]
    pub safe_check: bool,

    /// Allow removing files under the package cache and repository catalogs
    #[arg(long)]
    pub no_preserve_essential: bool,

    /// Resolution strategy (overrides solver.strategy)
    #[arg(long, value_enum)]
    pub solver: Option<SolverArg>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install packages and their dependencies
    Install {
        /// Packages, e.g. app/foo, app/foo@1.2, "lib/bar>=2.0"
        #[arg(required = true)]
        packages: Vec<String>,

        /// Install exactly the requested packages
        #[arg(long)]
        nodeps: bool,

        #[command(flatten)]
        args: TransactionArgs,
    },

    /// Remove packages and the packages depending on them
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Continue past errors
        #[arg(long)]
        force: bool,

        /// Remove exactly the requested packages
        #[arg(long)]
        nodeps: bool,

        /// Also remove dependencies nothing else needs
        #[arg(long)]
        full: bool,

        /// Do not validate the remaining world
        #[arg(long)]
        no_check_conflicts: bool,

        /// Do not run uninstall finalizers
        #[arg(long)]
        skip_finalizers: bool,

        /// Allow removing files under the package cache and repository catalogs
        #[arg(long)]
        no_preserve_essential: bool,
    },

    /// Upgrade every installed package
    Upgrade {
        #[command(flatten)]
        args: TransactionArgs,
    },

    /// Remove and install again the installed versions
    Reinstall {
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        args: TransactionArgs,
    },

    /// Search repositories or the installed world
    Search {
        /// Package reference; omit to list everything
        term: Option<String>,

        /// Search installed packages instead of repositories
        #[arg(long)]
        installed: bool,

        /// Packages shipping this file
        #[arg(long)]
        file: Option<String>,

        /// Packages with this label, as key or key=value
        #[arg(long)]
        label: Option<String>,

        /// Packages in this category
        #[arg(long)]
        category: Option<String>,

        /// Include hidden packages
        #[arg(long)]
        hidden: bool,
    },

    /// Query the installed world
    #[command(subcommand)]
    Query(QueryCommands),

    /// Repository management
    #[command(subcommand)]
    Repo(RepoCommands),

    /// Edit the package database without touching the rootfs
    #[command(subcommand)]
    Database(DatabaseCommands),

    /// Report interrupted transactions and missing files
    Doctor,
}

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Files of an installed package
    Files { package: String },

    /// Installed package owning a file
    Owner { path: String },

    /// Installed packages no repository carries
    Orphans,
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// List configured repositories
    List {
        /// Include disabled repositories
        #[arg(long)]
        all: bool,
    },

    /// Sync repository catalogs
    Update {
        /// Repositories to sync; all enabled when empty
        names: Vec<String>,

        /// Refetch even if the revision did not change
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Register packages from artifact metadata files
    Create {
        #[arg(required = true)]
        metadata: Vec<PathBuf>,
    },

    /// Drop packages from the database, leaving their files
    Remove {
        #[arg(required = true)]
        packages: Vec<String>,
    },
}
