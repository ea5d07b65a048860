// src/lib.rs

//! Quarry package manager
//!
//! Installs, upgrades and removes packages from prioritized repositories
//! into a target root filesystem, tracking the installed world in a
//! package database.
//!
//! # Architecture
//!
//! - [`resolver`]: decides what to install, upgrade or remove (greedy
//!   candidate walk, or a SAT formulation with a relaxation fallback)
//! - [`installer`]: applies a resolution to the rootfs and the database
//! - [`repository`]: repository descriptors, catalogs, transports and sync
//! - [`db`]: the installed world behind the [`db::PackageDatabase`] trait
//! - [`config`]: one explicit [`Config`] value passed into every engine

pub mod compression;
pub mod concurrency;
pub mod config;
pub mod db;
mod error;
pub mod filesystem;
pub mod hash;
pub mod installer;
pub mod package;
pub mod repository;
pub mod resolver;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use installer::{InstallOpts, Installer, TransactionSummary, UninstallOpts};
pub use package::{Finalizer, Identity, Package, PackageRef, Stone};
pub use repository::{ArtifactsPack, PackageArtifact, Repositories, Repository};
pub use resolver::{Solver, SolverOptions};
pub use version::{Version, VersionConstraint};
