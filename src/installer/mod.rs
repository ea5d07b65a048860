// src/installer/mod.rs

//! Installation transaction manager
//!
//! [`Installer`] turns a resolution into changes on the target rootfs and
//! in the package database. Every transaction runs the same phases, in
//! order and without interleaving:
//!
//! 1. resolve and order the operations ([`Plan`])
//! 2. check the batch for file conflicts
//! 3. confirm with the operator
//! 4. download every artifact (all or nothing)
//! 5. remove replaced and deleted packages
//! 6. unpack and register new packages
//! 7. run install finalizers in install order
//!
//! Phases 5-7 hold the transaction lock and are recorded in the operation
//! journal. Without `force` any failure aborts the transaction where it
//! stands; with `force` failures are logged and the run continues. There
//! is no rollback; re-running the command is the recovery path.

pub mod conflicts;
pub mod finalizer;
pub mod journal;
pub mod lock;
pub mod protect;
pub mod remove;
pub mod unpack;

pub use conflicts::{ConflictCheck, FileIndex};
pub use finalizer::{FinalizerRunner, Phase};
pub use journal::{IncompleteTransaction, OperationJournal, find_incomplete};
pub use lock::TransactionLock;
pub use protect::ConfigProtect;
pub use remove::{RemoveOptions, remove_package, remove_package_files};
pub use unpack::{UnpackReport, unpack_artifact};

use crate::concurrency::{BoundedPool, aggregate};
use crate::config::Config;
use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::package::{Package, PackageRef};
use crate::repository::{ArtifactsPack, PackageArtifact, Repositories};
use crate::resolver::{
    Operation, OperationKind, Plan, Solver, SolverOptions, UpgradeOptions, order_operations,
};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flags of install, upgrade and reinstall
#[derive(Debug, Clone, Copy)]
pub struct InstallOpts {
    /// Degrade errors to warnings and keep going
    pub force: bool,
    /// Show the plan and stop
    pub pretend: bool,
    pub ask: bool,
    pub download_only: bool,
    pub no_deps: bool,
    pub skip_finalizers: bool,
    /// Check claimed files against installed packages and the rootfs
    pub check_conflicts: bool,
    /// Report file conflicts as warnings
    pub safe_check: bool,
    pub preserve_system_essential_data: bool,
}

impl Default for InstallOpts {
    fn default() -> Self {
        Self {
            force: false,
            pretend: false,
            ask: false,
            download_only: false,
            no_deps: false,
            skip_finalizers: false,
            check_conflicts: true,
            safe_check: false,
            preserve_system_essential_data: true,
        }
    }
}

/// Flags of uninstall
#[derive(Debug, Clone, Copy)]
pub struct UninstallOpts {
    pub force: bool,
    /// Remove exactly the matched packages, not their dependents
    pub no_deps: bool,
    pub ask: bool,
    /// Also remove dependencies nothing else needs
    pub full: bool,
    pub check_conflicts: bool,
    pub skip_finalizers: bool,
    pub preserve_system_essential_data: bool,
}

impl Default for UninstallOpts {
    fn default() -> Self {
        Self {
            force: false,
            no_deps: false,
            ask: false,
            full: false,
            check_conflicts: true,
            skip_finalizers: false,
            preserve_system_essential_data: true,
        }
    }
}

/// Operator confirmation before a transaction is applied
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

/// Accepts everything
pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

/// Asks on stderr and reads the answer from stdin; anything but y/yes declines
pub struct StdinPrompt;

impl Confirm for StdinPrompt {
    fn confirm(&self, question: &str) -> bool {
        let mut stderr = io::stderr();
        if write!(stderr, "{} [y/N] ", question)
            .and_then(|_| stderr.flush())
            .is_err()
        {
            return false;
        }
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// What a transaction did
#[derive(Debug, Clone, Default)]
pub struct TransactionSummary {
    pub plan: Plan,
    pub installed: Vec<Package>,
    pub removed: Vec<Package>,
    /// `._cfgNNNN_` files written for protected configuration
    pub protected_copies: Vec<PathBuf>,
    /// True when the run stopped before touching the rootfs
    pub pretend: bool,
}

pub struct Installer {
    config: Config,
    db: Arc<dyn PackageDatabase>,
    repos: Repositories,
    pool: BoundedPool,
    file_index: FileIndex,
    confirm: Box<dyn Confirm>,
}

impl Installer {
    pub fn new(config: &Config, db: Arc<dyn PackageDatabase>, repos: Repositories) -> Result<Self> {
        Ok(Self {
            pool: BoundedPool::new(config.general.concurrency)?,
            config: config.clone(),
            db,
            repos,
            file_index: FileIndex::new(),
            confirm: Box::new(StdinPrompt),
        })
    }

    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &dyn PackageDatabase {
        self.db.as_ref()
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    fn solver(&self, no_deps: bool) -> Solver<'_> {
        Solver::new(
            self.db.as_ref(),
            &self.repos,
            SolverOptions::from_config(&self.config).with_no_deps(no_deps),
        )
    }

    /// Install packages and whatever they need
    ///
    /// Requests the installed world already satisfies are skipped with a
    /// warning. Returns [`Error::NothingToDo`] when nothing is left.
    pub fn install(&self, opts: InstallOpts, packages: &[PackageRef]) -> Result<TransactionSummary> {
        let mut wanted = Vec::new();
        for reference in packages {
            let installed = self.db.find_by_ref(reference)?;
            match installed.first() {
                Some(pkg) => warn!("{} is already installed, skipping", pkg),
                None => wanted.push(reference.clone()),
            }
        }
        if wanted.is_empty() {
            return Err(Error::NothingToDo);
        }

        let result = self.solver(opts.no_deps).install(&wanted)?;
        if result.is_empty() {
            return Err(Error::NothingToDo);
        }

        let description = format!(
            "install {}",
            wanted
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        self.apply(opts, result.to_install, result.to_remove, &description)
    }

    /// Replace installed packages with their best upgrades
    pub fn upgrade(&self, opts: InstallOpts) -> Result<TransactionSummary> {
        let result = self.solver(opts.no_deps).upgrade(UpgradeOptions {
            universe_check: opts.check_conflicts,
        })?;
        if result.is_empty() {
            return Err(Error::NothingToDo);
        }

        let mut to_install = result.to_update;
        for artifact in result.to_install.into_vec() {
            to_install.push(artifact);
        }
        self.apply(opts, to_install, result.to_remove, "upgrade")
    }

    /// Remove and install again the exact installed versions
    ///
    /// Uninstall finalizers of the old copies are not run.
    pub fn reinstall(&self, opts: InstallOpts, packages: &[PackageRef]) -> Result<TransactionSummary> {
        let mut to_remove = ArtifactsPack::new();
        let mut to_install = ArtifactsPack::new();

        for reference in packages {
            let installed = self.db.find_by_ref(reference)?;
            let Some(pkg) = installed.into_iter().next() else {
                let err = Error::NotFoundError(format!("{} is not installed", reference));
                tolerate(opts.force, err)?;
                continue;
            };
            let Some(artifact) = self.repos.find_artifact(&pkg)? else {
                let err = Error::NotFoundError(format!("no repository carries {}", pkg));
                tolerate(opts.force, err)?;
                continue;
            };
            to_remove.push(PackageArtifact::new(pkg));
            to_install.push(artifact);
        }

        if to_install.is_empty() {
            return Err(Error::NothingToDo);
        }
        self.apply(opts, to_install, to_remove, "reinstall")
    }

    /// Remove installed packages
    ///
    /// Every request must match an installed package (with `force` missing
    /// ones are skipped). With `no_deps` exactly the matched packages are
    /// removed, even if other installed packages require them; otherwise
    /// the installed packages that depend on the matches go too. Packages are removed one at a time,
    /// dependents before their dependencies; with `force` a failed removal
    /// is recorded and the rest continue, and the last error is returned.
    pub fn uninstall(
        &self,
        opts: UninstallOpts,
        packages: &[PackageRef],
    ) -> Result<TransactionSummary> {
        let mut matched: Vec<Package> = Vec::new();
        for reference in packages {
            let found = self.db.find_by_ref(reference)?;
            if found.is_empty() {
                let err = Error::NotFoundError(format!("{} is not installed", reference));
                tolerate(opts.force, err)?;
                continue;
            }
            for pkg in found {
                if !matched.iter().any(|m| m.same_as(&pkg)) {
                    matched.push(pkg);
                }
            }
        }
        if matched.is_empty() {
            return Err(Error::NothingToDo);
        }

        let removal = if opts.no_deps {
            matched
        } else {
            let solver = self.solver(false);
            let closure = solver.resolve_runtime(&matched)?;
            solver.uninstall(opts.check_conflicts, opts.full, &closure)?
        };

        let to_remove: ArtifactsPack = removal.into_iter().map(PackageArtifact::new).collect();
        let plan = order_operations(&ArtifactsPack::new(), &to_remove);
        self.present(&plan);

        if opts.ask && !self.confirm.confirm("Remove these packages?") {
            return Err(Error::Cancelled("uninstall declined".into()));
        }

        let _lock = TransactionLock::acquire(&self.config.state_dir())?;
        let mut journal = self.begin_journal("uninstall", &plan)?;

        let remove_opts = RemoveOptions {
            preserve_system_essential_data: opts.preserve_system_essential_data,
            skip_finalizer: opts.skip_finalizers,
            force: opts.force,
        };

        let mut summary = TransactionSummary {
            plan: plan.clone(),
            ..Default::default()
        };
        let mut last_error = None;
        for op in &plan.operations {
            match remove_package(self.db.as_ref(), &self.config, op.package(), remove_opts) {
                Ok(_) => {
                    journal.record_applied(op)?;
                    summary.removed.push(op.package().clone());
                }
                Err(e) => {
                    journal.record_failed(op, &e)?;
                    if !opts.force {
                        close_failed(journal);
                        return Err(e);
                    }
                    warn!("Failed to remove {}: {}", op.package(), e);
                    last_error = Some(e);
                }
            }
        }

        journal.finish(last_error.is_none())?;
        match last_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Run the phases shared by install, upgrade and reinstall
    fn apply(
        &self,
        opts: InstallOpts,
        to_install: ArtifactsPack,
        to_remove: ArtifactsPack,
        description: &str,
    ) -> Result<TransactionSummary> {
        let plan = order_operations(&to_install, &to_remove);
        self.present(&plan);

        let check = ConflictCheck {
            db: self.db.as_ref(),
            index: &self.file_index,
            rootfs: &self.config.system.rootfs,
            protect: &self.config.config_protect,
            check_system: opts.check_conflicts,
            safe_check: opts.safe_check,
        };
        if let Err(e) = check.run(&to_install, &to_remove) {
            tolerate(opts.force, e)?;
        }

        let mut summary = TransactionSummary {
            plan,
            ..Default::default()
        };
        if opts.pretend {
            summary.pretend = true;
            return Ok(summary);
        }

        if opts.ask && !self.confirm.confirm("Proceed with the transaction?") {
            return Err(Error::Cancelled(format!("{} declined", description)));
        }

        let downloaded = self.download(&to_install)?;
        if opts.download_only {
            info!("Downloaded {} artifact(s)", downloaded.len());
            summary.pretend = true;
            return Ok(summary);
        }

        let _lock = TransactionLock::acquire(&self.config.state_dir())?;
        let mut journal = self.begin_journal(description, &summary.plan)?;
        let mut errors: Vec<String> = Vec::new();

        let plan = summary.plan.clone();
        let outcome = self.apply_operations(
            opts,
            &plan,
            &downloaded,
            &mut journal,
            &mut summary,
            &mut errors,
        );
        if let Err(e) = outcome {
            close_failed(journal);
            return Err(e);
        }

        journal.finish(errors.is_empty())?;
        if errors.is_empty() {
            Ok(summary)
        } else {
            Err(Error::Aggregate(errors))
        }
    }

    fn apply_operations(
        &self,
        opts: InstallOpts,
        plan: &Plan,
        downloaded: &HashMap<String, PackageArtifact>,
        journal: &mut OperationJournal,
        summary: &mut TransactionSummary,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        // Removals
        for op in plan.operations.iter().filter(|op| op.kind.is_removal()) {
            let remove_opts = RemoveOptions {
                preserve_system_essential_data: opts.preserve_system_essential_data,
                skip_finalizer: opts.skip_finalizers || op.kind == OperationKind::Replaced,
                force: opts.force,
            };
            match remove_package(self.db.as_ref(), &self.config, op.package(), remove_opts) {
                Ok(_) => {
                    journal.record_applied(op)?;
                    summary.removed.push(op.package().clone());
                }
                Err(e) => record_failure(journal, op, e, opts.force, errors)?,
            }
        }

        // Unpack and register
        let mut installed: Vec<&PackageArtifact> = Vec::new();
        for op in plan.operations.iter().filter(|op| !op.kind.is_removal()) {
            let fingerprint = op.package().fingerprint();
            let Some(artifact) = downloaded.get(&fingerprint) else {
                let e = Error::TransactionError(format!("{} was not downloaded", fingerprint));
                record_failure(journal, op, e, opts.force, errors)?;
                continue;
            };
            match self.install_artifact(artifact) {
                Ok(report) => {
                    journal.record_applied(op)?;
                    summary.protected_copies.extend(report.protected_copies);
                    summary.installed.push(artifact.runtime.clone());
                    installed.push(artifact);
                }
                Err(e) => record_failure(journal, op, e, opts.force, errors)?,
            }
        }

        // Finalizers, in install order
        if !opts.skip_finalizers {
            let runner = FinalizerRunner::from_config(&self.config);
            for artifact in installed {
                let Some(finalizer) = &artifact.finalizer else {
                    continue;
                };
                if let Err(e) = runner.run(&artifact.runtime, finalizer, Phase::Install) {
                    if !opts.force {
                        return Err(e);
                    }
                    warn!("{} (continuing, forced)", e);
                    errors.push(e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Unpack one artifact and register it with its files and finalizer
    fn install_artifact(&self, artifact: &PackageArtifact) -> Result<UnpackReport> {
        let report = unpack_artifact(artifact, &self.config, &self.pool)?;
        let pkg = &artifact.runtime;
        self.db.create_package(pkg)?;
        self.db.set_files(pkg, &report.files)?;
        if let Some(finalizer) = &artifact.finalizer {
            self.db.set_finalizer(pkg, finalizer)?;
        }
        info!("Installed {}", pkg);
        Ok(report)
    }

    /// Bring every artifact into the cache, one task per source repository
    ///
    /// Any failure fails the whole download; artifacts already cached are
    /// kept and reused on the next run.
    fn download(&self, to_install: &ArtifactsPack) -> Result<HashMap<String, PackageArtifact>> {
        let mut groups: BTreeMap<String, Vec<PackageArtifact>> = BTreeMap::new();
        for artifact in to_install.iter() {
            let repo = artifact.repository().ok_or_else(|| {
                Error::DownloadError(format!("{} has no source repository", artifact.runtime))
            })?;
            groups
                .entry(repo.to_string())
                .or_default()
                .push(artifact.clone());
        }

        let repos = &self.repos;
        let results = self.pool.map(groups.into_iter().collect(), |(name, artifacts)| {
            let client = repos.client(&name)?;
            artifacts
                .into_iter()
                .map(|mut artifact| {
                    let label = artifact.runtime.fingerprint();
                    client.download_artifact(&mut artifact, &label)?;
                    Ok(artifact)
                })
                .collect::<Result<Vec<_>>>()
        });

        let downloaded: HashMap<String, PackageArtifact> = aggregate(results)?
            .into_iter()
            .flatten()
            .map(|a| (a.runtime.fingerprint(), a))
            .collect();
        debug!("{} artifact(s) in cache", downloaded.len());
        Ok(downloaded)
    }

    fn begin_journal(&self, description: &str, plan: &Plan) -> Result<OperationJournal> {
        let mut journal = OperationJournal::begin(
            &self.journal_dir(),
            &self.config.system.rootfs,
            description,
        )?;
        journal.record_plan(plan)?;
        Ok(journal)
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.config.state_dir().join("journal")
    }

    fn present(&self, plan: &Plan) {
        info!("Transaction: {}", plan.summary());
        for op in &plan.operations {
            info!("  {}", op);
        }
    }
}

/// Journal a failed operation; fatal unless forced
fn record_failure(
    journal: &mut OperationJournal,
    op: &Operation,
    err: Error,
    force: bool,
    errors: &mut Vec<String>,
) -> Result<()> {
    journal.record_failed(op, &err)?;
    if !force {
        return Err(err);
    }
    warn!("{} (continuing, forced)", err);
    errors.push(err.to_string());
    Ok(())
}

fn close_failed(journal: OperationJournal) {
    if let Err(e) = journal.finish(false) {
        warn!("Failed to close journal: {}", e);
    }
}

fn tolerate(force: bool, err: Error) -> Result<()> {
    if force {
        warn!("{} (continuing, forced)", err);
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    impl Confirm for Never {
        fn confirm(&self, _question: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_default_opts_are_safe() {
        let opts = InstallOpts::default();
        assert!(opts.check_conflicts);
        assert!(opts.preserve_system_essential_data);
        assert!(!opts.force && !opts.safe_check);

        let opts = UninstallOpts::default();
        assert!(opts.check_conflicts);
        assert!(!opts.no_deps && !opts.full);
    }

    #[test]
    fn test_confirm_impls() {
        assert!(AlwaysYes.confirm("ok?"));
        assert!(!Never.confirm("ok?"));
    }

    #[test]
    fn test_tolerate() {
        assert!(tolerate(true, Error::NotFoundError("x".into())).is_ok());
        assert!(tolerate(false, Error::NotFoundError("x".into())).is_err());
    }
}
