// src/resolver/mod.rs

//! Dependency resolution
//!
//! The [`Solver`] answers four questions about the installed world:
//!
//! - what to install (and replace) to satisfy a request ([`Solver::install`])
//! - which installed packages have newer versions or respins ([`Solver::upgrade`])
//! - which installed packages no repository carries anymore ([`Solver::orphans`])
//! - what else has to go when packages are removed ([`Solver::uninstall`],
//!   [`Solver::resolve_runtime`])
//!
//! Every call is a function of the database snapshot, the candidate source
//! and its arguments; scratch state lives in a per-call [`Resolution`].
//! Two strategies are available: the greedy candidate walk (default) and a
//! SAT-based one ([`sat`]) for global consistency.

pub mod candidates;
pub mod graph;
pub mod orphans;
pub mod plan;
pub mod sat;
pub mod uninstall;
pub mod upgrade;

pub use candidates::{Resolution, Visited};
pub use graph::DependencyGraph;
pub use plan::{Operation, OperationKind, Plan, order_operations};
pub use sat::{IterativeRelaxer, RelaxOptions, Relaxer};
pub use upgrade::{UpgradeOptions, UpgradeResult};

use crate::config::{Config, SolverStrategy};
use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::package::{Identity, Package, PackageRef};
use crate::repository::{ArtifactsPack, PackageArtifact, Repositories, sort_candidates};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Where candidate packages come from
pub trait CandidateSource: Send + Sync {
    /// Every known artifact satisfying `reference`, best first
    fn search(&self, reference: &PackageRef) -> Result<Vec<PackageArtifact>>;
}

impl CandidateSource for Repositories {
    fn search(&self, reference: &PackageRef) -> Result<Vec<PackageArtifact>> {
        Repositories::search(self, reference)
    }
}

/// A fixed in-memory set of candidates
#[derive(Debug, Clone, Default)]
pub struct Universe {
    artifacts: Vec<PackageArtifact>,
}

impl Universe {
    pub fn new(artifacts: Vec<PackageArtifact>) -> Self {
        Self { artifacts }
    }

    pub fn from_packages(packages: Vec<Package>) -> Self {
        Self::new(packages.into_iter().map(PackageArtifact::new).collect())
    }

    pub fn push(&mut self, artifact: PackageArtifact) {
        self.artifacts.push(artifact);
    }
}

impl CandidateSource for Universe {
    fn search(&self, reference: &PackageRef) -> Result<Vec<PackageArtifact>> {
        let mut found: Vec<PackageArtifact> = self
            .artifacts
            .iter()
            .filter(|a| a.runtime.satisfies(reference))
            .cloned()
            .collect();
        sort_candidates(&mut found);
        Ok(found)
    }
}

/// Solver settings
#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub strategy: SolverStrategy,
    /// Upper bound on concurrent per-package tasks
    pub concurrency: usize,
    pub relax: RelaxOptions,
    /// Resolve only the requested packages, not their requirements
    pub no_deps: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SolverOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strategy: config.solver.strategy,
            concurrency: config.general.concurrency.max(1),
            relax: RelaxOptions::from_config(&config.solver),
            no_deps: false,
        }
    }

    pub fn with_no_deps(mut self, no_deps: bool) -> Self {
        self.no_deps = no_deps;
        self
    }

    pub fn with_strategy(mut self, strategy: SolverStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Outcome of [`Solver::install`]
#[derive(Debug, Clone, Default)]
pub struct InstallResult {
    pub to_install: ArtifactsPack,
    /// Installed versions replaced by something in `to_install`
    pub to_remove: ArtifactsPack,
}

impl InstallResult {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }
}

pub struct Solver<'a> {
    db: &'a dyn PackageDatabase,
    source: &'a dyn CandidateSource,
    options: SolverOptions,
    relaxer: Box<dyn Relaxer + Send + Sync>,
}

impl<'a> Solver<'a> {
    pub fn new(
        db: &'a dyn PackageDatabase,
        source: &'a dyn CandidateSource,
        options: SolverOptions,
    ) -> Self {
        Self {
            db,
            source,
            options,
            relaxer: Box::new(IterativeRelaxer),
        }
    }

    /// Replace the fallback used when the SAT strategy finds no model
    pub fn with_relaxer(mut self, relaxer: Box<dyn Relaxer + Send + Sync>) -> Self {
        self.relaxer = relaxer;
        self
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Resolve `wanted` against the installed world
    ///
    /// A reference already satisfied by the installed world is left alone.
    /// When a wanted package is already installed at another version, the
    /// installed one is returned in `to_remove`.
    pub fn install(&self, wanted: &[PackageRef]) -> Result<InstallResult> {
        let world = self.db.world()?;
        let pending: Vec<PackageRef> = wanted
            .iter()
            .filter(|w| {
                let satisfied = world.iter().any(|p| p.satisfies(w));
                if satisfied {
                    debug!("{} is satisfied by the installed world", w);
                }
                !satisfied
            })
            .cloned()
            .collect();

        if pending.is_empty() {
            return Ok(InstallResult::default());
        }

        let (queue, evicted) = match (self.options.no_deps, self.options.strategy) {
            (true, _) => (self.install_no_deps(&pending, world.clone())?, Vec::new()),
            (false, SolverStrategy::Greedy) => {
                let mut resolution = Resolution::new(self.source, world.clone());
                for want in &pending {
                    if resolution.queue_satisfies(want) {
                        continue;
                    }
                    resolution.resolve(want, &Visited::root())?;
                }
                (resolution.into_queue(), Vec::new())
            }
            (false, SolverStrategy::Sat) => self.install_sat(&pending, &world)?,
        };

        let to_remove: ArtifactsPack = world
            .iter()
            .filter(|installed| {
                evicted.iter().any(|e: &Package| e.same_as(installed))
                    || queue.iter().any(|q| {
                        q.runtime.same_identity(installed) && !q.runtime.same_as(installed)
                    })
            })
            .cloned()
            .map(PackageArtifact::new)
            .collect();
        let to_install: ArtifactsPack = queue.into_iter().collect();

        info!(
            "Resolved {} package(s) to install, {} to replace",
            to_install.len(),
            to_remove.len()
        );
        Ok(InstallResult {
            to_install,
            to_remove,
        })
    }

    fn install_no_deps(&self, wanted: &[PackageRef], world: Vec<Package>) -> Result<Vec<PackageArtifact>> {
        let mut resolution = Resolution::new(self.source, world);
        let mut selected: Vec<PackageArtifact> = Vec::new();
        for want in wanted {
            if selected.iter().any(|s| s.runtime.satisfies(want)) {
                continue;
            }
            let found = resolution
                .candidates_for(want)?
                .into_iter()
                .find(|c| {
                    resolution.check_installed(&c.runtime).is_ok()
                        && selected.iter().all(|s| {
                            !s.runtime.same_identity(&c.runtime)
                                && !s.runtime.conflicts_with(&c.runtime)
                        })
                })
                .ok_or_else(|| Error::Unsatisfiable {
                    package: want.identity().to_string(),
                })?;
            selected.push(found);
        }
        Ok(selected)
    }

    /// Returns the artifacts to install and the installed packages the
    /// selection lets go
    fn install_sat(
        &self,
        wanted: &[PackageRef],
        world: &[Package],
    ) -> Result<(Vec<PackageArtifact>, Vec<Package>)> {
        let artifacts = self.gather_universe(wanted)?;
        let universe: Vec<Package> = artifacts.iter().map(|a| a.runtime.clone()).collect();

        let selected = sat::solve(
            &universe,
            world,
            wanted,
            self.relaxer.as_ref(),
            self.options.relax,
        )?;

        // Relaxation may only let installed packages go, never a request
        let dropped: Vec<String> = wanted
            .iter()
            .filter(|w| !selected.iter().any(|p| p.satisfies(w)))
            .map(|w| w.to_string())
            .collect();
        if !dropped.is_empty() {
            return Err(Error::ConflictError(format!(
                "cannot install {} together with the rest of the request",
                dropped.join(", ")
            )));
        }

        let evicted: Vec<Package> = world
            .iter()
            .filter(|w| !selected.iter().any(|s| s.same_as(w)))
            .cloned()
            .collect();
        for pkg in &evicted {
            warn!("{} has to go to satisfy the request", pkg);
        }

        let queue = selected
            .iter()
            .filter(|pkg| !world.iter().any(|w| w.same_as(pkg)))
            .filter_map(|pkg| artifacts.iter().find(|a| a.runtime.same_as(pkg)).cloned())
            .collect();
        Ok((queue, evicted))
    }

    /// Every candidate reachable from `wanted` through requirements
    fn gather_universe(&self, wanted: &[PackageRef]) -> Result<Vec<PackageArtifact>> {
        let mut seen: HashSet<Identity> = HashSet::new();
        let mut queue: VecDeque<Identity> = wanted.iter().map(|w| w.identity().clone()).collect();
        let mut artifacts: Vec<PackageArtifact> = Vec::new();

        while let Some(identity) = queue.pop_front() {
            if !seen.insert(identity.clone()) {
                continue;
            }
            for artifact in self.source.search(&PackageRef::any(identity))? {
                if artifacts.iter().any(|a| a.runtime.same_as(&artifact.runtime)) {
                    continue;
                }
                queue.extend(
                    artifact
                        .runtime
                        .requires
                        .iter()
                        .map(|r| r.identity().clone()),
                );
                artifacts.push(artifact);
            }
        }
        debug!("SAT universe holds {} candidate(s)", artifacts.len());
        Ok(artifacts)
    }

    /// Installed packages that cannot coexist with `pkg`
    pub fn conflicts_with(&self, pkg: &Package) -> Result<Vec<Package>> {
        Ok(self
            .db
            .world()?
            .into_iter()
            .filter(|installed| !installed.same_identity(pkg) && installed.conflicts_with(pkg))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::MemoryDatabase;

    pub(crate) fn pkg(s: &str) -> Package {
        Package::parse(s).unwrap()
    }

    pub(crate) fn r(s: &str) -> PackageRef {
        PackageRef::parse(s).unwrap()
    }

    pub(crate) fn db_with(installed: &[Package]) -> MemoryDatabase {
        let db = MemoryDatabase::new();
        for p in installed {
            db.create_package(p).unwrap();
        }
        db
    }

    pub(crate) fn names(pack: &ArtifactsPack) -> Vec<String> {
        let mut names: Vec<String> = pack.iter().map(|a| a.runtime.fingerprint()).collect();
        names.sort();
        names
    }

    fn both_strategies() -> [SolverOptions; 2] {
        [
            SolverOptions::default().with_strategy(SolverStrategy::Greedy),
            SolverOptions::default().with_strategy(SolverStrategy::Sat),
        ]
    }

    #[test]
    fn test_install_resolves_dependencies() {
        let universe = Universe::from_packages(vec![
            pkg("app/foo@1.0").with_requires(vec![r("lib/bar>=1.0")]),
            pkg("lib/bar@1.0"),
            pkg("lib/bar@2.0"),
        ]);
        let db = db_with(&[]);
        for options in both_strategies() {
            let solver = Solver::new(&db, &universe, options);
            let result = solver.install(&[r("app/foo")]).unwrap();
            assert_eq!(names(&result.to_install), vec!["app/foo@1.0", "lib/bar@2.0"]);
            assert!(result.to_remove.is_empty());
        }
    }

    #[test]
    fn test_install_unsatisfiable_names_dependency() {
        let universe = Universe::from_packages(vec![
            pkg("pkg/x@1.0").with_requires(vec![r("pkg/y>=2.0")]),
            pkg("pkg/y@1.0"),
        ]);
        let db = db_with(&[]);
        for options in both_strategies() {
            let solver = Solver::new(&db, &universe, options);
            let err = solver.install(&[r("pkg/x")]).unwrap_err();
            assert!(
                matches!(err, Error::Unsatisfiable { ref package } if package == "pkg/y"),
                "unexpected {:?}",
                err
            );
        }
    }

    #[test]
    fn test_install_already_installed_is_noop() {
        let universe = Universe::from_packages(vec![pkg("app/foo@1.0")]);
        let db = db_with(&[pkg("app/foo@1.0")]);
        let solver = Solver::new(&db, &universe, SolverOptions::default());
        assert!(solver.install(&[r("app/foo@1.0")]).unwrap().is_empty());
    }

    #[test]
    fn test_install_other_version_replaces_installed() {
        let universe = Universe::from_packages(vec![pkg("lib/bar@1.0"), pkg("lib/bar@2.0")]);
        let db = db_with(&[pkg("lib/bar@1.0")]);
        for options in both_strategies() {
            let solver = Solver::new(&db, &universe, options);
            let result = solver.install(&[r("lib/bar@2.0")]).unwrap();
            assert_eq!(names(&result.to_install), vec!["lib/bar@2.0"]);
            assert_eq!(names(&result.to_remove), vec!["lib/bar@1.0"]);
        }
    }

    #[test]
    fn test_install_conflicting_pair_fails() {
        let universe = Universe::from_packages(vec![
            pkg("app/a@1.0").with_conflicts(vec![r("app/b")]),
            pkg("app/b@1.0"),
        ]);
        let db = db_with(&[]);
        for options in both_strategies() {
            let solver = Solver::new(&db, &universe, options);
            assert!(solver.install(&[r("app/a"), r("app/b")]).is_err());
            // Declared on one side only, still symmetric
            assert!(solver.install(&[r("app/b"), r("app/a")]).is_err());
        }
    }

    #[test]
    fn test_install_no_deps_skips_requirements() {
        let universe = Universe::from_packages(vec![
            pkg("app/foo@1.0").with_requires(vec![r("lib/missing")]),
        ]);
        let db = db_with(&[]);
        let solver = Solver::new(&db, &universe, SolverOptions::default().with_no_deps(true));
        let result = solver.install(&[r("app/foo")]).unwrap();
        assert_eq!(names(&result.to_install), vec!["app/foo@1.0"]);
        // The artifact keeps its real definition
        assert_eq!(result.to_install.as_slice()[0].runtime.requires.len(), 1);
    }

    #[test]
    fn test_conflicts_with_installed() {
        let universe = Universe::default();
        let db = db_with(&[pkg("app/old@1.0").with_conflicts(vec![r("app/new")]), pkg("app/x@1.0")]);
        let solver = Solver::new(&db, &universe, SolverOptions::default());
        let found = solver.conflicts_with(&pkg("app/new@2.0")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fingerprint(), "app/old@1.0");
    }
}
