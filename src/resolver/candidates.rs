// src/resolver/candidates.rs

//! Greedy candidate resolution
//!
//! A [`Resolution`] lives for one solver call. It holds the installed world,
//! a lazily filled per-identity candidate cache and the queue of selected
//! artifacts. [`Resolution::resolve`] walks the candidates of a reference
//! newest first and keeps the first one that is admissible against the
//! installed world and the queue and whose requirements resolve in turn.

use super::CandidateSource;
use crate::error::{Error, Result};
use crate::package::{Identity, Package, PackageRef};
use crate::repository::PackageArtifact;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Identities currently being resolved on this branch of the recursion
///
/// Each level borrows its parent, so sibling branches never see each
/// other's entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Visited<'a> {
    name: Option<&'a Identity>,
    parent: Option<&'a Visited<'a>>,
}

impl<'a> Visited<'a> {
    pub fn root() -> Self {
        Self::default()
    }

    /// This set plus `name`
    pub fn with(&'a self, name: &'a Identity) -> Visited<'a> {
        Visited {
            name: Some(name),
            parent: Some(self),
        }
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        let mut current = Some(self);
        while let Some(level) = current {
            if level.name == Some(identity) {
                return true;
            }
            current = level.parent;
        }
        false
    }
}

/// Scratch state of one resolution call
pub struct Resolution<'s> {
    source: &'s dyn CandidateSource,
    installed: Vec<Package>,
    /// Installed identities whose current version is going away
    replacing: HashSet<Identity>,
    candidates: HashMap<Identity, Vec<PackageArtifact>>,
    queue: Vec<PackageArtifact>,
    /// Provided reference -> index of the queued artifact providing it
    provides: Vec<(PackageRef, usize)>,
    /// Candidates proven inadmissible against the installed world
    banned: HashSet<String>,
}

impl<'s> Resolution<'s> {
    pub fn new(source: &'s dyn CandidateSource, installed: Vec<Package>) -> Self {
        Self {
            source,
            installed,
            replacing: HashSet::new(),
            candidates: HashMap::new(),
            queue: Vec::new(),
            provides: Vec::new(),
            banned: HashSet::new(),
        }
    }

    /// Treat the installed version of `identity` as already removed
    pub fn replace(&mut self, identity: Identity) {
        self.replacing.insert(identity);
    }

    pub fn unreplace(&mut self, identity: &Identity) {
        self.replacing.remove(identity);
    }

    pub fn installed(&self) -> &[Package] {
        &self.installed
    }

    pub fn queue(&self) -> &[PackageArtifact] {
        &self.queue
    }

    pub fn into_queue(self) -> Vec<PackageArtifact> {
        self.queue
    }

    fn is_replaced(&self, pkg: &Package) -> bool {
        self.replacing.contains(&pkg.identity())
            || self
                .queue
                .iter()
                .any(|q| q.runtime.same_identity(pkg) && !q.runtime.same_as(pkg))
    }

    /// Installed packages that stay
    fn kept(&self) -> impl Iterator<Item = &Package> {
        self.installed.iter().filter(|p| !self.is_replaced(p))
    }

    pub fn installed_satisfies(&self, reference: &PackageRef) -> bool {
        self.kept().any(|p| p.satisfies(reference))
    }

    pub fn queue_satisfies(&self, reference: &PackageRef) -> bool {
        self.queue.iter().any(|q| reference.matches(&q.runtime))
            || self.provides.iter().any(|(provided, index)| {
                provided.identity() == reference.identity()
                    && self.queue.get(*index).is_some_and(|q| q.runtime.satisfies(reference))
            })
    }

    /// Candidates satisfying `reference`, best first
    ///
    /// The source is queried once per identity; later references to the same
    /// identity are answered from the cache.
    pub fn candidates_for(&mut self, reference: &PackageRef) -> Result<Vec<PackageArtifact>> {
        let identity = reference.identity().clone();
        if !self.candidates.contains_key(&identity) {
            let found = self.source.search(&PackageRef::any(identity.clone()))?;
            trace!("{} candidate(s) for {}", found.len(), identity);
            self.candidates.insert(identity.clone(), found);
        }
        Ok(self
            .candidates
            .get(&identity)
            .map(|all| {
                all.iter()
                    .filter(|a| a.runtime.satisfies(reference))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Admission against the installed world
    ///
    /// No kept installed package may conflict with the candidate, and every
    /// kept installed package requiring its identity must still accept it.
    pub fn check_installed(&self, candidate: &Package) -> Result<()> {
        for installed in self.kept().filter(|p| !p.same_identity(candidate)) {
            if installed.conflicts_with(candidate) {
                return Err(Error::ConflictError(format!(
                    "{} conflicts with installed {}",
                    candidate, installed
                )));
            }
            if let Some(req) = installed
                .requires
                .iter()
                .find(|r| r.identity() == &candidate.identity() && !candidate.satisfies(r))
            {
                return Err(Error::ConflictError(format!(
                    "{} does not satisfy {} required by installed {}",
                    candidate, req, installed
                )));
            }
        }
        Ok(())
    }

    /// Pairwise admission against the queue
    pub fn admitted_by_queue(&self, candidate: &Package) -> bool {
        self.queue.iter().all(|q| {
            let queued = &q.runtime;
            !queued.same_identity(candidate)
                && !queued.conflicts_with(candidate)
                && queued
                    .requires
                    .iter()
                    .filter(|r| r.identity() == &candidate.identity())
                    .all(|r| candidate.satisfies(r))
        })
    }

    fn push(&mut self, artifact: PackageArtifact) {
        let index = self.queue.len();
        for provided in &artifact.runtime.provides {
            self.provides.push((provided.clone(), index));
        }
        self.queue.push(artifact);
    }

    fn rollback(&mut self, checkpoint: usize) {
        self.queue.truncate(checkpoint);
        self.provides.retain(|(_, index)| *index < checkpoint);
    }

    /// Select a candidate for `reference` and, recursively, its requirements
    pub fn resolve(&mut self, reference: &PackageRef, visited: &Visited<'_>) -> Result<()> {
        let candidates = self.candidates_for(reference)?;
        let mut last_error = None;

        for candidate in candidates {
            let fingerprint = candidate.runtime.fingerprint();
            if self.banned.contains(&fingerprint) {
                continue;
            }
            if let Err(e) = self.check_installed(&candidate.runtime) {
                debug!("Banning {}: {}", fingerprint, e);
                self.banned.insert(fingerprint);
                continue;
            }
            if !self.admitted_by_queue(&candidate.runtime) {
                trace!("{} not admitted by the queue", fingerprint);
                continue;
            }

            let checkpoint = self.queue.len();
            let runtime = candidate.runtime.clone();
            self.push(candidate);

            let identity = runtime.identity();
            let here = visited.with(&identity);
            match self.resolve_requires(&runtime, &here) {
                Ok(()) => {
                    debug!("Selected {} for {}", fingerprint, reference);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Rejecting {}: {}", fingerprint, e);
                    self.rollback(checkpoint);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Unsatisfiable {
            package: reference.identity().to_string(),
        }))
    }

    /// Make sure every requirement of an already queued package holds
    pub fn resolve_requires(&mut self, pkg: &Package, visited: &Visited<'_>) -> Result<()> {
        for req in &pkg.requires {
            if self.installed_satisfies(req) || self.queue_satisfies(req) {
                continue;
            }
            if self
                .queue
                .iter()
                .any(|q| q.runtime.identity() == *req.identity())
            {
                // The queued version of this identity does not fit
                return Err(Error::Unsatisfiable {
                    package: req.identity().to_string(),
                });
            }
            if visited.contains(req.identity()) {
                // In progress higher up this branch, assume satisfiable
                continue;
            }
            self.resolve(req, visited)?;
        }
        Ok(())
    }

    /// Requirements of `pkg` that neither the installed world nor the queue satisfy
    pub fn unresolved_requires(&self, pkg: &Package) -> usize {
        pkg.requires
            .iter()
            .filter(|r| !self.installed_satisfies(r) && !self.queue_satisfies(r))
            .count()
    }

    /// Queue an artifact chosen by the caller after vetting it
    ///
    /// Returns false and leaves the queue untouched when it is not admissible.
    pub fn try_select(&mut self, candidate: PackageArtifact) -> Result<bool> {
        if self.check_installed(&candidate.runtime).is_err()
            || !self.admitted_by_queue(&candidate.runtime)
        {
            return Ok(false);
        }
        let checkpoint = self.queue.len();
        let runtime = candidate.runtime.clone();
        self.push(candidate);

        let identity = runtime.identity();
        let root = Visited::root();
        let here = root.with(&identity);
        match self.resolve_requires(&runtime, &here) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("Rejecting {}: {}", runtime, e);
                self.rollback(checkpoint);
                Ok(false)
            }
        }
    }
}
