// src/resolver/upgrade.rs

//! Upgrade analysis over the whole installed world

use super::candidates::Resolution;
use super::{CandidateSource, Solver};
use crate::concurrency::{BoundedPool, aggregate};
use crate::error::{Error, Result};
use crate::package::{Package, PackageRef};
use crate::repository::{ArtifactsPack, PackageArtifact};
use std::cmp::Ordering;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOptions {
    /// Verify that the world after the upgrade has no broken requirement or conflict
    pub universe_check: bool,
}

/// Outcome of [`Solver::upgrade`]
#[derive(Debug, Clone, Default)]
pub struct UpgradeResult {
    /// Installed versions going away
    pub to_remove: ArtifactsPack,
    /// New versions of installed identities
    pub to_update: ArtifactsPack,
    /// Packages new to the world, pulled in by updates
    pub to_install: ArtifactsPack,
}

impl UpgradeResult {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_update.is_empty() && self.to_install.is_empty()
    }
}

/// Newer versions, or same-version respins, of an installed package
fn upgrade_candidates(source: &dyn CandidateSource, installed: &Package) -> Result<Vec<PackageArtifact>> {
    let hash = installed.definition_hash();
    Ok(source
        .search(&PackageRef::any(installed.identity()))?
        .into_iter()
        .filter(|a| a.runtime.same_identity(installed))
        .filter(|a| match a.runtime.version.cmp(&installed.version) {
            Ordering::Greater => true,
            Ordering::Equal => a.runtime.definition_hash() != hash,
            Ordering::Less => false,
        })
        .collect())
}

impl Solver<'_> {
    /// Find updates for every installed package
    ///
    /// Candidates are gathered with bounded concurrency, one task per
    /// installed package; any failure fails the whole analysis. Each
    /// installed package then gets the best candidate that stays admissible
    /// to the rest of the world. No applicable upgrade is not an error.
    pub fn upgrade(&self, opts: UpgradeOptions) -> Result<UpgradeResult> {
        let world = self.db.world()?;
        let pool = BoundedPool::new(self.options.concurrency)?;
        let source = self.source;

        let gathered = aggregate(pool.map(world.clone(), |installed| {
            let candidates = upgrade_candidates(source, &installed)
                .map_err(|e| Error::DownloadError(format!("{}: {}", installed, e)))?;
            Ok((installed, candidates))
        }))?;

        let mut resolution = Resolution::new(self.source, world.clone());
        let mut pending: Vec<(Package, Vec<PackageArtifact>)> = gathered
            .into_iter()
            .filter(|(_, candidates)| !candidates.is_empty())
            .collect();
        pending.sort_by_key(|(installed, _)| installed.fingerprint());

        for (installed, _) in &pending {
            resolution.replace(installed.identity());
        }

        for (installed, mut candidates) in pending {
            candidates.sort_by(|a, b| {
                b.runtime
                    .version
                    .cmp(&a.runtime.version)
                    .then_with(|| {
                        resolution
                            .unresolved_requires(&a.runtime)
                            .cmp(&resolution.unresolved_requires(&b.runtime))
                    })
                    .then_with(|| a.priority.cmp(&b.priority))
                    .then_with(|| a.runtime.name.cmp(&b.runtime.name))
            });

            let mut upgraded = false;
            for candidate in candidates {
                let fingerprint = candidate.runtime.fingerprint();
                if resolution.try_select(candidate)? {
                    debug!("Upgrade {} -> {}", installed, fingerprint);
                    upgraded = true;
                    break;
                }
            }
            if !upgraded {
                debug!("No admissible upgrade for {}", installed);
                resolution.unreplace(&installed.identity());
            }
        }

        let queue = resolution.into_queue();
        let mut result = UpgradeResult::default();
        for artifact in queue {
            match world.iter().find(|w| w.same_identity(&artifact.runtime)) {
                // A dependency of another update settled on the installed copy
                Some(old)
                    if old.same_as(&artifact.runtime)
                        && old.definition_hash() == artifact.runtime.definition_hash() =>
                {
                    debug!("{} stays as installed", old);
                }
                Some(old) => {
                    result.to_remove.push(PackageArtifact::new(old.clone()));
                    result.to_update.push(artifact);
                }
                None => result.to_install.push(artifact),
            }
        }

        if opts.universe_check {
            check_universe(&world, &result)?;
        }

        info!(
            "Upgrade: {} update(s), {} new, {} removal(s)",
            result.to_update.len(),
            result.to_install.len(),
            result.to_remove.len()
        );
        Ok(result)
    }
}

/// Fail if the world after applying `result` is inconsistent
fn check_universe(world: &[Package], result: &UpgradeResult) -> Result<()> {
    let mut after: Vec<Package> = world
        .iter()
        .filter(|p| !result.to_remove.contains(p))
        .cloned()
        .collect();
    after.extend(result.to_update.packages());
    after.extend(result.to_install.packages());

    let mut problems = Vec::new();
    for pkg in &after {
        for req in &pkg.requires {
            if !after.iter().any(|p| !p.same_as(pkg) && p.satisfies(req)) {
                problems.push(format!("{} requires {}", pkg, req));
            }
        }
        for other in &after {
            if pkg.fingerprint() < other.fingerprint() && pkg.conflicts_with(other) {
                problems.push(format!("{} conflicts with {}", pkg, other));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::ConflictError(format!(
            "upgraded world is inconsistent: {}",
            problems.join("; ")
        )))
    }
}
