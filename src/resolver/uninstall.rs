// src/resolver/uninstall.rs

//! Removal analysis: validation of a removal set and reverse dependencies

use super::Solver;
use crate::error::{Error, Result};
use crate::package::{Identity, Package};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Requirements of `remaining` that only the removed packages satisfied
fn broken_requirements(world: &[Package], remaining: &[Package]) -> Vec<String> {
    let mut broken = Vec::new();
    for pkg in remaining {
        for req in &pkg.requires {
            let satisfied_before = world.iter().any(|p| !p.same_as(pkg) && p.satisfies(req));
            let satisfied_after = remaining.iter().any(|p| !p.same_as(pkg) && p.satisfies(req));
            if satisfied_before && !satisfied_after {
                broken.push(format!("{} requires {}", pkg, req));
            }
        }
    }
    broken
}

fn conflicting_pairs(packages: &[Package]) -> Vec<String> {
    let mut pairs = Vec::new();
    for (i, a) in packages.iter().enumerate() {
        for b in &packages[i + 1..] {
            if a.conflicts_with(b) {
                pairs.push(format!("{} conflicts with {}", a, b));
            }
        }
    }
    pairs
}

impl Solver<'_> {
    /// Validate and possibly extend a removal set
    ///
    /// - `full == false`, `check_conflicts == true`: the candidates are
    ///   returned unchanged if no other installed package loses a
    ///   requirement, an error otherwise.
    /// - otherwise the set is closed over the installed world: packages
    ///   left with a requirement only the removal set satisfied join it,
    ///   and with `full` so do dependencies nothing outside the set needs.
    ///   With `check_conflicts` the remaining world is then validated for
    ///   requirements and conflicts.
    pub fn uninstall(
        &self,
        check_conflicts: bool,
        full: bool,
        candidates: &[Package],
    ) -> Result<Vec<Package>> {
        let world = self.db.world()?;
        let removing = |set: &[Package], p: &Package| set.iter().any(|c| c.same_as(p));

        if !full && check_conflicts {
            let remaining: Vec<Package> = world
                .iter()
                .filter(|p| !removing(candidates, p))
                .cloned()
                .collect();
            let broken = broken_requirements(&world, &remaining);
            if !broken.is_empty() {
                return Err(Error::ConflictError(format!(
                    "removal would break installed packages: {}",
                    broken.join("; ")
                )));
            }
            return Ok(candidates.to_vec());
        }

        let mut removal: Vec<Package> = candidates.to_vec();
        loop {
            let mut added = Vec::new();

            // Reachable only through the removal set
            for pkg in world.iter().filter(|p| !removing(&removal, p)) {
                let stranded = pkg.requires.iter().any(|req| {
                    let before = world.iter().any(|p| !p.same_as(pkg) && p.satisfies(req));
                    let after = world
                        .iter()
                        .any(|p| !p.same_as(pkg) && !removing(&removal, p) && p.satisfies(req));
                    before && !after
                });
                if stranded {
                    debug!("{} depends on the removal set", pkg);
                    added.push(pkg.clone());
                }
            }

            if full {
                for pkg in &removal {
                    for req in &pkg.requires {
                        for dep in world.iter().filter(|d| d.satisfies(req)) {
                            if removing(&removal, dep) || removing(&added, dep) {
                                continue;
                            }
                            // Still needed by something that stays
                            let needed = world.iter().any(|user| {
                                !removing(&removal, user)
                                    && !user.same_as(dep)
                                    && user.requires.iter().any(|r| dep.satisfies(r))
                            });
                            if !needed {
                                debug!("{} is only needed by the removal set", dep);
                                added.push(dep.clone());
                            }
                        }
                    }
                }
            }

            if added.is_empty() {
                break;
            }
            for pkg in added {
                if !removing(&removal, &pkg) {
                    removal.push(pkg);
                }
            }
        }

        if check_conflicts {
            let remaining: Vec<Package> = world
                .iter()
                .filter(|p| !removing(&removal, p))
                .cloned()
                .collect();
            let mut problems = broken_requirements(&world, &remaining);
            problems.extend(conflicting_pairs(&remaining));
            if !problems.is_empty() {
                return Err(Error::ConflictError(format!(
                    "remaining world is inconsistent: {}",
                    problems.join("; ")
                )));
            }
        }

        Ok(removal)
    }

    /// Reverse-dependency closure of `roots` in the installed world
    ///
    /// Depth-first from each root; every package is visited once and
    /// returned in visitation order, roots first. A package depends on
    /// another when one of its requirements is satisfied by it, directly or
    /// through `provides`.
    pub fn resolve_runtime(&self, roots: &[Package]) -> Result<Vec<Package>> {
        let world = self.db.world()?;

        // Required identity -> installed packages requiring it
        let mut dependents: HashMap<Identity, Vec<&Package>> = HashMap::new();
        for pkg in &world {
            for req in &pkg.requires {
                dependents.entry(req.identity().clone()).or_default().push(pkg);
            }
        }

        let mut resolved: HashSet<String> = HashSet::new();
        let mut matches = Vec::new();
        for root in roots {
            let root = world.iter().find(|p| p.same_as(root)).unwrap_or(root);
            visit(root, &dependents, &mut resolved, &mut matches);
        }
        Ok(matches)
    }
}

fn visit(
    pkg: &Package,
    dependents: &HashMap<Identity, Vec<&Package>>,
    resolved: &mut HashSet<String>,
    matches: &mut Vec<Package>,
) {
    if !resolved.insert(pkg.fingerprint()) {
        return;
    }
    matches.push(pkg.clone());

    let identities = std::iter::once(pkg.identity())
        .chain(pkg.provides.iter().map(|p| p.identity().clone()));
    let mut next: Vec<&Package> = Vec::new();
    for identity in identities {
        for dependent in dependents.get(&identity).into_iter().flatten() {
            if !dependent.same_as(pkg)
                && dependent.requires.iter().any(|r| pkg.satisfies(r))
                && !next.iter().any(|n| n.same_as(dependent))
            {
                next.push(dependent);
            }
        }
    }
    for dependent in next {
        visit(dependent, dependents, resolved, matches);
    }
}
