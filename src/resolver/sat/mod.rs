// src/resolver/sat/mod.rs

//! Global-consistency resolution
//!
//! The universe of candidate packages is encoded twice: once as an explicit
//! CNF [`Formula`] (used to check models and to relax), once through a
//! resolvo [`SatProvider`](provider::SatProvider) that does the actual
//! search. A resolvo model is accepted only if the formula evaluates to true
//! under it. When either step fails, the [`Relaxer`] is asked for a model of
//! a relaxed formula.

pub mod formula;
pub mod provider;
pub mod relax;

pub use formula::{Assignment, Clause, ClauseKind, Formula, Literal, build_formula};
pub use relax::{IterativeRelaxer, RelaxOptions, Relaxer, SolverState};

use crate::error::{Error, Result};
use crate::package::{Package, PackageRef};
use provider::SatProvider;
use resolvo::{ConditionalRequirement, Problem, Solver, UnsolvableOrCancelled};
use tracing::{debug, warn};

/// Select the packages making up a consistent world
///
/// The result includes the installed packages that stay. Installed packages
/// missing from it must be removed.
pub fn solve(
    universe: &[Package],
    installed: &[Package],
    wanted: &[PackageRef],
    relaxer: &dyn Relaxer,
    options: RelaxOptions,
) -> Result<Vec<Package>> {
    let formula = build_formula(universe, installed, wanted)?;
    debug!(
        "SAT formula: {} variable(s), {} clause(s)",
        formula.variables().len(),
        formula.clauses().len()
    );

    let provider = SatProvider::new(formula.variables());
    let mut requirements: Vec<ConditionalRequirement> =
        wanted.iter().map(|w| provider.requirement(w)).collect();
    requirements.extend(installed.iter().map(|pkg| provider.requirement(&pkg.to_ref())));

    let mut solver = Solver::new(provider);
    let reason = match solver.solve(Problem::new().requirements(requirements)) {
        Ok(ids) => {
            let selected: Vec<Package> = ids
                .into_iter()
                .filter_map(|id| solver.provider().package(id).cloned())
                .collect();
            let assignment =
                Assignment::from_vars(selected.iter().filter_map(|p| formula.var_of(p)));
            if formula.evaluate(&assignment) {
                return Ok(formula.decode(&assignment));
            }
            let broken = formula.unsatisfied(&assignment);
            warn!(
                "Solver model violates {} clause(s), falling back to relaxation",
                broken.len()
            );
            format!("model violates {} clause(s)", broken.len())
        }
        Err(UnsolvableOrCancelled::Unsolvable(conflict)) => {
            conflict.display_user_friendly(&solver).to_string()
        }
        Err(UnsolvableOrCancelled::Cancelled(_)) => {
            return Err(Error::Cancelled("dependency resolution cancelled".to_string()));
        }
    };
    debug!("Strict solve failed: {}", reason);

    let state = SolverState { options, reason };
    match relaxer.propose(&formula, &state) {
        Some(assignment) => {
            let selected = formula.decode(&assignment);
            for want in wanted {
                if !selected.iter().any(|p| p.satisfies(want)) {
                    warn!("Dropped {} to reach a consistent selection", want);
                }
            }
            Ok(selected)
        }
        None => {
            warn!("{}", state.reason);
            Err(Error::Unsatisfiable {
                package: blocking_identity(&formula, wanted),
            })
        }
    }
}

/// Best guess at which identity made the request unsatisfiable
///
/// The first requirement of a wanted candidate (or its dependencies) that no
/// package in the universe satisfies; otherwise the first wanted identity.
fn blocking_identity(formula: &Formula, wanted: &[PackageRef]) -> String {
    let mut stack: Vec<usize> = wanted.iter().flat_map(|w| formula.matching(w)).collect();
    let mut seen = std::collections::HashSet::new();

    while let Some(var) = stack.pop() {
        if !seen.insert(var) {
            continue;
        }
        let Some(pkg) = formula.package(var) else {
            continue;
        };
        for req in &pkg.requires {
            let matches = formula.matching(req);
            if matches.is_empty() {
                return req.identity().to_string();
            }
            stack.extend(matches);
        }
    }

    wanted
        .first()
        .map(|w| w.identity().to_string())
        .unwrap_or_default()
}
