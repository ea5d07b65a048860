// src/resolver/sat/relax.rs

//! Fallback when the formula has no model
//!
//! A [`Relaxer`] is handed the unsatisfiable formula and proposes an
//! assignment that satisfies a relaxed version of it, or gives up.

use super::formula::{Assignment, ClauseKind, Formula};
use crate::config::SolverConfig;
use std::collections::HashSet;
use tracing::debug;

/// Tuning of the iterative relaxation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxOptions {
    pub attempts: usize,
    /// Added to a clause's weight every time dropping it did not help
    pub rate: f64,
    /// Multiplies every weight between attempts
    pub discount: f64,
}

impl Default for RelaxOptions {
    fn default() -> Self {
        Self::from_config(&SolverConfig::default())
    }
}

impl RelaxOptions {
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            attempts: config.relax_attempts,
            rate: config.relax_rate,
            discount: config.relax_discount,
        }
    }
}

/// What the strict solve left behind
#[derive(Debug, Clone, Default)]
pub struct SolverState {
    pub options: RelaxOptions,
    /// Human readable reason the strict solve failed
    pub reason: String,
}

pub trait Relaxer {
    /// Propose an assignment for a relaxed `formula`, or `None` to give up
    fn propose(&self, formula: &Formula, state: &SolverState) -> Option<Assignment>;
}

/// Drops soft clauses, cheapest first, until a model appears
///
/// Installed pins start cheaper than wanted packages, so the user's request
/// survives as long as some installed package can be let go instead. At
/// least one wanted clause is always kept. Every
/// failed attempt makes the clauses it dropped more expensive, steering the
/// next attempt towards a different subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterativeRelaxer;

const INSTALLED_WEIGHT: f64 = 1.0;
const WANTED_WEIGHT: f64 = 2.0;

impl Relaxer for IterativeRelaxer {
    fn propose(&self, formula: &Formula, state: &SolverState) -> Option<Assignment> {
        let options = state.options;
        let mut weights: Vec<(usize, f64)> = formula
            .clauses()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_soft())
            .map(|(i, c)| {
                let weight = match c.kind {
                    ClauseKind::Installed => INSTALLED_WEIGHT,
                    _ => WANTED_WEIGHT,
                };
                (i, weight)
            })
            .collect();

        if weights.is_empty() {
            return None;
        }

        let wanted: Vec<usize> = formula
            .clauses()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ClauseKind::Wanted)
            .map(|(i, _)| i)
            .collect();

        let mut tried: HashSet<Vec<usize>> = HashSet::new();
        for attempt in 0..options.attempts {
            weights.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

            let size = (attempt % weights.len()) + 1;
            let mut dropped_list: Vec<usize> = weights[..size].iter().map(|(i, _)| *i).collect();
            dropped_list.sort_unstable();
            // Dropping the whole request trivially "succeeds"
            let drops_request =
                !wanted.is_empty() && wanted.iter().all(|w| dropped_list.contains(w));
            if drops_request || !tried.insert(dropped_list.clone()) {
                // Already explored this subset, perturb and move on
                for (_, w) in weights.iter_mut().take(size) {
                    *w += options.rate;
                }
                continue;
            }

            let dropped: HashSet<usize> = dropped_list.iter().copied().collect();
            if let Some(model) = formula.search(&dropped)
                && formula.evaluate_relaxed(&model, &dropped)
            {
                debug!(
                    "Relaxation found a model after {} attempt(s), dropping {} clause(s)",
                    attempt + 1,
                    dropped.len()
                );
                return Some(model);
            }

            for (index, w) in weights.iter_mut() {
                *w *= options.discount;
                if dropped.contains(index) {
                    *w += options.rate;
                }
            }
        }

        debug!(
            "Relaxation gave up after {} attempt(s): {}",
            options.attempts, state.reason
        );
        None
    }
}
