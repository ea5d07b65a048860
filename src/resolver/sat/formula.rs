// src/resolver/sat/formula.rs

//! Boolean formula over concrete packages
//!
//! One variable per concrete package. Clauses, in conjunctive normal form:
//!
//! | relation | clause |
//! |---|---|
//! | A requires selector matching B1..Bn | `¬A ∨ B1 ∨ … ∨ Bn`, plus `¬Bi ∨ ¬Bj` across providers of different identities |
//! | A conflicts with B | `¬A ∨ ¬B` |
//! | A, B same identity | `¬A ∨ ¬B` |
//! | wanted W matching W1..Wn | `W1 ∨ … ∨ Wn` |
//! | installed I | `I` |
//!
//! The formula is kept explicit so a model produced by any solver can be
//! checked with [`Formula::evaluate`], and so the relaxation fallback can
//! drop clauses and search again.

use crate::error::{Error, Result};
use crate::package::{Package, PackageRef};
use std::collections::{BTreeSet, HashMap, HashSet};

pub type Var = usize;

/// Upper bound on decisions made by [`Formula::search`]
const SEARCH_BUDGET: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Literal {
    pub var: Var,
    pub positive: bool,
}

impl Literal {
    pub fn pos(var: Var) -> Self {
        Self {
            var,
            positive: true,
        }
    }

    pub fn neg(var: Var) -> Self {
        Self {
            var,
            positive: false,
        }
    }

    pub fn holds(&self, assignment: &Assignment) -> bool {
        assignment.is_true(self.var) == self.positive
    }
}

/// Which relation a clause encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    Requires,
    Conflicts,
    SameIdentity,
    Provider,
    Wanted,
    Installed,
}

impl ClauseKind {
    /// Clauses the relaxation fallback may drop
    pub fn is_soft(&self) -> bool {
        matches!(self, ClauseKind::Wanted | ClauseKind::Installed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub literals: Vec<Literal>,
}

impl Clause {
    pub fn satisfied(&self, assignment: &Assignment) -> bool {
        self.literals.iter().any(|l| l.holds(assignment))
    }
}

/// The set of variables assigned true; everything else is false
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    selected: BTreeSet<Var>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vars(vars: impl IntoIterator<Item = Var>) -> Self {
        Self {
            selected: vars.into_iter().collect(),
        }
    }

    pub fn set(&mut self, var: Var, value: bool) {
        if value {
            self.selected.insert(var);
        } else {
            self.selected.remove(&var);
        }
    }

    pub fn is_true(&self, var: Var) -> bool {
        self.selected.contains(&var)
    }

    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.selected.iter().copied()
    }
}

/// CNF formula with its variable table
#[derive(Debug, Clone, Default)]
pub struct Formula {
    vars: Vec<Package>,
    index: HashMap<String, Var>,
    clauses: Vec<Clause>,
    installed: Vec<Var>,
}

impl Formula {
    pub fn variables(&self) -> &[Package] {
        &self.vars
    }

    pub fn package(&self, var: Var) -> Option<&Package> {
        self.vars.get(var)
    }

    pub fn var_of(&self, pkg: &Package) -> Option<Var> {
        self.index.get(&pkg.fingerprint()).copied()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn installed(&self) -> &[Var] {
        &self.installed
    }

    /// Variables admitted by a reference, newest version first
    pub fn matching(&self, reference: &PackageRef) -> Vec<Var> {
        let mut vars: Vec<Var> = (0..self.vars.len())
            .filter(|&v| self.vars[v].satisfies(reference))
            .collect();
        vars.sort_by(|&a, &b| {
            self.vars[b]
                .version
                .cmp(&self.vars[a].version)
                .then_with(|| a.cmp(&b))
        });
        vars
    }

    fn add_var(&mut self, pkg: &Package) -> Var {
        let key = pkg.fingerprint();
        if let Some(&var) = self.index.get(&key) {
            return var;
        }
        let var = self.vars.len();
        self.vars.push(pkg.clone());
        self.index.insert(key, var);
        var
    }

    fn add_clause(&mut self, kind: ClauseKind, literals: Vec<Literal>) {
        let clause = Clause { kind, literals };
        if !self.clauses.contains(&clause) {
            self.clauses.push(clause);
        }
    }

    /// True when every clause holds
    pub fn evaluate(&self, assignment: &Assignment) -> bool {
        self.clauses.iter().all(|c| c.satisfied(assignment))
    }

    /// Like [`evaluate`](Self::evaluate), ignoring the clauses in `dropped`
    pub fn evaluate_relaxed(&self, assignment: &Assignment, dropped: &HashSet<usize>) -> bool {
        self.clauses
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .all(|(_, c)| c.satisfied(assignment))
    }

    /// Indices of the clauses an assignment violates
    pub fn unsatisfied(&self, assignment: &Assignment) -> Vec<usize> {
        self.clauses
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.satisfied(assignment))
            .map(|(i, _)| i)
            .collect()
    }

    /// Map a model back to the packages it selects
    pub fn decode(&self, assignment: &Assignment) -> Vec<Package> {
        assignment
            .vars()
            .filter_map(|v| self.vars.get(v).cloned())
            .collect()
    }

    /// Search for a model of the formula minus the `dropped` clauses
    ///
    /// Clause-driven backtracking: every variable starts false, and the first
    /// violated clause is repaired by setting one of its positive literals,
    /// trying them in order. Requirement literals are ordered newest first,
    /// so the first model found prefers recent versions and selects nothing
    /// that is not needed.
    pub fn search(&self, dropped: &HashSet<usize>) -> Option<Assignment> {
        let active: Vec<&Clause> = self
            .clauses
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, c)| c)
            .collect();
        let mut budget = SEARCH_BUDGET;
        Self::extend(&active, Assignment::new(), &mut budget)
    }

    fn extend(clauses: &[&Clause], assignment: Assignment, budget: &mut usize) -> Option<Assignment> {
        let Some(violated) = clauses.iter().find(|c| !c.satisfied(&assignment)) else {
            return Some(assignment);
        };
        for literal in violated.literals.iter().filter(|l| l.positive) {
            if assignment.is_true(literal.var) {
                continue;
            }
            if *budget == 0 {
                return None;
            }
            *budget -= 1;

            let mut next = assignment.clone();
            next.set(literal.var, true);
            if let Some(model) = Self::extend(clauses, next, budget) {
                return Some(model);
            }
        }
        None
    }
}

/// Build the formula for installing `wanted` on top of `installed`
///
/// `universe` holds every candidate package reachable from the request.
/// A wanted reference matching no package at all is reported as
/// unsatisfiable right away.
pub fn build_formula(
    universe: &[Package],
    installed: &[Package],
    wanted: &[PackageRef],
) -> Result<Formula> {
    let mut formula = Formula::default();
    for pkg in universe.iter().chain(installed.iter()) {
        formula.add_var(pkg);
    }

    let count = formula.vars.len();
    for a in 0..count {
        let pkg = formula.vars[a].clone();

        for req in &pkg.requires {
            let matches = formula.matching(req);
            let mut literals = vec![Literal::neg(a)];
            literals.extend(matches.iter().map(|&b| Literal::pos(b)));
            formula.add_clause(ClauseKind::Requires, literals);

            for (i, &b) in matches.iter().enumerate() {
                for &c in &matches[i + 1..] {
                    if !formula.vars[b].same_identity(&formula.vars[c]) {
                        formula.add_clause(
                            ClauseKind::Provider,
                            vec![Literal::neg(b.min(c)), Literal::neg(b.max(c))],
                        );
                    }
                }
            }
        }

        for conflict in &pkg.conflicts {
            for b in formula.matching(conflict) {
                if b != a {
                    formula.add_clause(
                        ClauseKind::Conflicts,
                        vec![Literal::neg(a.min(b)), Literal::neg(a.max(b))],
                    );
                }
            }
        }

        for b in (a + 1)..count {
            if formula.vars[a].same_identity(&formula.vars[b]) {
                formula.add_clause(
                    ClauseKind::SameIdentity,
                    vec![Literal::neg(a), Literal::neg(b)],
                );
            }
        }
    }

    for want in wanted {
        let matches = formula.matching(want);
        if matches.is_empty() {
            return Err(Error::Unsatisfiable {
                package: want.identity().to_string(),
            });
        }
        formula.add_clause(
            ClauseKind::Wanted,
            matches.into_iter().map(Literal::pos).collect(),
        );
    }

    for pkg in installed {
        if let Some(var) = formula.var_of(pkg) {
            formula.installed.push(var);
            formula.add_clause(ClauseKind::Installed, vec![Literal::pos(var)]);
        }
    }

    Ok(formula)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(s: &str) -> Package {
        Package::parse(s).unwrap()
    }

    fn r(s: &str) -> PackageRef {
        PackageRef::parse(s).unwrap()
    }

    #[test]
    fn test_requires_and_wanted_clauses() {
        let foo = pkg("app/foo@1.0").with_requires(vec![r("lib/bar>=1.0")]);
        let universe = vec![foo, pkg("lib/bar@1.0"), pkg("lib/bar@2.0")];
        let formula = build_formula(&universe, &[], &[r("app/foo")]).unwrap();

        let kinds: Vec<ClauseKind> = formula.clauses().iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ClauseKind::Requires));
        assert!(kinds.contains(&ClauseKind::SameIdentity));
        assert!(kinds.contains(&ClauseKind::Wanted));

        let model = formula.search(&HashSet::new()).unwrap();
        assert!(formula.evaluate(&model));
        let mut picked: Vec<String> = formula.decode(&model).iter().map(|p| p.fingerprint()).collect();
        picked.sort();
        assert_eq!(picked, vec!["app/foo@1.0", "lib/bar@2.0"]);
    }

    #[test]
    fn test_conflicting_wanted_has_no_model() {
        let a = pkg("app/a@1.0").with_conflicts(vec![r("app/b")]);
        let b = pkg("app/b@1.0");
        let formula = build_formula(&[a, b], &[], &[r("app/a"), r("app/b")]).unwrap();
        assert!(formula.search(&HashSet::new()).is_none());
    }

    #[test]
    fn test_missing_wanted_is_unsatisfiable() {
        let err = build_formula(&[pkg("app/a@1.0")], &[], &[r("app/zzz")]).unwrap_err();
        assert!(matches!(err, Error::Unsatisfiable { ref package } if package == "app/zzz"));
    }

    #[test]
    fn test_requirement_without_candidates_forbids_package() {
        let x = pkg("pkg/x@1.0").with_requires(vec![r("pkg/y>=2.0")]);
        let formula = build_formula(&[x, pkg("pkg/y@1.0")], &[], &[r("pkg/x")]).unwrap();
        assert!(formula.search(&HashSet::new()).is_none());
    }

    #[test]
    fn test_installed_pins_and_unsatisfied_report() {
        let installed = vec![pkg("lib/bar@1.0")];
        let formula = build_formula(&[pkg("lib/bar@2.0")], &installed, &[r("lib/bar>=2.0")]).unwrap();
        // Pin on bar 1.0 and want of bar 2.0 cannot both hold
        assert!(formula.search(&HashSet::new()).is_none());

        let only_new = Assignment::from_vars(formula.matching(&r("lib/bar>=2.0")));
        let broken = formula.unsatisfied(&only_new);
        assert_eq!(broken.len(), 1);
        assert_eq!(formula.clauses()[broken[0]].kind, ClauseKind::Installed);
    }
}
