// src/resolver/sat/provider.rs

//! resolvo dependency provider over a fixed package universe
//!
//! Every identity is one resolvo name, so at most one version per identity
//! is selected. A requirement whose matches span several identities (through
//! `provides`) becomes a union of one version set per identity. Conflicts
//! are `constrains` entries on negated version sets.

use crate::package::{Identity, Package, PackageRef};
use resolvo::{
    ArenaId, Candidates, Condition, ConditionId, ConditionalRequirement, Dependencies,
    DependencyProvider, HintDependenciesAvailable, Interner, KnownDependencies, NameId,
    Requirement, SolvableId, SolverCache, StringId, VersionSetId, VersionSetUnionId,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VersionSet {
    name: NameId,
    reference: PackageRef,
    /// Selects the packages the reference does NOT match
    negate: bool,
}

pub struct SatProvider {
    names: Vec<Identity>,
    name_ids: RefCell<HashMap<Identity, NameId>>,
    extra_names: RefCell<Vec<Identity>>,
    solvables: Vec<Package>,
    solvable_names: Vec<NameId>,
    candidates: HashMap<NameId, Vec<SolvableId>>,
    version_sets: RefCell<Vec<VersionSet>>,
    version_set_ids: RefCell<HashMap<VersionSet, VersionSetId>>,
    unions: RefCell<Vec<Vec<VersionSetId>>>,
}

impl SatProvider {
    pub fn new(packages: &[Package]) -> Self {
        let mut names = Vec::new();
        let mut name_ids = HashMap::new();
        let mut solvables: Vec<Package> = Vec::new();
        let mut solvable_names = Vec::new();
        let mut candidates: HashMap<NameId, Vec<SolvableId>> = HashMap::new();

        for pkg in packages {
            if solvables.iter().any(|s| s.same_as(pkg)) {
                continue;
            }
            let identity = pkg.identity();
            let name = *name_ids.entry(identity.clone()).or_insert_with(|| {
                names.push(identity);
                NameId::from_usize(names.len() - 1)
            });
            let id = SolvableId::from_usize(solvables.len());
            solvables.push(pkg.clone());
            solvable_names.push(name);
            candidates.entry(name).or_default().push(id);
        }

        Self {
            names,
            name_ids: RefCell::new(name_ids),
            extra_names: RefCell::new(Vec::new()),
            solvables,
            solvable_names,
            candidates,
            version_sets: RefCell::new(Vec::new()),
            version_set_ids: RefCell::new(HashMap::new()),
            unions: RefCell::new(Vec::new()),
        }
    }

    pub fn package(&self, id: SolvableId) -> Option<&Package> {
        self.solvables.get(id.to_usize())
    }

    fn identity(&self, name: NameId) -> Identity {
        let index = name.to_usize();
        if let Some(identity) = self.names.get(index) {
            return identity.clone();
        }
        self.extra_names
            .borrow()
            .get(index - self.names.len())
            .cloned()
            .unwrap_or_else(|| Identity::new("unknown", "unknown"))
    }

    /// Name id for an identity, interning names that have no candidates
    fn name_for(&self, identity: &Identity) -> NameId {
        if let Some(&name) = self.name_ids.borrow().get(identity) {
            return name;
        }
        let mut extra = self.extra_names.borrow_mut();
        extra.push(identity.clone());
        let name = NameId::from_usize(self.names.len() + extra.len() - 1);
        self.name_ids.borrow_mut().insert(identity.clone(), name);
        name
    }

    fn version_set(&self, name: NameId, reference: &PackageRef, negate: bool) -> VersionSetId {
        let set = VersionSet {
            name,
            reference: reference.clone(),
            negate,
        };
        if let Some(&id) = self.version_set_ids.borrow().get(&set) {
            return id;
        }
        let mut sets = self.version_sets.borrow_mut();
        let id = VersionSetId::from_usize(sets.len());
        sets.push(set.clone());
        self.version_set_ids.borrow_mut().insert(set, id);
        id
    }

    /// Names of the identities holding a package that satisfies `reference`
    fn satisfying_names(&self, reference: &PackageRef) -> Vec<NameId> {
        let mut by_name: BTreeMap<usize, NameId> = BTreeMap::new();
        for (index, pkg) in self.solvables.iter().enumerate() {
            if pkg.satisfies(reference) {
                let name = self.solvable_names[index];
                by_name.insert(name.to_usize(), name);
            }
        }
        by_name.into_values().collect()
    }

    /// Requirement for a reference, a union when providers span identities
    pub fn requirement(&self, reference: &PackageRef) -> ConditionalRequirement {
        let own = self.name_for(reference.identity());
        let mut names = self.satisfying_names(reference);
        if !names.contains(&own) {
            names.insert(0, own);
        }

        let requirement = if names.len() == 1 {
            Requirement::Single(self.version_set(own, reference, false))
        } else {
            let sets: Vec<VersionSetId> = names
                .into_iter()
                .map(|name| self.version_set(name, reference, false))
                .collect();
            let mut unions = self.unions.borrow_mut();
            unions.push(sets);
            Requirement::Union(VersionSetUnionId::from_usize(unions.len() - 1))
        };

        ConditionalRequirement {
            condition: None,
            requirement,
        }
    }

    fn constrains(&self, conflict: &PackageRef, owner: &Package) -> Vec<VersionSetId> {
        let owner_name = self.name_ids.borrow().get(&owner.identity()).copied();
        self.satisfying_names(conflict)
            .into_iter()
            .filter(|name| Some(*name) != owner_name)
            .map(|name| self.version_set(name, conflict, true))
            .collect()
    }

    fn matches(&self, id: SolvableId, set: &VersionSet) -> bool {
        self.package(id)
            .is_some_and(|pkg| pkg.satisfies(&set.reference) != set.negate)
    }
}

impl Interner for SatProvider {
    fn display_solvable(&self, solvable: SolvableId) -> impl Display + '_ {
        self.package(solvable)
            .map(|p| p.fingerprint())
            .unwrap_or_default()
    }

    fn display_solvable_name(&self, solvable: SolvableId) -> impl Display + '_ {
        self.identity(self.solvable_name(solvable)).to_string()
    }

    fn display_merged_solvables(&self, solvables: &[SolvableId]) -> impl Display + '_ {
        solvables
            .iter()
            .filter_map(|s| self.package(*s).map(|p| p.version.to_string()))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn display_name(&self, name: NameId) -> impl Display + '_ {
        self.identity(name).to_string()
    }

    fn display_version_set(&self, version_set: VersionSetId) -> impl Display + '_ {
        match self.version_sets.borrow().get(version_set.to_usize()) {
            Some(set) if set.negate => format!("not {}", set.reference.constraint()),
            Some(set) => set.reference.constraint().to_string(),
            None => "<unknown>".to_string(),
        }
    }

    fn display_string(&self, _string_id: StringId) -> impl Display + '_ {
        String::new()
    }

    fn version_set_name(&self, version_set: VersionSetId) -> NameId {
        self.version_sets
            .borrow()
            .get(version_set.to_usize())
            .map(|set| set.name)
            .unwrap_or_else(|| NameId::from_usize(0))
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.solvable_names[solvable.to_usize()]
    }

    fn version_sets_in_union(
        &self,
        version_set_union: VersionSetUnionId,
    ) -> impl Iterator<Item = VersionSetId> {
        self.unions
            .borrow()
            .get(version_set_union.to_usize())
            .cloned()
            .unwrap_or_default()
            .into_iter()
    }

    fn resolve_condition(&self, condition: ConditionId) -> Condition {
        // Conditional requirements are never emitted
        Condition::Requirement(VersionSetId::from_usize(condition.to_usize()))
    }
}

impl DependencyProvider for SatProvider {
    async fn filter_candidates(
        &self,
        candidates: &[SolvableId],
        version_set: VersionSetId,
        inverse: bool,
    ) -> Vec<SolvableId> {
        let Some(set) = self.version_sets.borrow().get(version_set.to_usize()).cloned() else {
            return Vec::new();
        };
        candidates
            .iter()
            .copied()
            .filter(|&id| self.matches(id, &set) != inverse)
            .collect()
    }

    async fn get_candidates(&self, name: NameId) -> Option<Candidates> {
        Some(Candidates {
            candidates: self.candidates.get(&name).cloned().unwrap_or_default(),
            favored: None,
            locked: None,
            hint_dependencies_available: HintDependenciesAvailable::None,
            excluded: vec![],
        })
    }

    async fn sort_candidates(&self, _solver: &SolverCache<Self>, solvables: &mut [SolvableId]) {
        solvables.sort_by(|a, b| {
            let (pa, pb) = (&self.solvables[a.to_usize()], &self.solvables[b.to_usize()]);
            pb.version
                .cmp(&pa.version)
                .then_with(|| a.to_usize().cmp(&b.to_usize()))
        });
    }

    async fn get_dependencies(&self, solvable: SolvableId) -> Dependencies {
        let Some(pkg) = self.package(solvable) else {
            return Dependencies::Known(KnownDependencies::default());
        };
        let requirements = pkg.requires.iter().map(|r| self.requirement(r)).collect();
        let constrains = pkg
            .conflicts
            .iter()
            .flat_map(|c| self.constrains(c, pkg))
            .collect();
        Dependencies::Known(KnownDependencies {
            requirements,
            constrains,
        })
    }
}
