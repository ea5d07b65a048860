// src/resolver/plan.rs

//! Ordered operation list consumed by the installer

use super::graph::DependencyGraph;
use crate::package::Package;
use crate::repository::{ArtifactsPack, PackageArtifact};
use std::fmt;
use tracing::warn;

/// What an operation does to the installed world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Fresh install (`N`)
    New,
    /// New version of an installed identity (`U`)
    Update,
    /// Removal (`D`)
    Delete,
    /// Old version going away as part of an update (`u`)
    Replaced,
}

impl OperationKind {
    pub fn letter(&self) -> char {
        match self {
            Self::New => 'N',
            Self::Update => 'U',
            Self::Delete => 'D',
            Self::Replaced => 'u',
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Delete | Self::Replaced)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub artifact: PackageArtifact,
}

impl Operation {
    pub fn package(&self) -> &Package {
        &self.artifact.runtime
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.artifact.repository() {
            Some(repo) => write!(f, "{} {} ({})", self.kind, self.artifact.runtime, repo),
            None => write!(f, "{} {}", self.kind, self.artifact.runtime),
        }
    }
}

/// Operations in the order they must be applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub operations: Vec<Operation>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind == kind).count()
    }

    pub fn removals(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.kind.is_removal())
    }

    pub fn installs(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| !op.kind.is_removal())
    }

    /// One-line summary, e.g. `2 new, 1 update, 0 removal(s)`
    pub fn summary(&self) -> String {
        format!(
            "{} new, {} update(s), {} removal(s)",
            self.count(OperationKind::New),
            self.count(OperationKind::Update),
            self.count(OperationKind::Delete)
        )
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.operations {
            writeln!(f, "  {}", op)?;
        }
        Ok(())
    }
}

/// Order artifacts by dependencies, falling back to the given order on a cycle
fn dependency_order(artifacts: Vec<PackageArtifact>) -> Vec<PackageArtifact> {
    let packages: Vec<Package> = artifacts.iter().map(|a| a.runtime.clone()).collect();
    match DependencyGraph::from_packages(&packages).topological_sort() {
        Ok(sorted) => {
            let mut remaining = artifacts;
            let mut ordered = Vec::with_capacity(remaining.len());
            for pkg in sorted {
                if let Some(pos) = remaining.iter().position(|a| a.runtime.same_as(&pkg)) {
                    ordered.push(remaining.remove(pos));
                }
            }
            ordered.extend(remaining);
            ordered
        }
        Err(e) => {
            warn!("{}, keeping resolution order", e);
            artifacts
        }
    }
}

/// Build the plan for a resolution result
///
/// Order: deletions (dependents before their dependencies), then the old
/// versions being replaced, then installs and updates with dependencies
/// first.
pub fn order_operations(to_install: &ArtifactsPack, to_remove: &ArtifactsPack) -> Plan {
    let replaced_identity =
        |a: &PackageArtifact| to_install.iter().any(|i| i.runtime.same_identity(&a.runtime));

    let (replaced, deleted): (Vec<PackageArtifact>, Vec<PackageArtifact>) = to_remove
        .iter()
        .cloned()
        .partition(|a| replaced_identity(a));

    let mut operations = Vec::with_capacity(to_install.len() + to_remove.len());

    let mut deleted = dependency_order(deleted);
    deleted.reverse();
    operations.extend(deleted.into_iter().map(|artifact| Operation {
        kind: OperationKind::Delete,
        artifact,
    }));

    let mut replaced = dependency_order(replaced);
    replaced.reverse();
    operations.extend(replaced.into_iter().map(|artifact| Operation {
        kind: OperationKind::Replaced,
        artifact,
    }));

    for artifact in dependency_order(to_install.iter().cloned().collect()) {
        let kind = if to_remove
            .iter()
            .any(|r| r.runtime.same_identity(&artifact.runtime))
        {
            OperationKind::Update
        } else {
            OperationKind::New
        };
        operations.push(Operation { kind, artifact });
    }

    Plan { operations }
}
