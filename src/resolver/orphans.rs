// src/resolver/orphans.rs

//! Installed packages no enabled repository carries anymore

use super::Solver;
use crate::concurrency::{BoundedPool, aggregate};
use crate::error::{Error, Result};
use crate::package::{Package, PackageRef};
use tracing::info;

impl Solver<'_> {
    /// Installed packages with no candidate of their identity in any repository
    ///
    /// Version is ignored. One task per installed package; if any search
    /// fails the whole call fails and no partial list is returned. Each
    /// orphan appears exactly once, sorted by fingerprint.
    pub fn orphans(&self) -> Result<Vec<Package>> {
        let world = self.db.world()?;
        let pool = BoundedPool::new(self.options.concurrency)?;
        let source = self.source;

        let results = pool.map(world, |installed| {
            let candidates = source
                .search(&PackageRef::any(installed.identity()))
                .map_err(|e| Error::DownloadError(format!("{}: {}", installed, e)))?;
            let orphaned = !candidates
                .iter()
                .any(|c| c.runtime.same_identity(&installed));
            Ok(orphaned.then_some(installed))
        });

        let mut orphans: Vec<Package> = aggregate(results)?.into_iter().flatten().collect();
        orphans.sort_by_key(|p| p.fingerprint());
        orphans.dedup_by(|a, b| a.same_as(b));

        info!("Found {} orphaned package(s)", orphans.len());
        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::PackageArtifact;
    use crate::resolver::tests::{db_with, pkg, r};
    use crate::resolver::{CandidateSource, SolverOptions, Universe};

    #[test]
    fn test_orphans_identity_only() {
        let universe = Universe::from_packages(vec![
            pkg("lib/bar@9.0"),
            // Provides lib/gone but is a different identity
            pkg("lib/compat@1.0").with_provides(vec![r("lib/gone")]),
        ]);
        let db = db_with(&[pkg("lib/bar@1.0"), pkg("lib/gone@1.0"), pkg("app/zzz@2.0")]);
        let solver = Solver::new(&db, &universe, SolverOptions::default());

        let orphans: Vec<String> = solver
            .orphans()
            .unwrap()
            .iter()
            .map(|p| p.fingerprint())
            .collect();
        assert_eq!(orphans, vec!["app/zzz@2.0", "lib/gone@1.0"]);
    }

    struct Failing;

    impl CandidateSource for Failing {
        fn search(&self, reference: &PackageRef) -> Result<Vec<PackageArtifact>> {
            if reference.identity().name == "broken" {
                Err(Error::DownloadError("unreachable".into()))
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[test]
    fn test_orphans_fail_closed() {
        let db = db_with(&[pkg("app/broken@1.0"), pkg("app/fine@1.0")]);
        let solver = Solver::new(&db, &Failing, SolverOptions::default());
        match solver.orphans() {
            Err(Error::Aggregate(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("app/broken@1.0"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_orphans_empty_world() {
        let db = db_with(&[]);
        let universe = Universe::default();
        let solver = Solver::new(&db, &universe, SolverOptions::default());
        assert!(solver.orphans().unwrap().is_empty());
    }
}
