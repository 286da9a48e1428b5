//! The interface the transaction pipeline consumes from the external
//! dependency solver.
//!
//! The solver owns a [`Pool`] of solvables and produces a [`Solution`]: a
//! classified, topologically ordered list of [`TransactionStep`]s together
//! with the user's requested specs. The pipeline never aliases solver-owned
//! package data; a [`PackageInfo`] is always copied out of the pool through a
//! [`SolvableId`] handle, and handles never outlive the borrow of the
//! solution they came from.

use pangolin_types::{PackageInfo, PackageType};

/// An opaque handle to one package inside a [`Pool`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SolvableId(u32);

/// The pool of packages known to the solver: every candidate from the loaded
/// repository indexes plus the packages currently installed in the prefix.
#[derive(Debug, Default)]
pub struct Pool {
    solvables: Vec<PackageInfo>,
    installed: Vec<SolvableId>,
}

impl Pool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a package to the pool and returns its handle.
    pub fn add_solvable(&mut self, pkg: PackageInfo) -> SolvableId {
        let id = SolvableId(self.solvables.len() as u32);
        self.solvables.push(pkg);
        id
    }

    /// Adds a package that is already present in the target prefix. Virtual
    /// system packages are fed to the solver this way as well: they describe
    /// host capabilities and are always considered installed.
    pub fn add_installed(&mut self, pkg: PackageInfo) -> SolvableId {
        let id = self.add_solvable(pkg);
        self.installed.push(id);
        id
    }

    /// Borrows the package behind a handle.
    pub fn resolve(&self, id: SolvableId) -> &PackageInfo {
        &self.solvables[id.0 as usize]
    }

    /// Returns a value copy of the package behind a handle.
    pub fn package_info(&self, id: SolvableId) -> PackageInfo {
        self.resolve(id).clone()
    }

    /// The handles of all installed packages, including virtual ones.
    pub fn installed(&self) -> impl Iterator<Item = SolvableId> + '_ {
        self.installed.iter().copied()
    }
}

/// The classification of one solver step.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StepKind {
    /// Install a package that was not present before.
    Install,
    /// Remove a package without replacement.
    Erase,
    /// Replace a package with a newer build.
    Upgraded,
    /// Replace a package with an older build.
    Downgraded,
    /// Replace a package with a different build of the same version.
    Changed,
    /// Nothing to do for this package.
    Ignore,
    /// The package moved between vendors. Not acted upon.
    VendorChange,
    /// The package moved between architectures. Not acted upon.
    ArchChange,
}

/// One step of a solved transaction. For the two-sided kinds (`Upgraded`,
/// `Downgraded`, `Changed`) the step carries both the replacement solvable
/// and the obsoleted one it supersedes.
#[derive(Copy, Clone, Debug)]
pub struct TransactionStep {
    /// What to do.
    pub kind: StepKind,
    /// The package the step acts on; the replacement side for two-sided kinds.
    pub solvable: SolvableId,
    /// The package that is superseded, for two-sided kinds.
    pub obsoleted: Option<SolvableId>,
}

/// The output of a solver run: the pool, the classified steps in the order
/// they must be executed (dependency order for installs, reverse for
/// removals), and the specs the user asked for.
#[derive(Debug)]
pub struct Solution {
    pool: Pool,
    steps: Vec<TransactionStep>,
    install_specs: Vec<String>,
    remove_specs: Vec<String>,
    solved: bool,
}

impl Solution {
    /// Wraps the output of a completed solver run.
    pub fn new(
        pool: Pool,
        steps: Vec<TransactionStep>,
        install_specs: Vec<String>,
        remove_specs: Vec<String>,
    ) -> Self {
        Self {
            pool,
            steps,
            install_specs,
            remove_specs,
            solved: true,
        }
    }

    /// Wraps a pool for which the solver has not produced steps. Constructing
    /// a transaction from this state is a programming error and fails.
    pub fn unsolved(pool: Pool) -> Self {
        Self {
            pool,
            steps: Vec::new(),
            install_specs: Vec::new(),
            remove_specs: Vec::new(),
            solved: false,
        }
    }

    /// The pool the solution's handles point into.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// The classified steps, topologically ordered by the solver.
    pub fn ordered_steps(&self) -> &[TransactionStep] {
        &self.steps
    }

    /// The install specs the user requested.
    pub fn install_specs(&self) -> &[String] {
        &self.install_specs
    }

    /// The remove specs the user requested.
    pub fn remove_specs(&self) -> &[String] {
        &self.remove_specs
    }

    /// Whether the solver has run.
    pub fn is_solved(&self) -> bool {
        self.solved
    }

    /// Returns true if the given handle refers to a virtual system package.
    pub fn is_virtual(&self, id: SolvableId) -> bool {
        self.pool.resolve(id).package_type == PackageType::VirtualSystem
    }
}

#[cfg(test)]
mod test {
    use pangolin_types::{ArchiveType, PackageInfo};

    use super::{Pool, Solution, StepKind, TransactionStep};

    fn pkg(name: &str, version: &str) -> PackageInfo {
        PackageInfo::from_parts(
            name,
            version,
            "0",
            0,
            "https://repo.example.com/main",
            "linux-64",
            ArchiveType::TarBz2,
        )
    }

    #[test]
    fn package_info_is_a_copy() {
        let mut pool = Pool::new();
        let id = pool.add_solvable(pkg("foo", "1.0"));

        let mut copy = pool.package_info(id);
        copy.version = String::from("2.0");
        assert_eq!(pool.resolve(id).version, "1.0");
    }

    #[test]
    fn installed_tracks_handles() {
        let mut pool = Pool::new();
        pool.add_solvable(pkg("candidate", "1.0"));
        let installed = pool.add_installed(pkg("present", "0.1"));

        let handles: Vec<_> = pool.installed().collect();
        assert_eq!(handles, vec![installed]);
    }

    #[test]
    fn unsolved_solution_reports_unsolved() {
        let solution = Solution::unsolved(Pool::new());
        assert!(!solution.is_solved());

        let mut pool = Pool::new();
        let id = pool.add_solvable(pkg("foo", "1.0"));
        let solution = Solution::new(
            pool,
            vec![TransactionStep {
                kind: StepKind::Install,
                solvable: id,
                obsoleted: None,
            }],
            vec![String::from("foo")],
            Vec::new(),
        );
        assert!(solution.is_solved());
        assert_eq!(solution.ordered_steps().len(), 1);
    }
}
