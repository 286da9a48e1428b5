//! The transaction: classifying solver output, fetching what is missing, and
//! applying link/unlink steps to the prefix.

use std::path::Path;

use indicatif::HumanBytes;
use pangolin_cache::{CacheError, MultiCache, PackageCache};
use pangolin_types::history::{History, HistoryEntry, HistoryError};
use pangolin_types::{PackageInfo, PackageType};

use crate::console::Console;
use crate::context::{Context, InterruptFlag};
use crate::fetch::{ExtractLock, FetchError, FetchExtractTarget, MultiDownloader};
use crate::install::{
    link_package, unlink_package, LinkError, TransactionContext, UnlinkError,
};
use crate::solver::{Solution, SolvableId, StepKind};

/// An error that can occur while planning or executing a transaction.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// A transaction was requested before the solver produced a solution.
    #[error("cannot create a transaction before the solver has run")]
    SolverUnsolved,

    /// No cache root could be written to.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Fetching or extracting a package failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Linking a package into the prefix failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Unlinking a package from the prefix failed.
    #[error(transparent)]
    Unlink(#[from] UnlinkError),

    /// The history journal could not be written.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The interrupt flag was observed.
    #[error("the transaction was interrupted")]
    Interrupted,
}

/// A planned transaction over a solver solution.
///
/// The transaction borrows the solution (and through it the solvable pool)
/// for its whole lifetime; package data only leaves the pool as value copies.
#[derive(Debug)]
pub struct Transaction<'a> {
    solution: &'a Solution,
    multi_cache: &'a MultiCache,
    to_install: Vec<SolvableId>,
    to_remove: Vec<SolvableId>,
    history_entry: HistoryEntry,
}

impl<'a> Transaction<'a> {
    /// Classifies the solution's steps into the packages to install and
    /// remove, seeding the history draft with the user's requested specs.
    ///
    /// Fails with [`TransactionError::SolverUnsolved`] when the solver has
    /// not run.
    pub fn from_solution(
        solution: &'a Solution,
        multi_cache: &'a MultiCache,
    ) -> Result<Self, TransactionError> {
        if !solution.is_solved() {
            return Err(TransactionError::SolverUnsolved);
        }

        let mut to_install = Vec::new();
        let mut to_remove = Vec::new();
        for step in solution.ordered_steps() {
            match step.kind {
                StepKind::Install => to_install.push(step.solvable),
                StepKind::Erase => to_remove.push(step.solvable),
                StepKind::Upgraded | StepKind::Downgraded | StepKind::Changed => {
                    match step.obsoleted {
                        Some(obsoleted) => to_remove.push(obsoleted),
                        None => tracing::warn!(
                            "step {:?} for {} carries no obsoleted package",
                            step.kind,
                            solution.pool().resolve(step.solvable)
                        ),
                    }
                    to_install.push(step.solvable);
                }
                StepKind::Ignore => {}
                StepKind::VendorChange | StepKind::ArchChange => {
                    tracing::warn!(
                        "step kind {:?} not handled for {}",
                        step.kind,
                        solution.pool().resolve(step.solvable)
                    );
                }
            }
        }

        Ok(Self {
            solution,
            multi_cache,
            to_install,
            to_remove,
            history_entry: HistoryEntry {
                timestamp: String::new(),
                requested_specs: solution.install_specs().to_vec(),
                removed_specs: solution.remove_specs().to_vec(),
                link_dists: Vec::new(),
                unlink_dists: Vec::new(),
            },
        })
    }

    /// The handles of the packages to install, in step order.
    pub fn to_install(&self) -> &[SolvableId] {
        &self.to_install
    }

    /// The handles of the packages to remove, in step order.
    pub fn to_remove(&self) -> &[SolvableId] {
        &self.to_remove
    }

    /// Whether the transaction has nothing to do.
    pub fn empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }

    /// Derives the interpreter version that will be present after this
    /// transaction, needed to place architecture-neutral interpreter
    /// packages.
    ///
    /// A `python` among the packages to install wins; otherwise the installed
    /// one counts, unless it is about to be removed. An empty string means no
    /// interpreter will be available.
    pub fn find_interpreter_version(&self) -> String {
        let pool = self.solution.pool();

        for &id in &self.to_install {
            let pkg = pool.resolve(id);
            if pkg.name == "python" {
                tracing::info!(
                    "found python version in packages to be installed: {}",
                    pkg.version
                );
                return pkg.version.clone();
            }
        }

        let mut version = String::new();
        for id in pool.installed() {
            let pkg = pool.resolve(id);
            if pkg.name == "python" {
                tracing::info!("found python in installed packages: {}", pkg.version);
                version = pkg.version.clone();
                break;
            }
        }

        if !version.is_empty() {
            // The interpreter may itself be on the way out.
            for &id in &self.to_remove {
                if pool.resolve(id).name == "python" {
                    return String::new();
                }
            }
        }
        version
    }

    /// Prints the classified transaction summary and asks the user to
    /// confirm. An empty transaction and a dry run confirm immediately.
    pub fn prompt(&self, ctx: &Context, console: &Console) -> bool {
        if self.empty() {
            return true;
        }
        self.print_summary(console);
        if ctx.dry_run {
            return true;
        }
        console.prompt("Confirm changes", true)
    }

    /// Prints a per-kind listing of the transaction with a download total.
    pub fn print_summary(&self, console: &Console) {
        let pool = self.solution.pool();
        let mut sections: Vec<(&str, Vec<String>)> = vec![
            ("Install", Vec::new()),
            ("Remove", Vec::new()),
            ("Change", Vec::new()),
            ("Upgrade", Vec::new()),
            ("Downgrade", Vec::new()),
        ];
        let mut total_download: u64 = 0;

        let mut format_row = |pkg: &PackageInfo, incoming: bool| -> String {
            let size = if !incoming {
                String::new()
            } else if self.multi_cache.query(pkg) {
                console::style("Cached").green().to_string()
            } else {
                total_download += pkg.size;
                HumanBytes(pkg.size).to_string()
            };
            let name = if incoming {
                console::style(&pkg.name).green()
            } else {
                console::style(&pkg.name).red()
            };
            format!(
                "  {name:<30} {:>12}  {:<20} {size:>10}",
                pkg.version,
                cut_repo_name(&pkg.channel),
            )
        };

        for step in self.solution.ordered_steps() {
            let section = match step.kind {
                StepKind::Install => 0,
                StepKind::Erase => 1,
                StepKind::Changed => 2,
                StepKind::Upgraded => 3,
                StepKind::Downgraded => 4,
                _ => continue,
            };
            let mut rows = Vec::new();
            match step.kind {
                StepKind::Install => {
                    rows.push(format_row(pool.resolve(step.solvable), true));
                }
                StepKind::Erase => {
                    rows.push(format_row(pool.resolve(step.solvable), false));
                }
                _ => {
                    if let Some(obsoleted) = step.obsoleted {
                        rows.push(format_row(pool.resolve(obsoleted), false));
                    }
                    rows.push(format_row(pool.resolve(step.solvable), true));
                }
            }
            sections[section].1.append(&mut rows);
        }

        console.print("");
        for (title, rows) in &sections {
            if rows.is_empty() {
                continue;
            }
            console.print(format!("{title}:"));
            for row in rows {
                console.print(row);
            }
        }
        console.print("");
        console.print("Summary:");
        for (title, rows) in &sections {
            if !rows.is_empty() {
                console.print(format!("  {title}: {} packages", rows.len()));
            }
        }
        console.print(format!(
            "  Total download: {}",
            HumanBytes(total_download)
        ));
        console.print("");
    }

    /// Brings every package to install into the cache: cache hits
    /// short-circuit, the rest is downloaded concurrently, validated, and
    /// extracted. Returns once every target has settled; the interrupt flag
    /// is polled between completions.
    pub async fn fetch_extract_packages(
        &self,
        cache: &PackageCache,
        client: &reqwest::Client,
        console: &Console,
        interrupt: &InterruptFlag,
    ) -> Result<(), TransactionError> {
        let extract_lock = ExtractLock::default();
        let pool = self.solution.pool();

        let mut targets = Vec::new();
        let mut work = Vec::new();
        for &id in &self.to_install {
            let pkg = pool.package_info(id);
            if pkg.package_type == PackageType::VirtualSystem {
                continue;
            }
            let mut target = FetchExtractTarget::new(pkg, extract_lock.clone());
            if let Some(ticket) = target.prepare(cache.path(), self.multi_cache, console) {
                work.push((targets.len(), ticket));
            }
            targets.push(target);
        }

        MultiDownloader::new(client.clone())
            .download_all(work, &mut targets, interrupt)
            .await?;

        // Every target's validation and extraction must settle before any
        // link step may run.
        for target in &mut targets {
            if interrupt.is_interrupted() {
                return Err(TransactionError::Interrupted);
            }
            target.wait_finished().await?;
        }
        if interrupt.is_interrupted() {
            return Err(TransactionError::Interrupted);
        }
        Ok(())
    }

    /// Walks the solver-ordered steps exactly once, unlinking and linking
    /// packages and appending one entry to the prefix's history journal.
    ///
    /// A failing step aborts the transaction; already committed steps are
    /// left in place and the journal is only written when the walk completes.
    pub fn execute(
        &mut self,
        ctx: &Context,
        cache_root: &Path,
        console: &Console,
    ) -> Result<(), TransactionError> {
        let prefix = ctx.target_prefix.clone();

        if self.empty() {
            console.print("All requested packages already installed");
            tracing::info!(dry_run = ctx.dry_run, prefix = %prefix.display(), "transaction finished");
            return Ok(());
        }

        let tctx = TransactionContext::new(&prefix, self.find_interpreter_version());
        let pool = self.solution.pool();
        console.print("Transaction starting");

        for step in self.solution.ordered_steps() {
            match step.kind {
                StepKind::Upgraded | StepKind::Downgraded | StepKind::Changed => {
                    let Some(obsoleted) = step.obsoleted else {
                        tracing::error!("two-sided step without obsoleted package");
                        continue;
                    };
                    let old = pool.package_info(obsoleted);
                    let new = pool.package_info(step.solvable);
                    console.print(format!("Changing {old} ==> {new}"));
                    unlink_package(&old, &tctx)?;
                    link_package(&new, cache_root, &tctx)?;
                    self.history_entry.unlink_dists.push(old.long_str());
                    self.history_entry.link_dists.push(new.long_str());
                }
                StepKind::Erase => {
                    let pkg = pool.package_info(step.solvable);
                    console.print(format!("Unlinking {pkg}"));
                    unlink_package(&pkg, &tctx)?;
                    self.history_entry.unlink_dists.push(pkg.long_str());
                }
                StepKind::Install => {
                    let pkg = pool.package_info(step.solvable);
                    if pkg.package_type == PackageType::VirtualSystem {
                        continue;
                    }
                    console.print(format!("Linking {pkg}"));
                    link_package(&pkg, cache_root, &tctx)?;
                    self.history_entry.link_dists.push(pkg.long_str());
                }
                StepKind::Ignore => {}
                kind => {
                    tracing::error!("exec case not handled: {kind:?}");
                }
            }
        }

        console.print("Transaction finished");
        self.history_entry.timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        History::new(&prefix).add_entry(&self.history_entry)?;
        tracing::info!(dry_run = ctx.dry_run, prefix = %prefix.display(), "transaction finished");
        Ok(())
    }
}

/// Shortens a channel URL to its trailing name for display.
fn cut_repo_name(channel: &str) -> &str {
    channel
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(channel)
}
