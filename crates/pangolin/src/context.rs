//! The configuration context threaded through the transaction pipeline.
//!
//! Process-wide state is deliberately avoided: every component that needs
//! configuration receives a [`Context`] (or the relevant parts of it), and
//! tests construct a fresh one per case.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// An error that can occur while loading or validating a [`Context`].
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The configuration file could not be read.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Machine-readable output suppresses prompts, so it cannot be combined
    /// with interactive confirmation.
    #[error("machine-readable output requires 'always_yes'")]
    JsonRequiresAlwaysYes,
}

/// Configuration gating the transaction pipeline.
///
/// Unknown keys in a configuration file are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    /// Ordered list of package cache roots. Earlier roots are preferred both
    /// for cache hits and as the download destination.
    pub pkgs_dirs: Vec<PathBuf>,

    /// The prefix that packages are materialized into.
    pub target_prefix: PathBuf,

    /// Suppress informational output and progress bars.
    pub quiet: bool,

    /// Answer every prompt with its default affirmative.
    pub always_yes: bool,

    /// Plan and print the transaction but do not fetch or link anything.
    pub dry_run: bool,

    /// Machine-readable output mode. Implies no bars and no prompts and
    /// therefore requires [`Context::always_yes`].
    pub json: bool,

    /// Disable progress bars while keeping normal output.
    pub no_progress_bars: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            pkgs_dirs: Vec::new(),
            target_prefix: PathBuf::new(),
            quiet: false,
            always_yes: false,
            dry_run: false,
            json: false,
            no_progress_bars: false,
        }
    }
}

impl Context {
    /// Loads a context from a YAML configuration file. Keys that this version
    /// does not know are ignored.
    pub fn from_file(path: &Path) -> Result<Self, ContextError> {
        let contents = fs_err::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Loads a context from the configuration file if it exists, falling back
    /// to the defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ContextError> {
        match path {
            Some(path) if path.exists() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.json && !self.always_yes {
            return Err(ContextError::JsonRequiresAlwaysYes);
        }
        Ok(())
    }
}

/// A cloneable flag raised by the signal handler when the user interrupts the
/// process. Long-running phases poll it between units of work.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Creates a new, unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether the flag has been raised.
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
