#![deny(missing_docs)]

//! The transaction pipeline of the pangolin package manager.
//!
//! The pipeline turns the output of an external dependency solver into changes
//! to a target prefix: the [`transaction::Transaction`] classifies solver
//! steps into packages to install and remove, fetches and extracts missing
//! archives into a package cache ([`fetch`]), and materializes or removes
//! packages in the prefix ([`install`]) while recording a history entry.
//!
//! The solver itself, the repository index machinery, and the network
//! transport are external collaborators; [`solver`] defines the interface the
//! pipeline consumes from them.

pub mod console;
pub mod context;
pub mod fetch;
pub mod install;
pub mod solver;
pub mod transaction;
pub mod virtual_packages;
