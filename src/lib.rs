//! # envmatrix
//!
//! Runs a declarative matrix of isolated environments (tests, linters, type checkers),
//! each with its own dependency set, and reports aggregate pass/fail.
//!
//! The pipeline is: [`core::registry`] loads and validates `envmatrix.toml`,
//! [`core::resolver`] turns dependency groups into requirement lists,
//! [`system::provisioner`] builds an [`system::context::IsolatedContext`] per environment,
//! [`system::runner`] executes the commands and [`core::matrix`] drives everything and
//! produces a [`models::RunReport`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag raised when the user interrupts the run (Ctrl+C).
pub type CancellationToken = Arc<AtomicBool>;

/// Returns `true` once cancellation has been requested.
pub fn is_cancelled(token: &CancellationToken) -> bool {
    token.load(Ordering::SeqCst)
}

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
