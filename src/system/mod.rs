//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the underlying operating system.
//! It is the boundary between the matrix logic and process management.
//!
//! ## Modules
//!
//! - **`executor`**: Spawns a single external process, pumps its output into a log sink,
//!   and kills it when the run is cancelled.
//! - **`context`**: The `IsolatedContext` resource: one directory and one environment
//!   variable set per environment, torn down on drop unless retained for reuse.
//! - **`provisioner`**: Creates contexts and installs resolved requirements through the
//!   configured installer templates.
//! - **`runner`**: Executes an environment's command list fail-fast inside its context.
//! - **`signals`**: Turns Ctrl+C into a raised `CancellationToken`.

pub mod context;
pub mod executor;
pub mod provisioner;
pub mod runner;
pub mod signals;
