// src/core/mod.rs

//! Configuration loading and the run pipeline: expansion, resolution, execution, reporting.

pub mod envlist;
pub mod fingerprint;
pub mod matrix;
pub mod paths;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod template;
