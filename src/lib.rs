//! fixloop library crate
//!
//! Repairs a single buggy function by alternating model generation with
//! sandboxed test execution. The binary wires these modules to a task corpus;
//! benchmarks and integration tests use them directly.

pub mod config;
pub mod lab;
pub mod llm;
pub mod repair;
pub mod sandbox;
pub mod util;
