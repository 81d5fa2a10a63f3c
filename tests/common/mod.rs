//! Shared test utilities for engine and property tests.
//!
//! This module provides:
//! - Log entry builders
//! - A recording checkpoint store with failure injection
//! - Engine construction and background-run helpers

pub mod fixtures;
pub mod recording;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use recording::*;
