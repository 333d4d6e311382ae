//! Test utilities for the config sync core
//!
//! Fixtures and recording collaborators shared by unit and scenario
//! tests.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
