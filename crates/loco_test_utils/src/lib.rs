//! Test utilities for the locomotion core.
//!
//! Provides the determinism-verification harness and scenario fixtures
//! shared by integration tests. Nothing here runs in a release build.

pub mod determinism;
pub mod fixtures;
