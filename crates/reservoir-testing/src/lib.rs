//! # reservoir-testing
//!
//! Test infrastructure for reservoir pool development: a scriptable
//! in-memory [`MockFactory`] and [`MockResource`] implementing the
//! collaborator contracts, with failure injection for opens, probes,
//! session resets, and fatal errors.
//!
//! This crate is dev-only (`publish = false`); it exists so the pool's
//! unit and integration tests run against deterministic resources with
//! no external services.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockError, MockFactory, MockResource, MockValidator};
