//! # Mediation Testing Utils
//!
//! Shared testing utilities for the mediation dispatch core.
//!
//! - **Mock Transport**: scripted in-memory transport with call recording and
//!   pending non-blocking requests
//! - **Expression Evaluators**: map-backed evaluator with closure hooks
//! - **Recording Mediators**: child sequences that record what they saw
//! - **Builders**: message contexts and endpoint definitions
//! - **Helpers**: environments, tracing for tests, polling
//!
//! ```toml
//! [dev-dependencies]
//! mediation-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
