//! # Error Handling
//!
//! Typed errors returned by the backends, the lease manager and the HTTP
//! adapter. Nothing in the core panics on an expected failure; every failure
//! travels up as an [`Error`] and the transport decides how to render it.

pub mod types;

pub use types::{Error, Result};
