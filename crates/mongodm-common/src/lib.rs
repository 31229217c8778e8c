//! Common utilities for mongodm
//!
//! This crate provides the error taxonomy shared by the mongodm crates.

pub mod error;

pub use error::{MongoDmError, Result};
