//! Common utilities and types shared across Strongbox crates.
//!
//! This module provides the workspace-wide error type and the small value
//! types (sensitive byte buffers, confirmation tokens) that cross crate
//! boundaries.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Confirmation, SensitiveBytes};
