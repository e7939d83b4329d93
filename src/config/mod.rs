//! Manifest parsing and validation
//!
//! This module handles parsing of tasks.yaml manifests, include
//! resolution sources, and validation of manifest structure.

pub mod loader;
pub mod schema;
pub mod types;

// Re-export main types
pub use loader::*;
pub use schema::*;
pub use types::*;
