//! Task resolution and execution engine
//!
//! This module handles resolving task references across manifests,
//! variable state, template expansion, and action execution.

pub mod exec;
pub mod resolver;
pub mod run;
pub mod template;
pub mod variables;

// Re-export main types
pub use exec::*;
pub use resolver::*;
pub use run::*;
pub use template::*;
pub use variables::*;
