//! Common utilities and types shared across Integrator crates.
//!
//! Provides the error taxonomy, the resource-tree node type, bearer-token
//! wrapper and process logging setup.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::LogConfig;
pub use types::{extract_folder_id, AccessToken, ResourceKind, ResourceNode};
