//! Configuration for Vellum.
//!
//! This module provides the storage configuration and the platform probe
//! used to size it.

mod platform;
mod storage;

pub use platform::{OsProbe, PlatformProbe};
pub use storage::StorageConfig;
