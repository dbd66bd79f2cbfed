//! Type definitions for Vellum.
//!
//! This module contains the identifier types used across the storage core.

mod ids;

pub use ids::{FileId, Lsn, OperationUnitId, PageKey};
