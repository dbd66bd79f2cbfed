//! # vellum-common
//!
//! Common types and configuration for Vellum.
//!
//! This crate provides the foundational types shared by the storage core:
//!
//! - **Types**: Core identifiers (`FileId`, `Lsn`, `OperationUnitId`, `PageKey`)
//! - **Config**: Storage configuration and platform resource probing
//! - **Constants**: Page, file and log format constants
//!
//! ## Example
//!
//! ```rust
//! use vellum_common::types::{FileId, Lsn, PageKey};
//!
//! let key = PageKey::new(FileId::new(1), 0);
//! assert_eq!(key.page_index, 0);
//! assert!(!Lsn::INVALID.is_valid());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{FileId, Lsn, OperationUnitId, PageKey};
