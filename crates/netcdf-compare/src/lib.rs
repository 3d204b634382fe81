//! NetCDF comparison and metadata stamping for Cloudnet products.
//!
//! This crate decides whether a freshly produced product file supersedes its
//! predecessor ([`compare::nc_difference`]) and provides read/write access to
//! the global attributes the engine manages (`file_uuid`, `pid`, provenance).
//!
//! # Module Structure
//!
//! - [`error`] - Error types and result alias
//! - [`compare`] - Three-valued file comparison
//! - [`attrs`] - Global attribute access

pub mod attrs;
pub mod compare;
pub mod error;

pub use attrs::{file_format, read_file_uuid, read_global_attr, write_global_attrs};
pub use compare::{nc_difference, NcDiff};
pub use error::{NcError, NcResult};
