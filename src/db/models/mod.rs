// src/db/models/mod.rs

//! Data models for Quarry database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

mod file_entry;
mod finalizer_entry;
mod package_entry;

pub use file_entry::FileEntry;
pub use finalizer_entry::FinalizerEntry;
pub use package_entry::PackageEntry;
