//! Internal implementation modules for `sbsync-core`.
//!
//! Callers should go through the re-exports at the crate root rather than
//! importing these modules directly.

pub mod catalog;
pub mod commands;
pub mod config;
pub mod reconcile;
pub mod tooling;
