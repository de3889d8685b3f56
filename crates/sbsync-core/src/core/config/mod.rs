//! Configuration, settings, and per-command context assembly.

pub mod context;
pub mod last_used;
pub mod settings;

pub use last_used::LastUsed;
pub use settings::*;
