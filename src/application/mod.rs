//! Application layer with pure services.

/// Image sizing services.
pub mod services;
