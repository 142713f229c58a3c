//! imgloader - Layered image loading.
//!
//! Images are looked up in a cost-bounded memory LRU, then a journaled disk
//! cache, then fetched over HTTP. Decoding is downsampled to the requested
//! bound, and asynchronous results are delivered on one thread with stale
//! results for recycled targets dropped.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing pure services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;
/// Presentation layer containing result delivery and display targets.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgloader";
