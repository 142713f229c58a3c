//! Presentation layer: result delivery and display targets.

/// Delivery of finished loads to display targets.
pub mod dispatcher;
/// Display target implementations.
pub mod widgets;

pub use dispatcher::{Delivery, ResultDispatcher, ResultSender};
