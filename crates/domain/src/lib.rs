//! Domain-level building blocks shared by the scanner and the HTTP API:
//! chain value types, exact balance arithmetic, the node boundary trait and
//! environment-driven configuration.

pub mod config;
pub mod model;
pub mod services;
pub mod source;

pub use model::*;
pub use source::{BlockSource, SourceError};
