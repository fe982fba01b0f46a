//! Public facade of the discovery cache
mod context;
mod service;
pub use context::*;
pub use service::*;
