//! Configuration for lock handles and lock factories.
//!
//! `LockConfig` can be built in code or loaded from a YAML file. Parsing is
//! forward-compatible (unknown fields are ignored), optional fields fall back
//! to sensible defaults, and values are validated after loading.

mod model;
mod operations;
pub mod types;

#[cfg(test)]
mod tests;

pub use model::LockConfig;
pub use types::LockStrategy;
