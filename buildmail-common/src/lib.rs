pub mod address;
pub mod address_parser;
pub mod build;
pub mod config;
pub mod error;
pub mod listener;
pub mod logging;

pub use tracing;

/// Environment variables visible to recipient-list expansion, keyed by name.
pub type EnvVars = ahash::AHashMap<String, String>;
