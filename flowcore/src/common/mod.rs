//! Common utilities shared across the engine

/// Environment variable loading utilities
pub mod env_loader;

pub use env_loader::EnvLoader;
