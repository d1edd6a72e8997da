//! Configuration for partix.
//!
//! This module provides the configuration of one engine instance.

mod engine;

pub use engine::{BackendConfig, EngineConfig, EngineConfigBuilder};
