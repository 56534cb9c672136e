// ABOUTME: Configuration for Corral services
// ABOUTME: Environment variable names and the typed settings loader

pub mod env;
pub mod settings;

pub use settings::{ConfigError, CorralSettings, RuntimeStoreSetting};
