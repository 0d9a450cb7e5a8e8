//! TOML configuration for the wave-matrix engine: file format, path
//! resolution, load and save.

pub mod config;
pub mod error;

pub use config::{
    CONFIG_ENV, CONFIG_FILE, DATA_DIR_ENV, EngineConfig, EngineSection, default_base_dir, load,
    load_or_default, resolve_config_path, save,
};
pub use error::{ConfigError, Result};
