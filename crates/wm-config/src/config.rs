use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};
use wm_core::{
    Correction, DEFAULT_TARGET_COUNT, EngineSettings, OptimizerMode, OptimizerSettings,
    PoolConfig, WaveMatrixSettings, WaveParameters,
};

use crate::error::{ConfigError, Result};

/// Explicit config file path.
pub const CONFIG_ENV: &str = "WM_CONFIG";
/// Base directory override; the config lives at `$WM_DATA_DIR/config.toml`.
pub const DATA_DIR_ENV: &str = "WM_DATA_DIR";
pub const CONFIG_FILE: &str = "config.toml";

/// Default base directory for wm files.
pub fn default_base_dir() -> PathBuf {
    match env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs_home().join(".wave-matrix"),
    }
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Config path in priority order: `explicit` > `$WM_CONFIG` > base dir.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    resolve_from(
        explicit,
        env::var(CONFIG_ENV).ok().as_deref(),
        default_base_dir(),
    )
}

fn resolve_from(explicit: Option<&Path>, env_path: Option<&str>, base: PathBuf) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env_path {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => base.join(CONFIG_FILE),
    }
}

/// Host-side settings that never reach the per-tick math.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub target_count: usize,
    pub mode: OptimizerMode,
    /// Advanced optimizer pool size. Unset sizes it to the machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Seed for synthetic confidence traffic.
    pub seed: u64,
    pub pool: PoolConfig,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            target_count: DEFAULT_TARGET_COUNT,
            mode: OptimizerMode::default(),
            workers: None,
            seed: 42,
            pool: PoolConfig::default(),
        }
    }
}

/// On-disk configuration. Every section and field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub wave: WaveParameters,
    pub matrix: WaveMatrixSettings,
    pub optimizer: OptimizerSettings,
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            wave: self.wave,
            matrix: self.matrix,
            optimizer: self.optimizer,
        }
    }

    /// Repair the tunables against the documented defaults.
    pub fn validated(&self) -> (Self, Vec<Correction>) {
        let (settings, corrections) = self.settings().validated(&EngineSettings::default());
        let config = Self {
            engine: self.engine.clone(),
            wave: settings.wave,
            matrix: settings.matrix,
            optimizer: settings.optimizer,
        };
        (config, corrections)
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Read and parse `path`. A missing file is an error here.
pub fn load(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = EngineConfig::from_toml(&content, path)?;
    tracing::info!("loaded config from {}", path.display());
    Ok(config)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::info!("no config at {}, using defaults", path.display());
        return Ok(EngineConfig::default());
    }
    load(path)
}

/// Write `config` to `path`, creating parent directories.
/// Refuses to replace an existing file unless `overwrite` is set.
pub fn save(config: &EngineConfig, path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return Err(ConfigError::InvalidData(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = config.to_toml()?;
    fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("wrote config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wm_core::ConfidenceCurve;

    #[test]
    fn test_resolve_explicit_wins() {
        let p = resolve_from(
            Some(Path::new("/tmp/explicit.toml")),
            Some("/tmp/env.toml"),
            PathBuf::from("/base"),
        );
        assert_eq!(p, PathBuf::from("/tmp/explicit.toml"));
    }

    #[test]
    fn test_resolve_env_then_base() {
        let p = resolve_from(None, Some("/tmp/env.toml"), PathBuf::from("/base"));
        assert_eq!(p, PathBuf::from("/tmp/env.toml"));
        let p = resolve_from(None, Some(""), PathBuf::from("/base"));
        assert_eq!(p, PathBuf::from("/base/config.toml"));
        let p = resolve_from(None, None, PathBuf::from("/base"));
        assert_eq!(p, PathBuf::from("/base/config.toml"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(load(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[engine]\ntarget_count = 37\nmode = \"advanced\"\n\n[optimizer]\nconfidence_curve = \"inverse_square\"\n",
        )
        .unwrap();
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.engine.target_count, 37);
        assert_eq!(config.engine.mode, OptimizerMode::Advanced);
        assert_eq!(config.engine.pool, PoolConfig::default());
        assert_eq!(config.optimizer.confidence_curve, ConfidenceCurve::InverseSquare);
        assert_eq!(config.optimizer.min_distance, OptimizerSettings::default().min_distance);
        assert_eq!(config.wave, WaveParameters::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine\ntarget_count = ").unwrap();
        let err = load_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("malformed config"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = EngineConfig::default();
        config.engine.workers = Some(3);
        config.engine.pool.pooling = false;
        config.matrix.radius = 2.25;
        save(&config, &path, false).unwrap();

        let back = load(&path).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save(&EngineConfig::default(), &path, false).unwrap();
        assert!(matches!(
            save(&EngineConfig::default(), &path, false),
            Err(ConfigError::InvalidData(_))
        ));
        save(&EngineConfig::default(), &path, true).unwrap();
    }

    #[test]
    fn test_validated_repairs_bad_values() {
        let mut config = EngineConfig::default();
        config.wave.primary_frequency = 3.0;
        config.matrix.smoothing_speed = f32::NAN;
        let (fixed, corrections) = config.validated();
        assert_eq!(corrections.len(), 2);
        assert_eq!(fixed.wave.primary_frequency, 0.5);
        assert_eq!(fixed.matrix.smoothing_speed, WaveMatrixSettings::default().smoothing_speed);
        assert_eq!(fixed.engine, config.engine);
    }
}
