use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::TempoError;

/// Tempo tracking and scheduling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Slowest tempo accepted; sets the longest valid beat period.
    pub min_bpm: f64,
    /// Fastest tempo accepted; intervals shorter than its period are noise.
    pub max_bpm: f64,
    /// Number of corrected intervals in the rolling average.
    pub window_capacity: usize,
    /// Silence longer than this many maximum periods restarts tracking.
    pub reset_multiplier: f64,
    /// Length of the beat phase cycle.
    pub phase_modulus: u32,
    /// Length of the metronome step sequence.
    pub max_steps: usize,
    /// Constant offset added to every scheduled tick, in milliseconds.
    pub skew_ms: f64,
    /// Upper bound on any single wait in the async loops, in milliseconds.
    pub receive_timeout_ms: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            min_bpm: 55.0,
            max_bpm: 155.0,
            window_capacity: 5,
            reset_multiplier: 3.0,
            phase_modulus: 4,
            max_steps: 32,
            skew_ms: 0.0,
            receive_timeout_ms: 250,
        }
    }
}

impl TrackerSettings {
    /// Longest valid beat period in seconds.
    pub fn max_period(&self) -> f64 {
        60.0 / self.min_bpm
    }

    /// Shortest valid beat period in seconds.
    pub fn min_period(&self) -> f64 {
        60.0 / self.max_bpm
    }

    pub fn skew_seconds(&self) -> f64 {
        self.skew_ms / 1000.0
    }

    pub fn receive_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.receive_timeout_ms)
    }

    /// Check every invariant the estimator and scheduler rely on.
    pub fn validate(&self) -> Result<(), TempoError> {
        let mut errors = Vec::new();

        if !(self.min_bpm.is_finite() && self.min_bpm > 0.0) {
            errors.push(format!("min_bpm must be a positive number, got {}", self.min_bpm));
        }
        if !(self.max_bpm.is_finite() && self.max_bpm > 0.0) {
            errors.push(format!("max_bpm must be a positive number, got {}", self.max_bpm));
        }
        if self.min_bpm >= self.max_bpm {
            errors.push(format!(
                "min_bpm ({}) must be less than max_bpm ({})",
                self.min_bpm, self.max_bpm
            ));
        }
        if self.window_capacity == 0 {
            errors.push("window_capacity must be at least 1".to_string());
        }
        if !(self.reset_multiplier.is_finite() && self.reset_multiplier >= 1.0) {
            errors.push(format!(
                "reset_multiplier must be at least 1, got {}",
                self.reset_multiplier
            ));
        }
        if self.phase_modulus == 0 {
            errors.push("phase_modulus must be at least 1".to_string());
        }
        if self.max_steps == 0 {
            errors.push("max_steps must be at least 1".to_string());
        }
        if !self.skew_ms.is_finite() {
            errors.push(format!("skew_ms must be finite, got {}", self.skew_ms));
        }
        if self.receive_timeout_ms == 0 {
            errors.push("receive_timeout_ms must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TempoError::Configuration(errors.join(", ")))
        }
    }
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: TrackerSettings,
    pub modified_at: String,
}

/// Loads and saves `TrackerSettings` as a versioned JSON file.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: TrackerSettings,
}

impl ConfigManager {
    /// Create a new configuration manager
    /// If no path is provided, defaults to 'pulse.json' in the current working directory
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.unwrap_or_else(|| PathBuf::from("pulse.json")),
            settings: TrackerSettings::default(),
        }
    }

    /// Load and validate settings. A missing file yields the defaults.
    pub fn load(&mut self) -> Result<TrackerSettings, TempoError> {
        if !self.config_path.exists() {
            log::info!(
                "No config at {}, using defaults",
                self.config_path.display()
            );
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            TempoError::Configuration(format!(
                "failed to read {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        let config_file: ConfigFile = serde_json::from_str(&content).map_err(|e| {
            TempoError::Configuration(format!(
                "failed to parse {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        config_file.settings.validate()?;
        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to configuration file
    pub fn save(&self) -> Result<(), TempoError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent)
                    .map_err(|e| TempoError::Configuration(format!("failed to create {}: {}", parent.display(), e)))?;
            }
        }

        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            modified_at: chrono::Utc::now().to_rfc3339(),
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| TempoError::Configuration(format!("failed to serialize settings: {}", e)))?;

        fs::write(&self.config_path, content).map_err(|e| {
            TempoError::Configuration(format!(
                "failed to write {}: {}",
                self.config_path.display(),
                e
            ))
        })
    }

    /// Validate, store and save new settings
    pub fn update_settings(&mut self, settings: TrackerSettings) -> Result<(), TempoError> {
        settings.validate()?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = TrackerSettings::default();
        assert!(settings.validate().is_ok());
        assert_relative_eq!(settings.max_period(), 60.0 / 55.0);
        assert_relative_eq!(settings.min_period(), 60.0 / 155.0);
    }

    #[test]
    fn test_inverted_bpm_bounds_rejected() {
        let settings = TrackerSettings {
            min_bpm: 160.0,
            max_bpm: 150.0,
            ..Default::default()
        };
        match settings.validate() {
            Err(TempoError::Configuration(msg)) => assert!(msg.contains("min_bpm")),
            other => panic!("expected configuration error, got {:?}", other),
        }

        let equal = TrackerSettings {
            min_bpm: 120.0,
            max_bpm: 120.0,
            ..Default::default()
        };
        assert!(equal.validate().is_err());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        for settings in [
            TrackerSettings { window_capacity: 0, ..Default::default() },
            TrackerSettings { phase_modulus: 0, ..Default::default() },
            TrackerSettings { max_steps: 0, ..Default::default() },
            TrackerSettings { receive_timeout_ms: 0, ..Default::default() },
            TrackerSettings { min_bpm: 0.0, ..Default::default() },
            TrackerSettings { skew_ms: f64::NAN, ..Default::default() },
        ] {
            assert!(settings.validate().is_err(), "{:?} should be invalid", settings);
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(Some(temp_dir.path().join("missing.json")));
        assert_eq!(manager.load().unwrap(), TrackerSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("pulse.json");

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let settings = TrackerSettings {
            max_bpm: 250.0,
            skew_ms: -12.5,
            ..Default::default()
        };
        manager.update_settings(settings.clone()).unwrap();

        let mut manager2 = ConfigManager::new(Some(config_path));
        assert_eq!(manager2.load().unwrap(), settings);
        assert_eq!(manager2.settings(), &settings);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("pulse.json");
        fs::write(
            &config_path,
            r#"{"version":"0.1.0","settings":{"min_bpm":200.0,"max_bpm":100.0},"modified_at":""}"#,
        )
        .unwrap();

        let mut manager = ConfigManager::new(Some(config_path.clone()));
        assert!(matches!(manager.load(), Err(TempoError::Configuration(_))));

        fs::write(&config_path, "not json").unwrap();
        assert!(matches!(manager.load(), Err(TempoError::Configuration(_))));
    }

    #[test]
    fn test_update_rejects_invalid_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("pulse.json");
        let mut manager = ConfigManager::new(Some(config_path.clone()));
        let bad = TrackerSettings { window_capacity: 0, ..Default::default() };
        assert!(manager.update_settings(bad).is_err());
        assert!(!config_path.exists());
    }
}
