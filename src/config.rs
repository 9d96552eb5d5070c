use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;
use crate::models::{AggregationMethod, FitRange};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Model tunables
    #[serde(default)]
    pub model: ModelConfig,

    /// Retrain/predict cadence and data windows
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging setup
    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// Every tunable of the energy model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Heart-rate bucket width in minutes (default: 15)
    pub aggregation_minutes: i64,

    /// Offset from UTC in minutes used for hour-of-day and date labels
    pub utc_offset_minutes: i32,

    pub sleep: SleepConfig,
    pub hrv: HrvConfig,
    pub simulation: SimulationConfig,
    pub calibration: CalibrationConfig,
    pub decay: DecayConfig,
}

/// Which instants delimit a sleep cycle.
///
/// Both options end a cycle at the next sleep onset. `SleepOnset` is the
/// default and spans a full day, night included, so the overnight recovery
/// is part of the fit. `Wake` fits only the waking hours between two sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CycleBoundary {
    /// From one sleep onset to the next
    #[default]
    SleepOnset,
    /// From waking up to the next sleep onset
    Wake,
}

/// Sleep detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Heart rate below which sleep starts (default: 62)
    pub sleep_hr: f64,

    /// Heart rate at or above which sleep ends (default: 70)
    pub wake_hr: f64,

    /// Minimum accepted sleep duration in minutes (default: 200)
    pub min_sleep_minutes: i64,

    /// Samples scanned backwards for the onset peak (default: 20)
    pub onset_lookback: usize,

    /// Reset simulated energy to 100 at each detected wake-up
    pub reset_on_wake: bool,

    pub cycle_boundary: CycleBoundary,
}

/// HRV estimation and drain modulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrvConfig {
    /// Sliding window in minutes (default: 5)
    pub window_minutes: i64,

    /// Minimum raw samples overall before estimating (default: 5)
    pub min_total_samples: usize,

    /// Minimum samples inside one window (default: 3)
    pub min_window_samples: usize,

    /// RMSSD values at or above this are discarded (default: 50)
    pub max_plausible_rmssd: f64,

    /// Baseline used when no HRV could be estimated (default: 50)
    pub default_baseline: f64,

    /// Lookup tolerance in minutes (default: 5)
    pub match_tolerance_minutes: i64,

    /// Ratio to baseline below which drain is amplified (default: 0.7)
    pub low_threshold: f64,

    /// Ratio to baseline above which drain is damped (default: 1.3)
    pub high_threshold: f64,

    pub low_multiplier: f64,
    pub normal_multiplier: f64,
    pub high_multiplier: f64,
}

/// Forward simulator coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Lag between heart rate and its energy effect in minutes (default: 120)
    pub time_offset_minutes: i64,

    /// Recovery per bpm below hr_low per reference step (default: 0.1)
    pub recovery_coefficient: f64,

    /// Drain per bpm above hr_high per reference step (default: 0.15)
    pub drain_coefficient: f64,

    /// Reference step in minutes the coefficients are expressed for (default: 15)
    pub reference_step_minutes: f64,

    /// Start energy when nothing better is known (default: 50)
    pub default_start_energy: f64,
}

/// Grid search and simplex settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub hr_low_grid: Vec<f64>,
    pub hr_high_grid: Vec<f64>,
    pub drain_grid: Vec<f64>,
    pub recovery_grid: Vec<f64>,

    /// Initial simplex step per parameter: hr_low, hr_high, drain, recovery
    pub simplex_steps: [f64; 4],

    pub reflection: f64,

    /// Expansion coefficient (default: 2.0)
    pub expansion: f64,

    pub contraction: f64,
    pub shrink: f64,
    pub max_iterations: usize,

    /// Stop when the loss spread falls below this (default: 0.01)
    pub tolerance: f64,

    /// Validated-to-simulated matching tolerance in minutes (default: 30)
    pub match_tolerance_minutes: i64,

    /// Per-cycle fits with loss at or above this are discarded (default: 500)
    pub max_accepted_loss: f64,

    /// Minimum validated samples inside a cycle (default: 2)
    pub min_validated_per_cycle: usize,

    /// Minimum aggregated heart-rate buckets to attempt training (default: 10)
    pub min_heart_rate_buckets: usize,

    pub fit_range: FitRange,
    pub aggregation_method: AggregationMethod,

    /// Fit cycles on the rayon pool
    pub parallel: bool,
}

/// Time-of-day decay estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Fallback decay in percentage points per hour (default: 3)
    pub default_hourly_decay: f64,

    /// Shortest gap between samples in hours (default: 0.1)
    pub min_gap_hours: f64,

    /// Longest gap between samples in hours (default: 12)
    pub max_gap_hours: f64,

    /// Pairs needed to estimate anything (default: 5)
    pub min_pairs: usize,

    /// Pairs needed for a time-of-day bucket (default: 3)
    pub min_bucket_pairs: usize,

    pub min_hourly_decay: f64,
    pub max_hourly_decay: f64,
}

/// Orchestrator cadence and data windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between retrains (default: 120)
    pub retrain_every_minutes: i64,

    /// Minutes between periodic predictions (default: 10)
    pub predict_every_minutes: i64,

    /// Days of history used for training (default: 7)
    pub training_window_days: i64,

    /// Minutes of heart rate used for a prediction (default: 120)
    pub prediction_window_minutes: i64,

    /// Hours of validated energy used as anchors (default: 24)
    pub anchor_window_hours: i64,

    /// Forecast horizon in minutes (default: 120)
    pub forecast_horizon_minutes: i64,

    /// Tolerance for picking simulated values at forecast instants (default: 30)
    pub match_tolerance_minutes: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();
        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            model: ModelConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            aggregation_minutes: 15,
            utc_offset_minutes: 0,
            sleep: SleepConfig::default(),
            hrv: HrvConfig::default(),
            simulation: SimulationConfig::default(),
            calibration: CalibrationConfig::default(),
            decay: DecayConfig::default(),
        }
    }
}

impl Default for SleepConfig {
    fn default() -> Self {
        SleepConfig {
            sleep_hr: 62.0,
            wake_hr: 70.0,
            min_sleep_minutes: 200,
            onset_lookback: 20,
            reset_on_wake: false,
            cycle_boundary: CycleBoundary::SleepOnset,
        }
    }
}

impl Default for HrvConfig {
    fn default() -> Self {
        HrvConfig {
            window_minutes: 5,
            min_total_samples: 5,
            min_window_samples: 3,
            max_plausible_rmssd: 50.0,
            default_baseline: 50.0,
            match_tolerance_minutes: 5,
            low_threshold: 0.7,
            high_threshold: 1.3,
            low_multiplier: 1.5,
            normal_multiplier: 1.0,
            high_multiplier: 0.5,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            time_offset_minutes: 120,
            recovery_coefficient: 0.1,
            drain_coefficient: 0.15,
            reference_step_minutes: 15.0,
            default_start_energy: 50.0,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            hr_low_grid: vec![50.0, 55.0, 60.0, 65.0, 70.0],
            hr_high_grid: vec![75.0, 80.0, 90.0, 100.0, 110.0, 120.0, 130.0],
            drain_grid: vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0],
            recovery_grid: vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0],
            simplex_steps: [3.0, 5.0, 0.3, 0.3],
            reflection: 1.0,
            expansion: 2.0,
            contraction: 0.5,
            shrink: 0.5,
            max_iterations: 50,
            tolerance: 0.01,
            match_tolerance_minutes: 30,
            max_accepted_loss: 500.0,
            min_validated_per_cycle: 2,
            min_heart_rate_buckets: 10,
            fit_range: FitRange::All,
            aggregation_method: AggregationMethod::Median,
            parallel: true,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        DecayConfig {
            default_hourly_decay: 3.0,
            min_gap_hours: 0.1,
            max_gap_hours: 12.0,
            min_pairs: 5,
            min_bucket_pairs: 3,
            min_hourly_decay: -10.0,
            max_hourly_decay: 15.0,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            retrain_every_minutes: 120,
            predict_every_minutes: 10,
            training_window_days: 7,
            prediction_window_minutes: 120,
            anchor_window_hours: 24,
            forecast_horizon_minutes: 120,
            match_tolerance_minutes: 30,
        }
    }
}

impl ModelConfig {
    pub fn aggregation_width(&self) -> Duration {
        Duration::minutes(self.aggregation_minutes)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.aggregation_minutes <= 0 {
            anyhow::bail!("aggregation_minutes must be positive");
        }
        if self.sleep.sleep_hr >= self.sleep.wake_hr {
            anyhow::bail!(
                "sleep_hr ({}) must be below wake_hr ({})",
                self.sleep.sleep_hr,
                self.sleep.wake_hr
            );
        }
        if self.hrv.window_minutes <= 0 {
            anyhow::bail!("hrv.window_minutes must be positive");
        }
        if self.simulation.reference_step_minutes <= 0.0 {
            anyhow::bail!("simulation.reference_step_minutes must be positive");
        }
        let cal = &self.calibration;
        if cal.hr_low_grid.is_empty()
            || cal.hr_high_grid.is_empty()
            || cal.drain_grid.is_empty()
            || cal.recovery_grid.is_empty()
        {
            anyhow::bail!("calibration grids must not be empty");
        }
        if cal.max_iterations == 0 {
            anyhow::bail!("calibration.max_iterations must be at least 1");
        }
        if self.decay.min_gap_hours >= self.decay.max_gap_hours {
            anyhow::bail!("decay.min_gap_hours must be below decay.max_gap_hours");
        }
        Ok(())
    }
}

impl HrvConfig {
    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes)
    }

    pub fn match_tolerance(&self) -> Duration {
        Duration::minutes(self.match_tolerance_minutes)
    }
}

impl SleepConfig {
    pub fn min_sleep(&self) -> Duration {
        Duration::minutes(self.min_sleep_minutes)
    }
}

impl SimulationConfig {
    pub fn time_offset(&self) -> Duration {
        Duration::minutes(self.time_offset_minutes)
    }
}

impl CalibrationConfig {
    pub fn match_tolerance(&self) -> Duration {
        Duration::minutes(self.match_tolerance_minutes)
    }
}

impl ScheduleConfig {
    pub fn retrain_every(&self) -> Duration {
        Duration::minutes(self.retrain_every_minutes)
    }

    pub fn predict_every(&self) -> Duration {
        Duration::minutes(self.predict_every_minutes)
    }

    pub fn training_window(&self) -> Duration {
        Duration::days(self.training_window_days)
    }

    pub fn prediction_window(&self) -> Duration {
        Duration::minutes(self.prediction_window_minutes)
    }

    pub fn anchor_window(&self) -> Duration {
        Duration::hours(self.anchor_window_hours)
    }

    pub fn forecast_horizon(&self) -> Duration {
        Duration::minutes(self.forecast_horizon_minutes)
    }

    pub fn match_tolerance(&self) -> Duration {
        Duration::minutes(self.match_tolerance_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrain_every_minutes <= 0 || self.predict_every_minutes <= 0 {
            anyhow::bail!("schedule intervals must be positive");
        }
        if self.training_window_days <= 0 || self.prediction_window_minutes <= 0 {
            anyhow::bail!("schedule windows must be positive");
        }
        Ok(())
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pacing")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %e,
                    "Config file not usable, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<PathBuf> {
        let config_path = Self::default_config_path();
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate().context("Invalid model configuration")?;
        self.schedule
            .validate()
            .context("Invalid schedule configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.schedule, config.schedule);
        assert_eq!(parsed.metadata.version, "1.0");
    }

    #[test]
    fn test_documented_defaults() {
        let model = ModelConfig::default();
        assert_eq!(model.aggregation_width(), Duration::minutes(15));
        assert_eq!(model.sleep.sleep_hr, 62.0);
        assert_eq!(model.sleep.wake_hr, 70.0);
        assert_eq!(model.sleep.min_sleep(), Duration::minutes(200));
        assert_eq!(model.sleep.cycle_boundary, CycleBoundary::SleepOnset);
        assert_eq!(model.simulation.time_offset(), Duration::hours(2));
        assert_eq!(model.calibration.expansion, 2.0);
        assert_eq!(model.calibration.max_iterations, 50);
        assert_eq!(model.decay.default_hourly_decay, 3.0);

        let schedule = ScheduleConfig::default();
        assert_eq!(schedule.retrain_every(), Duration::hours(2));
        assert_eq!(schedule.predict_every(), Duration::minutes(10));
        assert_eq!(schedule.training_window(), Duration::days(7));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [metadata]
            version = "1.0"
            created_at = "2024-03-01T00:00:00Z"
            updated_at = "2024-03-01T00:00:00Z"

            [model]
            aggregation_minutes = 10

            [model.sleep]
            reset_on_wake = true
            cycle_boundary = "wake"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.aggregation_minutes, 10);
        assert!(config.model.sleep.reset_on_wake);
        assert_eq!(config.model.sleep.cycle_boundary, CycleBoundary::Wake);
        assert_eq!(config.model.sleep.sleep_hr, 62.0);
        assert_eq!(config.schedule, ScheduleConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut model = ModelConfig::default();
        model.sleep.sleep_hr = 80.0;
        assert!(model.validate().is_err());

        let mut model = ModelConfig::default();
        model.aggregation_minutes = 0;
        assert!(model.validate().is_err());

        assert!(ModelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.model.calibration.fit_range = FitRange::Week;
        config.save_to_file(&config_path).unwrap();

        let loaded = AppConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.model.calibration.fit_range, FitRange::Week);
    }
}
