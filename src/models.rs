use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything positioned on the time axis
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// A single heart-rate reading (or an aggregated bucket mean)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Time of the reading; bucket start when aggregated
    pub timestamp: DateTime<Utc>,

    /// Beats per minute
    pub bpm: f64,
}

impl HeartRateSample {
    pub fn new(timestamp: DateTime<Utc>, bpm: f64) -> Self {
        Self { timestamp, bpm }
    }
}

/// How the user confirmed an energy rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationKind {
    /// The displayed prediction was confirmed as-is
    #[default]
    Correct,
    /// The user corrected the displayed prediction
    Adjusted,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationKind::Correct => write!(f, "correct"),
            ValidationKind::Adjusted => write!(f, "adjusted"),
        }
    }
}

impl std::str::FromStr for ValidationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "correct" | "" => Ok(ValidationKind::Correct),
            "adjusted" => Ok(ValidationKind::Adjusted),
            _ => Err(format!("Invalid validation kind: {}", s)),
        }
    }
}

/// A self-reported, confirmed energy level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedEnergySample {
    /// When the rating was made
    pub timestamp: DateTime<Utc>,

    /// Energy level on the 0-100 scale
    pub percentage: f64,

    /// Whether the rating confirmed or corrected the prediction
    #[serde(default)]
    pub validation: ValidationKind,
}

impl ValidatedEnergySample {
    pub fn new(timestamp: DateTime<Utc>, percentage: f64) -> Self {
        Self {
            timestamp,
            percentage,
            validation: ValidationKind::Correct,
        }
    }
}

/// Approximate RMSSD derived from a short window of heart-rate samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvSample {
    pub timestamp: DateTime<Utc>,
    pub rmssd: f64,
}

/// A detected stretch of sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepPhase {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SleepPhase {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// One sleep-to-sleep day used as a calibration unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepCycle {
    /// Inclusive start
    pub start: DateTime<Utc>,

    /// Exclusive end
    pub end: DateTime<Utc>,

    /// Calendar date (YYYY-MM-DD) of the start
    pub label: String,
}

impl SleepCycle {
    /// Half-open membership test
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// Data of a single cycle ready for fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleTrainingSet {
    pub cycle: SleepCycle,

    /// Aggregated heart rate inside the cycle, sorted
    pub heart_rate: Vec<HeartRateSample>,

    /// Validated energy inside the cycle, sorted
    pub validated: Vec<ValidatedEnergySample>,

    /// Last validated value before the cycle started (50 when none)
    pub start_energy: f64,
}

/// Parameters of the drain/recovery model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Heart rate below which energy recovers
    pub hr_low: f64,

    /// Heart rate above which energy drains
    pub hr_high: f64,

    /// Drain scaling, > 0
    pub drain_factor: f64,

    /// Recovery scaling, > 0
    pub recovery_factor: f64,

    /// Subtracted from simulated energy before reporting
    pub energy_offset: f64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            hr_low: 60.0,
            hr_high: 100.0,
            drain_factor: 1.0,
            recovery_factor: 1.0,
            energy_offset: 0.0,
        }
    }
}

impl ModelParameters {
    pub fn new(hr_low: f64, hr_high: f64, drain_factor: f64, recovery_factor: f64) -> Self {
        Self {
            hr_low,
            hr_high,
            drain_factor,
            recovery_factor,
            energy_offset: 0.0,
        }
    }

    /// hr_low < hr_high and both factors strictly positive
    pub fn is_valid(&self) -> bool {
        self.hr_low < self.hr_high && self.drain_factor > 0.0 && self.recovery_factor > 0.0
    }

    pub fn with_offset(mut self, energy_offset: f64) -> Self {
        self.energy_offset = energy_offset;
        self
    }
}

impl fmt::Display for ModelParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hr_low={:.1} hr_high={:.1} drain={:.2} recovery={:.2} offset={:.1}",
            self.hr_low, self.hr_high, self.drain_factor, self.recovery_factor, self.energy_offset
        )
    }
}

/// Per-cycle calibration result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayFitResult {
    pub hr_low: f64,
    pub hr_high: f64,
    pub drain_factor: f64,
    pub recovery_factor: f64,

    /// Mean squared error against validated samples
    pub loss: f64,

    /// Median of simulated minus validated at the fitted parameters
    pub energy_offset: f64,

    /// Cycle label (YYYY-MM-DD)
    pub label: String,

    /// Number of validated samples in the cycle
    pub data_points: usize,
}

impl DayFitResult {
    pub fn parameters(&self) -> ModelParameters {
        ModelParameters {
            hr_low: self.hr_low,
            hr_high: self.hr_high,
            drain_factor: self.drain_factor,
            recovery_factor: self.recovery_factor,
            energy_offset: self.energy_offset,
        }
    }
}

/// Result of calibrating across all usable cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFitResult {
    pub parameters: ModelParameters,

    /// Aggregated loss; infinite when nothing could be fitted
    pub loss: f64,

    /// Every per-cycle fit, accepted or not
    pub day_results: Vec<DayFitResult>,

    /// Cycles whose fit was accepted
    pub used_days: usize,

    /// Usable cycles before range filtering
    pub total_days: usize,
}

/// Which recent cycles take part in calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitRange {
    #[default]
    All,
    Month,
    Week,
}

impl FitRange {
    /// Look-back from the most recent cycle start; None keeps everything
    pub fn lookback(&self) -> Option<chrono::Duration> {
        match self {
            FitRange::All => None,
            FitRange::Month => Some(chrono::Duration::days(30)),
            FitRange::Week => Some(chrono::Duration::days(7)),
        }
    }
}

impl std::str::FromStr for FitRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(FitRange::All),
            "month" => Ok(FitRange::Month),
            "week" => Ok(FitRange::Week),
            _ => Err(format!("Invalid fit range: {}", s)),
        }
    }
}

/// How per-cycle parameters are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[default]
    Median,
    /// Mean after dropping values outside 1.5 IQR
    Iqr,
}

/// Hourly energy decay learned from consecutive validated samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayRateProfile {
    /// Percentage points lost per hour (negative means energy tends to rise)
    pub average_hourly_decay: f64,
    pub morning: Option<f64>,
    pub afternoon: Option<f64>,
    pub evening: Option<f64>,
    pub night: Option<f64>,
    pub data_points_used: usize,
}

impl Default for DecayRateProfile {
    fn default() -> Self {
        Self {
            average_hourly_decay: 3.0,
            morning: None,
            afternoon: None,
            evening: None,
            night: None,
            data_points_used: 0,
        }
    }
}

/// Which path produced a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSource {
    HeartRateModel,
    DecayFallback,
}

impl fmt::Display for ForecastSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastSource::HeartRateModel => write!(f, "heart-rate model"),
            ForecastSource::DecayFallback => write!(f, "decay fallback"),
        }
    }
}

/// Energy now and at the forecast horizon, both in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyForecastResult {
    pub time: DateTime<Utc>,
    pub percentage_now: f64,
    pub time_future: DateTime<Utc>,
    pub percentage_future: f64,
    pub source: ForecastSource,
}

/// One simulator output point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPoint {
    /// Shifted by the heart-rate-to-energy lag
    pub timestamp: DateTime<Utc>,

    /// Reported energy after offset, in [0, 100]
    pub energy: f64,

    /// Drain multiplier applied at this step
    pub hrv_multiplier: f64,
}

impl Timestamped for HeartRateSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for ValidatedEnergySample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for HrvSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for SimulatedPoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
