// Library interface for the pacing model
// The `pacing` binary and the integration tests build on these modules

pub mod aggregation;
pub mod calibration;
pub mod config;
pub mod decay;
pub mod error;
pub mod evaluation;
pub mod forecast;
pub mod hrv;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod simulator;
pub mod sleep;
pub mod stats;
pub mod store;
pub mod timeline;

// Re-export commonly used types for convenience
pub use models::*;
pub use aggregation::aggregate_heart_rate;
pub use calibration::{Calibrator, CrossCycleAggregator, NelderMead};
pub use config::{AppConfig, ModelConfig, ScheduleConfig};
pub use decay::DecayEstimator;
pub use evaluation::{evaluate_model, EvaluationReport, ModelEvaluator};
pub use forecast::{ForecastInput, Forecaster, ModelSnapshot, TrainingSummary};
pub use hrv::HrvEstimator;
pub use orchestrator::{Orchestrator, OrchestratorHandle, TrainingOutcome};
pub use simulator::EnergySimulator;
pub use sleep::SleepDetector;
pub use store::{CsvSampleStore, InMemoryStore, SampleSource};
pub use error::{PacingError, Result};
pub use logging::{LogConfig, LogLevel, LogFormat};
