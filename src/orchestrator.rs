//! Periodic retraining and forecasting
//!
//! The orchestrator owns the current [`ModelSnapshot`] behind an
//! `RwLock<Arc<_>>`. Retraining builds a complete new snapshot off to the side
//! and publishes it with a single pointer swap, so predictions always see a
//! consistent parameter set and never wait for a fit to finish.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregation::aggregate_heart_rate;
use crate::calibration::CrossCycleAggregator;
use crate::config::{ModelConfig, ScheduleConfig};
use crate::decay::DecayEstimator;
use crate::forecast::{ForecastInput, Forecaster, ModelSnapshot, TrainingSummary};
use crate::models::{EnergyForecastResult, ModelParameters};
use crate::store::SampleSource;

const FORECAST_CHANNEL_CAPACITY: usize = 16;

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What a retrain run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// Personal parameters were published
    Trained {
        used_days: usize,
        total_days: usize,
        loss: f64,
    },
    /// No cycle produced an acceptable fit; defaults were published
    Defaulted { total_days: usize },
    /// Not enough data; the previous snapshot was kept
    Skipped { reason: String },
}

impl fmt::Display for TrainingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingOutcome::Trained {
                used_days,
                total_days,
                loss,
            } => write!(f, "trained on {}/{} cycles (loss {:.2})", used_days, total_days, loss),
            TrainingOutcome::Defaulted { total_days } => {
                write!(f, "no usable fit in {} cycles, using defaults", total_days)
            }
            TrainingOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

fn skipped(reason: impl Into<String>) -> (Option<ModelSnapshot>, TrainingOutcome) {
    (
        None,
        TrainingOutcome::Skipped {
            reason: reason.into(),
        },
    )
}

fn tick_period(every: Duration) -> std::time::Duration {
    every
        .to_std()
        .unwrap_or_default()
        .max(std::time::Duration::from_secs(1))
}

/// Drives retraining and prediction against a sample source
pub struct Orchestrator<S: SampleSource> {
    source: Arc<S>,
    model: ModelConfig,
    schedule: ScheduleConfig,
    aggregator: CrossCycleAggregator,
    decay: DecayEstimator,
    forecaster: Forecaster,
    snapshot: RwLock<Arc<ModelSnapshot>>,
    forecasts: broadcast::Sender<EnergyForecastResult>,
    new_data: Notify,
    clock: Clock,
}

impl<S: SampleSource + 'static> fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("schedule", &self.schedule)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl<S: SampleSource + 'static> Orchestrator<S> {
    pub fn new(source: Arc<S>, model: ModelConfig, schedule: ScheduleConfig) -> Self {
        let (forecasts, _) = broadcast::channel(FORECAST_CHANNEL_CAPACITY);
        Self {
            aggregator: CrossCycleAggregator::with_config(&model),
            decay: DecayEstimator::with_config(model.decay.clone(), model.utc_offset_minutes),
            forecaster: Forecaster::with_config(&model, &schedule),
            snapshot: RwLock::new(Arc::new(ModelSnapshot::default())),
            source,
            model,
            schedule,
            forecasts,
            new_data: Notify::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock used by the background loops
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current snapshot; cheap to call from any thread
    pub fn snapshot(&self) -> Arc<ModelSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn publish(&self, snapshot: ModelSnapshot) {
        let next = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Receive every forecast produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EnergyForecastResult> {
        self.forecasts.subscribe()
    }

    /// Ask the prediction loop for an immediate forecast
    pub fn notify_new_data(&self) {
        self.new_data.notify_one();
    }

    /// Retrain from the training window ending at `now` and publish the result
    #[tracing::instrument(skip(self))]
    pub fn retrain(&self, now: DateTime<Utc>) -> TrainingOutcome {
        let (snapshot, outcome) = self.train(now);
        if let Some(snapshot) = snapshot {
            self.publish(snapshot);
        }
        outcome
    }

    /// Fit a new snapshot without publishing it
    fn train(&self, now: DateTime<Utc>) -> (Option<ModelSnapshot>, TrainingOutcome) {
        let start = now - self.schedule.training_window();

        let heart_rate = match self.source.heart_rate_between(start, now) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Could not read heart rate for training");
                return skipped(format!("heart rate unavailable: {}", e));
            }
        };
        let validated = match self.source.validated_between(start, now) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Could not read validated energy for training");
                return skipped(format!("validated energy unavailable: {}", e));
            }
        };

        if heart_rate.is_empty() {
            return skipped("no heart rate in the training window");
        }
        if validated.is_empty() {
            return skipped("no validated energy in the training window");
        }

        let aggregated = aggregate_heart_rate(&heart_rate, self.model.aggregation_width());
        let min_buckets = self.model.calibration.min_heart_rate_buckets;
        if aggregated.len() < min_buckets {
            return skipped(format!(
                "{} heart-rate buckets, need {}",
                aggregated.len(),
                min_buckets
            ));
        }

        let result = self.aggregator.auto_fit(&aggregated, &validated);
        let decay = self.decay.compute_profile(&validated);

        let (parameters, outcome) = if result.used_days > 0 {
            (
                result.parameters,
                TrainingOutcome::Trained {
                    used_days: result.used_days,
                    total_days: result.total_days,
                    loss: result.loss,
                },
            )
        } else {
            (
                ModelParameters::default(),
                TrainingOutcome::Defaulted {
                    total_days: result.total_days,
                },
            )
        };

        info!(
            decay_pairs = decay.data_points_used,
            "Retrain {}: {}",
            outcome,
            parameters
        );

        let snapshot = ModelSnapshot {
            parameters,
            decay,
            trained_at: Some(now),
            training: Some(TrainingSummary::from(&result)),
        };
        (Some(snapshot), outcome)
    }

    /// Forecast at `now` from the current snapshot and broadcast it
    #[tracing::instrument(skip(self))]
    pub fn predict(&self, now: DateTime<Utc>) -> EnergyForecastResult {
        let heart_rate = self
            .source
            .heart_rate_between(now - self.schedule.prediction_window(), now)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not read recent heart rate");
                Vec::new()
            });
        let validated = self
            .source
            .validated_between(now - self.schedule.anchor_window(), now)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not read recent validated energy");
                Vec::new()
            });
        let latest_validated = self.source.latest_validated().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read latest validated energy");
            None
        });

        let snapshot = self.snapshot();
        let result = self.forecaster.predict(
            &snapshot,
            ForecastInput {
                heart_rate: &heart_rate,
                validated: &validated,
                latest_validated,
            },
            now,
        );

        debug!(
            source = ?result.source,
            now = result.percentage_now,
            future = result.percentage_future,
            "Forecast ready"
        );

        // No subscribers is fine
        let _ = self.forecasts.send(result.clone());
        result
    }

    /// Start the retrain and predict loops.
    ///
    /// A fit already running on the blocking pool when shutdown is signalled
    /// is abandoned, not interrupted: its result is dropped, but the thread
    /// runs to completion, and dropping the runtime waits for it. Hosts that
    /// exit right after shutdown should use `Runtime::shutdown_timeout`.
    pub fn spawn(self: &Arc<Self>) -> OrchestratorHandle {
        let (shutdown, rx) = watch::channel(false);
        let retrain = tokio::spawn(Arc::clone(self).retrain_loop(rx.clone()));
        let predict = tokio::spawn(Arc::clone(self).predict_loop(rx));
        OrchestratorHandle {
            shutdown,
            tasks: vec![retrain, predict],
        }
    }

    /// Run both loops until shutdown is signalled
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        tokio::join!(
            Arc::clone(&self).retrain_loop(shutdown.clone()),
            self.predict_loop(shutdown)
        );
    }

    async fn retrain_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(tick_period(self.schedule.retrain_every()));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let now = (self.clock)();
            let worker = Arc::clone(&self);
            let job = tokio::task::spawn_blocking(move || worker.train(now));

            let joined = tokio::select! {
                joined = job => joined,
                _ = shutdown.changed() => {
                    debug!("Shutdown during retrain, discarding result");
                    break;
                }
            };

            match joined {
                Ok((snapshot, outcome)) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Some(snapshot) = snapshot {
                        self.publish(snapshot);
                    }
                    debug!(%outcome, "Scheduled retrain finished");
                }
                Err(e) => warn!(error = %e, "Retrain task failed"),
            }
        }

        debug!("Retrain loop stopped");
    }

    async fn predict_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(tick_period(self.schedule.predict_every()));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.new_data.notified() => debug!("New data, predicting early"),
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            self.predict((self.clock)());
        }

        debug!("Predict loop stopped");
    }
}

/// Stops the background loops started by [`Orchestrator::spawn`]
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// Signal both loops and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Orchestrator task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForecastSource, HeartRateSample, ValidatedEnergySample};
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap()
    }

    fn orchestrator(store: InMemoryStore) -> Orchestrator<InMemoryStore> {
        Orchestrator::new(
            Arc::new(store),
            ModelConfig::default(),
            ScheduleConfig::default(),
        )
    }

    #[test]
    fn test_empty_source_skips_and_keeps_defaults() {
        let orch = orchestrator(InMemoryStore::new());

        let outcome = orch.retrain(now());

        assert!(matches!(outcome, TrainingOutcome::Skipped { .. }));
        assert_eq!(*orch.snapshot(), ModelSnapshot::default());
    }

    #[test]
    fn test_too_few_buckets_skips() {
        let hr: Vec<HeartRateSample> = (0..5)
            .map(|i| HeartRateSample::new(now() - Duration::minutes(15 * i), 70.0))
            .collect();
        let validated = [ValidatedEnergySample::new(now(), 60.0)];
        let orch = orchestrator(InMemoryStore::with_samples(&hr, &validated));

        match orch.retrain(now()) {
            TrainingOutcome::Skipped { reason } => assert!(reason.contains("buckets")),
            other => panic!("unexpected outcome: {other}"),
        }
        assert!(orch.snapshot().trained_at.is_none());
    }

    #[test]
    fn test_no_cycles_publishes_defaults() {
        // A day of awake-level heart rate never shows a sleep phase
        let hr: Vec<HeartRateSample> = (0..96)
            .map(|i| HeartRateSample::new(now() - Duration::minutes(15 * i), 85.0))
            .collect();
        let validated = [
            ValidatedEnergySample::new(now() - Duration::hours(6), 70.0),
            ValidatedEnergySample::new(now() - Duration::hours(2), 60.0),
        ];
        let orch = orchestrator(InMemoryStore::with_samples(&hr, &validated));

        let outcome = orch.retrain(now());

        assert_eq!(outcome, TrainingOutcome::Defaulted { total_days: 0 });
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.parameters, ModelParameters::default());
        assert_eq!(snapshot.trained_at, Some(now()));
    }

    #[test]
    fn test_predict_broadcasts() {
        let validated = [ValidatedEnergySample::new(now() - Duration::hours(1), 80.0)];
        let orch = orchestrator(InMemoryStore::with_samples(&[], &validated));
        let mut rx = orch.subscribe();

        let result = orch.predict(now());

        assert_eq!(result.source, ForecastSource::DecayFallback);
        assert_eq!(rx.try_recv().unwrap(), result);
    }

    #[test]
    fn test_snapshot_is_shared_until_swapped() {
        let orch = orchestrator(InMemoryStore::new());
        let before = orch.snapshot();
        assert!(Arc::ptr_eq(&before, &orch.snapshot()));

        orch.publish(ModelSnapshot {
            trained_at: Some(now()),
            ..ModelSnapshot::default()
        });

        assert!(!Arc::ptr_eq(&before, &orch.snapshot()));
        assert!(before.trained_at.is_none());
    }
}
