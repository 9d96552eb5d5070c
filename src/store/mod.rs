//! Sample sources the orchestrator pulls training and prediction data from

pub mod csv;

use chrono::{DateTime, Utc};
use std::sync::RwLock;

use crate::aggregation::sorted_by_time;
use crate::error::{PacingError, Result, SourceError};
use crate::models::{HeartRateSample, ValidatedEnergySample};

pub use self::csv::CsvSampleStore;

/// Read access to heart-rate and validated-energy history.
///
/// Ranges are inclusive on both ends and results are sorted by time.
pub trait SampleSource: Send + Sync {
    fn heart_rate_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartRateSample>>;

    fn validated_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ValidatedEnergySample>>;

    /// Most recent validated sample, regardless of age
    fn latest_validated(&self) -> Result<Option<ValidatedEnergySample>>;
}

pub(crate) fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start > end {
        return Err(SourceError::InvalidRange {
            start: start.to_rfc3339(),
            end: end.to_rfc3339(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn within<T: Clone>(
    sorted: &[T],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    time: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let lo = sorted.partition_point(|s| time(s) < start);
    let hi = sorted.partition_point(|s| time(s) <= end);
    sorted[lo..hi.max(lo)].to_vec()
}

#[derive(Debug, Default)]
struct Samples {
    heart_rate: Vec<HeartRateSample>,
    validated: Vec<ValidatedEnergySample>,
}

/// Thread-safe in-memory source, kept sorted on insert
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Samples>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(
        heart_rate: &[HeartRateSample],
        validated: &[ValidatedEnergySample],
    ) -> Self {
        Self {
            inner: RwLock::new(Samples {
                heart_rate: sorted_by_time(heart_rate),
                validated: sorted_by_time(validated),
            }),
        }
    }

    pub fn push_heart_rate(&self, samples: &[HeartRateSample]) -> Result<()> {
        let mut inner = self.write()?;
        inner.heart_rate.extend_from_slice(samples);
        inner.heart_rate.sort_by_key(|s| s.timestamp);
        Ok(())
    }

    pub fn push_validated(&self, samples: &[ValidatedEnergySample]) -> Result<()> {
        let mut inner = self.write()?;
        inner.validated.extend_from_slice(samples);
        inner.validated.sort_by_key(|s| s.timestamp);
        Ok(())
    }

    /// Number of (heart-rate, validated) samples held
    pub fn counts(&self) -> (usize, usize) {
        self.inner
            .read()
            .map(|s| (s.heart_rate.len(), s.validated.len()))
            .unwrap_or((0, 0))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Samples>> {
        self.inner
            .read()
            .map_err(|_| PacingError::Internal("sample store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Samples>> {
        self.inner
            .write()
            .map_err(|_| PacingError::Internal("sample store lock poisoned".to_string()))
    }
}

impl SampleSource for InMemoryStore {
    fn heart_rate_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartRateSample>> {
        check_range(start, end)?;
        Ok(within(&self.read()?.heart_rate, start, end, |s| s.timestamp))
    }

    fn validated_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ValidatedEnergySample>> {
        check_range(start, end)?;
        Ok(within(&self.read()?.validated, start, end, |s| s.timestamp))
    }

    fn latest_validated(&self) -> Result<Option<ValidatedEnergySample>> {
        Ok(self.read()?.validated.last().copied())
    }
}
