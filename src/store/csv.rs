//! CSV-file-backed sample source
//!
//! Heart rate: `timestamp,bpm`. Validated energy:
//! `timestamp,percentage[,validation]`. Column names are matched
//! case-insensitively against a few common aliases.

use ::csv::{ReaderBuilder, StringRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{InMemoryStore, SampleSource};
use crate::error::{Result, SourceError};
use crate::models::{HeartRateSample, ValidatedEnergySample, ValidationKind};

const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "time", "datetime", "date_time"];
const BPM_ALIASES: &[&str] = &["bpm", "heart_rate", "heartrate", "hr"];
const PERCENTAGE_ALIASES: &[&str] = &["percentage", "energy", "level", "pct", "energy_level"];
const VALIDATION_ALIASES: &[&str] = &["validation", "validation_kind", "kind"];

/// Parse a timestamp in RFC 3339, a common naive format (taken as UTC) or
/// epoch seconds
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%d/%m/%Y %H:%M:%S",
    ];
    for format in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

fn column_index(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    let by_name: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (normalize(h), i))
        .collect();
    aliases.iter().find_map(|a| by_name.get(*a).copied())
}

fn parse_error(path: &Path, record: usize, reason: impl Into<String>) -> SourceError {
    SourceError::ParseError {
        path: path.to_path_buf(),
        record,
        reason: reason.into(),
    }
}

fn required_column(path: &Path, headers: &StringRecord, aliases: &[&str]) -> Result<usize> {
    column_index(headers, aliases).ok_or_else(|| {
        parse_error(path, 0, format!("missing column '{}'", aliases[0])).into()
    })
}

fn field<'r>(record: &'r StringRecord, index: usize) -> &'r str {
    record.get(index).map(str::trim).unwrap_or("")
}

fn timestamp_field(path: &Path, row: usize, record: &StringRecord, index: usize) -> Result<DateTime<Utc>> {
    let raw = field(record, index);
    parse_timestamp(raw)
        .ok_or_else(|| parse_error(path, row, format!("unparseable timestamp '{}'", raw)).into())
}

fn number_field(path: &Path, row: usize, record: &StringRecord, index: usize) -> Result<f64> {
    let raw = field(record, index);
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(parse_error(path, row, format!("invalid number '{}'", raw)).into()),
    }
}

/// Read a heart-rate CSV file
pub fn read_heart_rate(path: &Path) -> Result<Vec<HeartRateSample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let ts = required_column(path, &headers, TIMESTAMP_ALIASES)?;
    let bpm = required_column(path, &headers, BPM_ALIASES)?;

    let mut samples = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        samples.push(HeartRateSample::new(
            timestamp_field(path, row, &record, ts)?,
            number_field(path, row, &record, bpm)?,
        ));
    }

    debug!(path = %path.display(), samples = samples.len(), "Read heart-rate samples");
    Ok(samples)
}

/// Read a validated-energy CSV file
pub fn read_validated(path: &Path) -> Result<Vec<ValidatedEnergySample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let ts = required_column(path, &headers, TIMESTAMP_ALIASES)?;
    let pct = required_column(path, &headers, PERCENTAGE_ALIASES)?;
    let kind = column_index(&headers, VALIDATION_ALIASES);

    let mut samples = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let percentage = number_field(path, row, &record, pct)?;
        if !(0.0..=100.0).contains(&percentage) {
            return Err(parse_error(path, row, format!("percentage {} outside 0-100", percentage)).into());
        }
        let validation = match kind {
            Some(index) => field(&record, index)
                .parse::<ValidationKind>()
                .map_err(|e| parse_error(path, row, e))?,
            None => ValidationKind::default(),
        };
        samples.push(ValidatedEnergySample {
            timestamp: timestamp_field(path, row, &record, ts)?,
            percentage,
            validation,
        });
    }

    debug!(path = %path.display(), samples = samples.len(), "Read validated energy samples");
    Ok(samples)
}

/// Source backed by a pair of CSV files, loaded into memory
#[derive(Debug)]
pub struct CsvSampleStore {
    heart_rate_path: PathBuf,
    validated_path: PathBuf,
    samples: InMemoryStore,
}

impl CsvSampleStore {
    pub fn open(heart_rate_path: impl Into<PathBuf>, validated_path: impl Into<PathBuf>) -> Result<Self> {
        let heart_rate_path = heart_rate_path.into();
        let validated_path = validated_path.into();
        let heart_rate = read_heart_rate(&heart_rate_path)?;
        let validated = read_validated(&validated_path)?;

        info!(
            heart_rate = heart_rate.len(),
            validated = validated.len(),
            "Loaded CSV samples"
        );

        Ok(Self {
            heart_rate_path,
            validated_path,
            samples: InMemoryStore::with_samples(&heart_rate, &validated),
        })
    }

    /// Re-read both files from disk
    pub fn reload(&mut self) -> Result<()> {
        let heart_rate = read_heart_rate(&self.heart_rate_path)?;
        let validated = read_validated(&self.validated_path)?;
        self.samples = InMemoryStore::with_samples(&heart_rate, &validated);
        Ok(())
    }

    /// Every loaded sample, sorted
    pub fn all(&self) -> Result<(Vec<HeartRateSample>, Vec<ValidatedEnergySample>)> {
        let heart_rate = self
            .samples
            .heart_rate_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)?;
        let validated = self
            .samples
            .validated_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)?;
        Ok((heart_rate, validated))
    }
}

impl SampleSource for CsvSampleStore {
    fn heart_rate_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartRateSample>> {
        self.samples.heart_rate_between(start, end)
    }

    fn validated_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ValidatedEnergySample>> {
        self.samples.validated_between(start, end)
    }

    fn latest_validated(&self) -> Result<Option<ValidatedEnergySample>> {
        self.samples.latest_validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PacingError;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T08:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T09:30:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 08:30"), Some(expected));
        assert_eq!(parse_timestamp(&expected.timestamp().to_string()), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_reads_both_files_with_aliases() {
        let hr = write_file("Time,Heart Rate\n2024-03-01 08:15:00,72\n2024-03-01 08:00:00,70\n");
        let energy = write_file(
            "timestamp,energy,kind\n2024-03-01T07:00:00Z,80,correct\n2024-03-01T09:00:00Z,65,adjusted\n",
        );

        let store = CsvSampleStore::open(hr.path(), energy.path()).unwrap();
        let (heart_rate, validated) = store.all().unwrap();

        assert_eq!(heart_rate.len(), 2);
        assert_eq!(heart_rate[0].bpm, 70.0);
        assert_eq!(validated[1].validation, ValidationKind::Adjusted);
        assert_eq!(store.latest_validated().unwrap().unwrap().percentage, 65.0);
    }

    #[test]
    fn test_bad_record_reports_row() {
        let hr = write_file("timestamp,bpm\n2024-03-01 08:00:00,70\n2024-03-01 08:01:00,fast\n");

        let err = read_heart_rate(hr.path()).unwrap_err();

        match err {
            PacingError::Source(SourceError::ParseError { record, .. }) => assert_eq!(record, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_finite_values_rejected() {
        for bad in ["NaN", "inf", "-infinity"] {
            let hr = write_file(&format!(
                "timestamp,bpm\n2024-03-01 08:00:00,70\n2024-03-01 08:01:00,{}\n",
                bad
            ));
            match read_heart_rate(hr.path()).unwrap_err() {
                PacingError::Source(SourceError::ParseError { record, .. }) => assert_eq!(record, 2),
                other => panic!("unexpected error for {bad}: {other}"),
            }
        }

        let energy = write_file("timestamp,percentage\n2024-03-01 08:00:00,NaN\n");
        assert!(read_validated(energy.path()).is_err());
    }

    #[test]
    fn test_missing_column() {
        let energy = write_file("timestamp,mood\n2024-03-01 08:00:00,ok\n");
        assert!(read_validated(energy.path()).is_err());
    }

    #[test]
    fn test_out_of_range_percentage() {
        let energy = write_file("timestamp,percentage\n2024-03-01 08:00:00,140\n");
        assert!(read_validated(energy.path()).is_err());
    }
}
