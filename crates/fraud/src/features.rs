//! Feature extraction
//!
//! Produces a fixed-length vector from a transaction and the sender's
//! recent history. The layout is stable: positions never move, and a
//! failure anywhere yields the all-zero vector instead of an error.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use bipay_core::Transaction;

use crate::error::{ScoringError, ScoringResult};

/// Number of features in a [`FeatureVector`]
pub const FEATURE_DIM: usize = 18;

/// Feature names, index-aligned with [`FeatureVector`]
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "amount",
    "log_amount",
    "amount_digits",
    "hour",
    "weekday",
    "history_count",
    "history_mean",
    "history_std",
    "history_median",
    "history_max",
    "history_min",
    "gap_mean_secs",
    "gap_std_secs",
    "rapid_gap_ratio",
    "last_hour_count",
    "last_day_count",
    "last_hour_amount",
    "last_day_amount",
];

const HOUR_SECS: i64 = 3_600;
const DAY_SECS: i64 = 86_400;
const RAPID_GAP_SECS: f64 = 300.0;

/// Fixed-shape numeric feature vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_DIM])
    }

    pub fn from_array(values: [f64; FEATURE_DIM]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    /// Value of a named feature
    pub fn named(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::zeros()
    }
}

/// One prior transaction of the sender, as seen by the scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub amount: f64,
    /// ISO-8601 / RFC 3339 timestamp; malformed values are skipped
    pub timestamp: String,
    #[serde(default)]
    pub transaction_type: Option<String>,
}

impl HistoryEntry {
    pub fn new(amount: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            amount,
            timestamp: timestamp.to_rfc3339(),
            transaction_type: None,
        }
    }

    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            amount: tx.amount.as_f64(),
            timestamp: tx.created_at.to_rfc3339(),
            transaction_type: Some(tx.transaction_type.to_string()),
        }
    }

    fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp).ok()
    }
}

/// The transaction being scored
///
/// Fields are optional: a missing amount counts as zero, a missing
/// timestamp as "now".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringSubject {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ScoringSubject {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: Some(tx.id.clone()),
            amount: Some(tx.amount.as_f64()),
            timestamp: Some(tx.created_at.to_rfc3339()),
        }
    }

    pub(crate) fn amount(&self) -> ScoringResult<f64> {
        let amount = self.amount.unwrap_or(0.0);
        if !amount.is_finite() {
            return Err(ScoringError::NonFiniteAmount(amount));
        }
        Ok(amount)
    }

    pub(crate) fn time(&self, fallback: DateTime<Utc>) -> ScoringResult<DateTime<Utc>> {
        match &self.timestamp {
            Some(raw) => parse_timestamp(raw),
            None => Ok(fallback),
        }
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC
pub fn parse_timestamp(raw: &str) -> ScoringResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(ScoringError::MalformedTimestamp(raw.to_string()))
}

/// Stateless, deterministic feature extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract features, falling back to the zero vector on any failure
    pub fn extract(&self, subject: &ScoringSubject, history: &[HistoryEntry]) -> FeatureVector {
        self.extract_at(subject, history, Utc::now())
    }

    /// Like [`extract`](Self::extract) with an explicit "now" for subjects
    /// that carry no timestamp
    pub fn extract_at(
        &self,
        subject: &ScoringSubject,
        history: &[HistoryEntry],
        now: DateTime<Utc>,
    ) -> FeatureVector {
        match self.try_extract(subject, history, now) {
            Ok(features) => features,
            Err(e) => {
                error!(error = %e, "Feature extraction failed, using zero vector");
                FeatureVector::zeros()
            }
        }
    }

    fn try_extract(
        &self,
        subject: &ScoringSubject,
        history: &[HistoryEntry],
        now: DateTime<Utc>,
    ) -> ScoringResult<FeatureVector> {
        let amount = subject.amount()?;
        let at = subject.time(now)?;

        let amounts: Vec<f64> = history
            .iter()
            .map(|h| h.amount)
            .filter(|a| a.is_finite())
            .collect();

        let mut times: Vec<DateTime<Utc>> = Vec::with_capacity(history.len());
        let mut dated: Vec<(DateTime<Utc>, f64)> = Vec::with_capacity(history.len());
        for entry in history {
            match entry.parsed_timestamp() {
                Some(ts) => {
                    times.push(ts);
                    if entry.amount.is_finite() {
                        dated.push((ts, entry.amount));
                    }
                }
                None => warn!(timestamp = %entry.timestamp, "Skipping history entry with malformed timestamp"),
            }
        }
        times.sort();

        let mut values = [0.0; FEATURE_DIM];

        // Transaction
        values[0] = amount;
        values[1] = amount.max(0.0).ln_1p();
        values[2] = integer_digits(amount);
        values[3] = f64::from(at.hour());
        values[4] = f64::from(at.weekday().num_days_from_monday());

        // History aggregates
        if !amounts.is_empty() {
            values[5] = amounts.len() as f64;
            values[6] = mean(&amounts);
            values[7] = population_std(&amounts);
            values[8] = median(&amounts);
            values[9] = amounts.iter().cloned().fold(f64::MIN, f64::max);
            values[10] = amounts.iter().cloned().fold(f64::MAX, f64::min);
        }

        // Inter-arrival gaps
        if times.len() >= 2 {
            let gaps: Vec<f64> = times
                .windows(2)
                .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
                .collect();
            values[11] = mean(&gaps);
            values[12] = if gaps.len() >= 2 { population_std(&gaps) } else { 0.0 };
            values[13] = gaps.iter().filter(|g| **g < RAPID_GAP_SECS).count() as f64 / gaps.len() as f64;
        }

        // Velocity relative to the scored transaction
        for (ts, value) in &dated {
            let age = (at - *ts).num_seconds();
            if age < 0 {
                continue;
            }
            if age <= HOUR_SECS {
                values[14] += 1.0;
                values[16] += value;
            }
            if age <= DAY_SECS {
                values[15] += 1.0;
                values[17] += value;
            }
        }

        for (name, value) in FEATURE_NAMES.iter().zip(values.iter()) {
            if !value.is_finite() {
                return Err(ScoringError::NonFiniteFeature {
                    name: *name,
                    value: *value,
                });
            }
        }

        Ok(FeatureVector(values))
    }
}

fn integer_digits(amount: f64) -> f64 {
    format!("{:.0}", amount.abs().trunc()).len() as f64
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
