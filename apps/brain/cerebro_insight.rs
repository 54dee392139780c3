//! # Cerebro Insight - Anomaly Detection & Capacity Forecasting
//!
//! The analytics core of the Cerebro AIOps platform. It consumes a stream of
//! numeric metric samples and emits anomaly records and pre-emptive capacity
//! alerts. It does not fetch, store or render anything itself: collectors,
//! persistence and dashboards are the caller's business.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          CEREBRO INSIGHT CORE                               │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  MetricSample ──► AnomalyDetector (window → scaler → isolation forest)      │
//! │        │                  └──► AnomalyRecord                                │
//! │        └───────► PerformancePredictor (EMA + linear trend)                  │
//! │                           └──► ForecastResult { predictions, alerts }       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two components never call each other. [`InsightEngine`] feeds both from
//! the same stream and merges their output into a [`PipelineReport`].
//!
//! ## Author
//!
//! AIOps Team

// ============================================================================
// SECTION 1: IMPORTS & DEPENDENCIES
// ============================================================================

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

// ----------------------------------------------------------------------------
// Standard Library Imports
// ----------------------------------------------------------------------------
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io::{self, Write};
use std::ops::Index;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ----------------------------------------------------------------------------
// Async Runtime - Tokio
// ----------------------------------------------------------------------------
use tokio::signal;
use tokio::time::interval;

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ----------------------------------------------------------------------------
// String & Memory Optimization
// ----------------------------------------------------------------------------
use compact_str::{format_compact, CompactString};
use smallvec::SmallVec;

// ----------------------------------------------------------------------------
// Error Handling
// ----------------------------------------------------------------------------
use anyhow::{Context as AnyhowContext, Result as AnyhowResult};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Logging & Tracing
// ----------------------------------------------------------------------------
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ----------------------------------------------------------------------------
// Time & Timestamps
// ----------------------------------------------------------------------------
use chrono::{DateTime, Utc};

// ----------------------------------------------------------------------------
// Statistics & Math
// ----------------------------------------------------------------------------
use ordered_float::OrderedFloat;
use rand::seq::index::sample as sample_indices;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// ----------------------------------------------------------------------------
// Configuration & Validation
// ----------------------------------------------------------------------------
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use validator::{Validate, ValidationErrors};

// ----------------------------------------------------------------------------
// CLI
// ----------------------------------------------------------------------------
use clap::{Parser, Subcommand};

// ----------------------------------------------------------------------------
// Prometheus
// ----------------------------------------------------------------------------
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry as PrometheusRegistry, TextEncoder};

// ============================================================================
// SECTION 2: CONSTANTS & VERSION INFORMATION
// ============================================================================
// Defaults for every tunable in the pipeline. All of them can be overridden
// through configuration; the constants are what an empty config file means.
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "cerebro-insight";
pub const ENGINE_FULL_NAME: &str = "Cerebro Insight Engine";

// ----------------------------------------------------------------------------
// Feature Schema
// ----------------------------------------------------------------------------

/// Number of dimensions in a feature vector
pub const FEATURE_COUNT: usize = 7;

// ----------------------------------------------------------------------------
// Anomaly Detection
// ----------------------------------------------------------------------------

/// Sliding window capacity (feature vectors)
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Window size at which the outlier model is fitted
pub const DEFAULT_TRAINING_THRESHOLD: usize = 20;

/// Expected fraction of outliers in the training window
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

/// Seed for the isolation forest RNG
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Number of isolation trees
pub const DEFAULT_ISOLATION_TREES: usize = 100;

/// Subsample size per isolation tree (capped at the training set size)
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Decision scores below this are reported as critical
pub const DEFAULT_CRITICAL_SCORE: f64 = -0.5;

/// Most recent window entries used for anomaly attribution
pub const DEFAULT_ATTRIBUTION_LOOKBACK: usize = 10;

/// Window entries required before attribution is attempted
pub const DEFAULT_ATTRIBUTION_MIN_SAMPLES: usize = 5;

/// Floor applied to standard deviations during attribution
pub const DEFAULT_STD_EPSILON: f64 = 1e-6;

// ----------------------------------------------------------------------------
// Forecasting
// ----------------------------------------------------------------------------

/// Smoothing factor for CPU usage
pub const CPU_ALPHA: f64 = 0.3;

/// Smoothing factor for memory usage
pub const MEMORY_ALPHA: f64 = 0.25;

/// Smoothing factor for response time
pub const RESPONSE_TIME_ALPHA: f64 = 0.35;

/// Number of steps predicted per dimension
pub const DEFAULT_FORECAST_HORIZON: usize = 5;

/// History entries considered by a resource-exhaustion forecast
pub const DEFAULT_FORECAST_LOOKBACK: usize = 20;

/// Values used to fit the linear trend
pub const TREND_FIT_LOOKBACK: usize = 10;

/// Values required before a trend is fitted at all
pub const MIN_TREND_POINTS: usize = 3;

/// History entries required before forecasting
pub const DEFAULT_MIN_HISTORY: usize = 5;

/// CPU usage (%) above which exhaustion is predicted
pub const DEFAULT_CPU_THRESHOLD: f64 = 85.0;

/// Memory usage (%) above which exhaustion is predicted
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 85.0;

/// Response time (ms) above which a latency spike is predicted
pub const DEFAULT_LATENCY_THRESHOLD_MS: f64 = 1000.0;

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Rolling sample history kept by the engine
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default delay between replayed samples
pub const DEFAULT_REPLAY_INTERVAL_MS: u64 = 1000;

/// Prefix for environment overrides (`CEREBRO_INSIGHT_DETECTOR__CONTAMINATION=0.2`)
pub const ENV_PREFIX: &str = "CEREBRO_INSIGHT_";

// ============================================================================
// SECTION 3: CORE TYPE SYSTEM
// ============================================================================
// The ordered feature schema, the sample record built on it, and every
// record the pipeline hands back to its caller.
// ============================================================================

// ----------------------------------------------------------------------------
// 3.1 Timestamp - Nanosecond Precision
// ----------------------------------------------------------------------------

/// Timestamp in nanoseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new timestamp from nanoseconds since Unix epoch
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a new timestamp from milliseconds since Unix epoch
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Get the current timestamp
    #[inline]
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    /// Convert to chrono DateTime<Utc>
    #[inline]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }
}

impl Default for Timestamp {
    #[inline]
    fn default() -> Self {
        Self::now()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_nanos_opt().unwrap_or(0))
    }
}

// ----------------------------------------------------------------------------
// 3.2 Metric Fields - The Ordered Feature Schema
// ----------------------------------------------------------------------------

/// One named dimension of a [`MetricSample`].
///
/// The declaration order is the feature order: it decides the column layout of
/// every [`FeatureVector`] and breaks ties during anomaly attribution. Training
/// and detection both project through [`MetricField::ALL`], so the two paths
/// cannot disagree on layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MetricField {
    CpuUsage = 0,
    MemoryUsage = 1,
    ResponseTime = 2,
    ErrorRate = 3,
    RequestsPerSec = 4,
    DiskIo = 5,
    NetworkThroughput = 6,
}

impl MetricField {
    /// All fields in feature order.
    pub const ALL: [MetricField; FEATURE_COUNT] = [
        MetricField::CpuUsage,
        MetricField::MemoryUsage,
        MetricField::ResponseTime,
        MetricField::ErrorRate,
        MetricField::RequestsPerSec,
        MetricField::DiskIo,
        MetricField::NetworkThroughput,
    ];

    /// Column of this field in a feature vector
    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }

    /// Field for a feature column
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Snake-case name as it appears in sample payloads
    pub fn name(&self) -> &'static str {
        match self {
            MetricField::CpuUsage => "cpu_usage",
            MetricField::MemoryUsage => "memory_usage",
            MetricField::ResponseTime => "response_time",
            MetricField::ErrorRate => "error_rate",
            MetricField::RequestsPerSec => "requests_per_sec",
            MetricField::DiskIo => "disk_io",
            MetricField::NetworkThroughput => "network_throughput",
        }
    }

    /// Upper-cased name used as an anomaly type
    pub fn label(&self) -> &'static str {
        match self {
            MetricField::CpuUsage => "CPU_USAGE",
            MetricField::MemoryUsage => "MEMORY_USAGE",
            MetricField::ResponseTime => "RESPONSE_TIME",
            MetricField::ErrorRate => "ERROR_RATE",
            MetricField::RequestsPerSec => "REQUESTS_PER_SEC",
            MetricField::DiskIo => "DISK_IO",
            MetricField::NetworkThroughput => "NETWORK_THROUGHPUT",
        }
    }
}

impl Display for MetricField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// 3.3 Metric Sample - THE INPUT UNIT
// ----------------------------------------------------------------------------

/// A single observation produced by an external collector.
///
/// Missing fields deserialize to 0, so a partial payload is never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSample {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub response_time: f64,
    pub error_rate: f64,
    pub requests_per_sec: f64,
    pub disk_io: f64,
    pub network_throughput: f64,
}

impl MetricSample {
    /// Sample with the three forecast dimensions set and everything else 0
    pub fn new(cpu_usage: f64, memory_usage: f64, response_time: f64) -> Self {
        Self {
            cpu_usage,
            memory_usage,
            response_time,
            ..Self::default()
        }
    }

    /// Read a field by schema position
    pub fn get(&self, field: MetricField) -> f64 {
        match field {
            MetricField::CpuUsage => self.cpu_usage,
            MetricField::MemoryUsage => self.memory_usage,
            MetricField::ResponseTime => self.response_time,
            MetricField::ErrorRate => self.error_rate,
            MetricField::RequestsPerSec => self.requests_per_sec,
            MetricField::DiskIo => self.disk_io,
            MetricField::NetworkThroughput => self.network_throughput,
        }
    }

    /// Builder-style field override
    pub fn with_field(mut self, field: MetricField, value: f64) -> Self {
        let slot = match field {
            MetricField::CpuUsage => &mut self.cpu_usage,
            MetricField::MemoryUsage => &mut self.memory_usage,
            MetricField::ResponseTime => &mut self.response_time,
            MetricField::ErrorRate => &mut self.error_rate,
            MetricField::RequestsPerSec => &mut self.requests_per_sec,
            MetricField::DiskIo => &mut self.disk_io,
            MetricField::NetworkThroughput => &mut self.network_throughput,
        };
        *slot = value;
        self
    }

    /// Project onto the ordered feature schema
    #[inline]
    pub fn to_features(&self) -> FeatureVector {
        FeatureVector::from(self)
    }
}

// ----------------------------------------------------------------------------
// 3.4 Feature Vector
// ----------------------------------------------------------------------------

/// Fixed-order numeric projection of a [`MetricSample`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    #[inline]
    pub const fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    #[inline]
    pub fn get(&self, field: MetricField) -> f64 {
        self.0[field.index()]
    }

    #[inline]
    pub fn as_array(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    /// Apply `f` to every column, keeping the order
    pub fn map_columns(&self, mut f: impl FnMut(usize, f64) -> f64) -> Self {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, value) in self.0.iter().enumerate() {
            out[i] = f(i, *value);
        }
        Self(out)
    }
}

impl From<&MetricSample> for FeatureVector {
    fn from(sample: &MetricSample) -> Self {
        let mut values = [0.0; FEATURE_COUNT];
        for field in MetricField::ALL {
            values[field.index()] = sample.get(field);
        }
        Self(values)
    }
}

impl Index<usize> for FeatureVector {
    type Output = f64;

    #[inline]
    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

// ----------------------------------------------------------------------------
// 3.5 Severity
// ----------------------------------------------------------------------------

/// Severity attached to anomalies and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    /// Needs attention
    Warning = 0,
    /// Immediate action required
    Critical = 1,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Severity for an isolation-forest decision score
    pub fn from_score(score: f64, critical_threshold: f64) -> Self {
        if score < critical_threshold {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Warning
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// 3.6 Anomaly Type & Anomaly Record
// ----------------------------------------------------------------------------

/// Dimension an anomaly is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyType {
    /// The field with the largest deviation from recent history
    Field(MetricField),
    /// Too little history to attribute
    Unknown,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Field(field) => field.label(),
            AnomalyType::Unknown => "UNKNOWN",
        }
    }
}

impl Display for AnomalyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "UNKNOWN" {
            return Ok(AnomalyType::Unknown);
        }
        MetricField::ALL
            .iter()
            .find(|field| field.label() == s)
            .map(|field| AnomalyType::Field(*field))
            .ok_or_else(|| format!("unknown anomaly type '{}'", s))
    }
}

impl Serialize for AnomalyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AnomalyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Output of a positive detection. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Always true; kept for payload compatibility with downstream consumers
    pub is_anomaly: bool,
    /// Isolation-forest decision score (negative = outlier)
    pub anomaly_score: f64,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub timestamp: Timestamp,
    /// The sample that triggered the detection
    pub metrics: MetricSample,
}

// ----------------------------------------------------------------------------
// 3.7 Alerts & Forecasts
// ----------------------------------------------------------------------------

/// Kind of pre-emptive capacity alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    CpuExhaustionPredicted,
    MemoryExhaustionPredicted,
    LatencySpikePredicted,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::CpuExhaustionPredicted => "CPU_EXHAUSTION_PREDICTED",
            AlertKind::MemoryExhaustionPredicted => "MEMORY_EXHAUSTION_PREDICTED",
            AlertKind::LatencySpikePredicted => "LATENCY_SPIKE_PREDICTED",
        }
    }
}

impl Display for AlertKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation suggested alongside an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    ScaleUp,
    EnableCaching,
}

/// A threshold breach predicted by the forecaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(rename = "type")]
    pub alert_type: AlertKind,
    pub severity: Severity,
    pub message: CompactString,
    pub recommended_action: RecommendedAction,
}

impl AlertRecord {
    /// Create a warning-level alert.
    pub fn warning(alert_type: AlertKind, message: impl Into<CompactString>, action: RecommendedAction) -> Self {
        Self {
            alert_type,
            severity: Severity::Warning,
            message: message.into(),
            recommended_action: action,
        }
    }
}

/// Dimension tracked by the performance predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastDimension {
    CpuUsage,
    MemoryUsage,
    ResponseTime,
}

impl ForecastDimension {
    pub const ALL: [ForecastDimension; 3] = [
        ForecastDimension::CpuUsage,
        ForecastDimension::MemoryUsage,
        ForecastDimension::ResponseTime,
    ];

    /// Sample field this dimension reads
    pub const fn field(&self) -> MetricField {
        match self {
            ForecastDimension::CpuUsage => MetricField::CpuUsage,
            ForecastDimension::MemoryUsage => MetricField::MemoryUsage,
            ForecastDimension::ResponseTime => MetricField::ResponseTime,
        }
    }
}

/// Result of a resource-exhaustion forecast. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForecastResult {
    pub predictions: BTreeMap<ForecastDimension, Vec<f64>>,
    pub alerts: Vec<AlertRecord>,
}

impl ForecastResult {
    /// The "insufficient data" result
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty() && self.alerts.is_empty()
    }

    pub fn prediction(&self, dimension: ForecastDimension) -> Option<&[f64]> {
        self.predictions.get(&dimension).map(Vec::as_slice)
    }
}

/// Latest exponentially smoothed value per forecast dimension
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SmoothedMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub response_time: f64,
}

// ============================================================================
// SECTION 4: ERROR HANDLING FRAMEWORK
// ============================================================================
// The pipeline core never fails on numeric input: short histories, missing
// fields and zero variance all have defined results. Errors only arise at the
// edges - configuration, logging setup and sample files.
// ============================================================================

// ----------------------------------------------------------------------------
// 4.1 Top-Level Error
// ----------------------------------------------------------------------------

/// The main error type for Cerebro Insight.
#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InsightError {
    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            InsightError::Config(_) => "config",
            InsightError::Input(_) => "input",
            InsightError::Io(_) => "io",
            InsightError::Serialization(_) => "serialization",
            InsightError::Metrics(_) => "metrics",
            InsightError::Logging(_) => "logging",
            InsightError::Internal(_) => "internal",
        }
    }
}

// ----------------------------------------------------------------------------
// 4.2 Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::ValidationFailed {
            message: errors.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// 4.3 Input Errors
// ----------------------------------------------------------------------------

/// Problems with a sample file handed to the CLI
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Invalid sample on line {line}: {message}")]
    InvalidSample { line: usize, message: String },

    #[error("No samples found in {source_name}")]
    Empty { source_name: String },
}

// ----------------------------------------------------------------------------
// 4.4 Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for Cerebro Insight operations
pub type InsightResult<T> = Result<T, InsightError>;

// ============================================================================
// SECTION 5: CONFIGURATION SYSTEM
// ============================================================================
// TOML file + environment overrides, merged with figment. Every field has a
// serde default so an empty file yields the documented pipeline.
// ============================================================================

// ----------------------------------------------------------------------------
// 5.1 Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration for Cerebro Insight
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: GeneralConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub predictor: PredictorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError { message: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ConfigError::ParseError { message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and cross-field rules
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.detector.validate()?;
        self.predictor.validate()?;

        let detector = &self.detector;
        if detector.training_threshold > detector.window_capacity {
            return Err(ConfigError::invalid_value(
                "detector.training_threshold",
                format!(
                    "must not exceed detector.window_capacity ({})",
                    detector.window_capacity
                ),
            ));
        }
        if detector.attribution_min_samples > detector.attribution_lookback {
            return Err(ConfigError::invalid_value(
                "detector.attribution_min_samples",
                format!(
                    "must not exceed detector.attribution_lookback ({})",
                    detector.attribution_lookback
                ),
            ));
        }

        let predictor = &self.predictor;
        for (field, value) in [
            ("detector.contamination", detector.contamination),
            ("detector.std_epsilon", detector.std_epsilon),
            ("detector.critical_score_threshold", detector.critical_score_threshold),
            ("predictor.cpu_alpha", predictor.cpu_alpha),
            ("predictor.memory_alpha", predictor.memory_alpha),
            ("predictor.response_time_alpha", predictor.response_time_alpha),
            ("predictor.cpu_threshold", predictor.cpu_threshold),
            ("predictor.memory_threshold", predictor.memory_threshold),
            ("predictor.latency_threshold_ms", predictor.latency_threshold_ms),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::invalid_value(field, "must be a finite number"));
            }
        }

        // Negated ranges: NaN fails them.
        if !(detector.contamination > 0.0 && detector.contamination <= 0.5) {
            return Err(ConfigError::invalid_value(
                "detector.contamination",
                "must be in (0, 0.5]",
            ));
        }
        if !(detector.std_epsilon > 0.0) {
            return Err(ConfigError::invalid_value(
                "detector.std_epsilon",
                "must be greater than 0",
            ));
        }
        for (field, alpha) in [
            ("predictor.cpu_alpha", predictor.cpu_alpha),
            ("predictor.memory_alpha", predictor.memory_alpha),
            ("predictor.response_time_alpha", predictor.response_time_alpha),
        ] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(ConfigError::invalid_value(field, "must be in (0, 1]"));
            }
        }

        Ok(())
    }

    /// Render the defaults as a config file
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// 5.2 General Engine Configuration
// ----------------------------------------------------------------------------

/// General engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GeneralConfig {
    /// Engine instance name (for identification)
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Rolling sample history fed to the predictor
    #[serde(default = "default_history_capacity")]
    #[validate(range(min = 1))]
    pub history_capacity: usize,

    /// Delay between samples when replaying a file
    #[serde(default = "default_replay_interval", with = "humantime_serde")]
    pub replay_interval: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            history_capacity: default_history_capacity(),
            replay_interval: default_replay_interval(),
        }
    }
}

fn default_instance_name() -> String {
    ENGINE_NAME.into()
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_replay_interval() -> Duration {
    Duration::from_millis(DEFAULT_REPLAY_INTERVAL_MS)
}

// ----------------------------------------------------------------------------
// 5.3 Anomaly Detector Configuration
// ----------------------------------------------------------------------------

/// Anomaly detector configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DetectorConfig {
    /// Sliding window capacity
    #[serde(default = "default_window_capacity")]
    #[validate(range(min = 1))]
    pub window_capacity: usize,

    /// Window size that triggers the one-shot fit
    #[serde(default = "default_training_threshold")]
    #[validate(range(min = 1))]
    pub training_threshold: usize,

    /// Expected outlier fraction, in (0, 0.5]
    #[serde(default = "default_contamination")]
    #[validate(range(max = 0.5))]
    pub contamination: f64,

    /// Seed for the isolation forest
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Number of isolation trees
    #[serde(default = "default_isolation_trees")]
    #[validate(range(min = 1))]
    pub n_estimators: usize,

    /// Subsample size per tree
    #[serde(default = "default_max_samples")]
    #[validate(range(min = 1))]
    pub max_samples: usize,

    /// Decision scores below this are critical
    #[serde(default = "default_critical_score")]
    pub critical_score_threshold: f64,

    /// Recent window entries used for attribution
    #[serde(default = "default_attribution_lookback")]
    #[validate(range(min = 1))]
    pub attribution_lookback: usize,

    /// Window entries required before attribution
    #[serde(default = "default_attribution_min_samples")]
    #[validate(range(min = 1))]
    pub attribution_min_samples: usize,

    /// Standard deviation floor during attribution
    #[serde(default = "default_std_epsilon")]
    pub std_epsilon: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            training_threshold: default_training_threshold(),
            contamination: default_contamination(),
            random_seed: default_random_seed(),
            n_estimators: default_isolation_trees(),
            max_samples: default_max_samples(),
            critical_score_threshold: default_critical_score(),
            attribution_lookback: default_attribution_lookback(),
            attribution_min_samples: default_attribution_min_samples(),
            std_epsilon: default_std_epsilon(),
        }
    }
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_training_threshold() -> usize {
    DEFAULT_TRAINING_THRESHOLD
}

fn default_contamination() -> f64 {
    DEFAULT_CONTAMINATION
}

fn default_random_seed() -> u64 {
    DEFAULT_RANDOM_SEED
}

fn default_isolation_trees() -> usize {
    DEFAULT_ISOLATION_TREES
}

fn default_max_samples() -> usize {
    DEFAULT_MAX_SAMPLES
}

fn default_critical_score() -> f64 {
    DEFAULT_CRITICAL_SCORE
}

fn default_attribution_lookback() -> usize {
    DEFAULT_ATTRIBUTION_LOOKBACK
}

fn default_attribution_min_samples() -> usize {
    DEFAULT_ATTRIBUTION_MIN_SAMPLES
}

fn default_std_epsilon() -> f64 {
    DEFAULT_STD_EPSILON
}

// ----------------------------------------------------------------------------
// 5.4 Performance Predictor Configuration
// ----------------------------------------------------------------------------

/// Forecasting configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictorConfig {
    #[serde(default = "default_cpu_alpha")]
    #[validate(range(max = 1.0))]
    pub cpu_alpha: f64,

    #[serde(default = "default_memory_alpha")]
    #[validate(range(max = 1.0))]
    pub memory_alpha: f64,

    #[serde(default = "default_response_time_alpha")]
    #[validate(range(max = 1.0))]
    pub response_time_alpha: f64,

    /// Steps predicted per dimension
    #[serde(default = "default_forecast_horizon")]
    #[validate(range(min = 1))]
    pub horizon: usize,

    /// History entries considered per forecast
    #[serde(default = "default_forecast_lookback")]
    #[validate(range(min = 1))]
    pub history_lookback: usize,

    /// History entries required before forecasting
    #[serde(default = "default_min_history")]
    #[validate(range(min = 1))]
    pub min_history: usize,

    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    #[serde(default = "default_latency_threshold")]
    pub latency_threshold_ms: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            cpu_alpha: default_cpu_alpha(),
            memory_alpha: default_memory_alpha(),
            response_time_alpha: default_response_time_alpha(),
            horizon: default_forecast_horizon(),
            history_lookback: default_forecast_lookback(),
            min_history: default_min_history(),
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            latency_threshold_ms: default_latency_threshold(),
        }
    }
}

fn default_cpu_alpha() -> f64 {
    CPU_ALPHA
}

fn default_memory_alpha() -> f64 {
    MEMORY_ALPHA
}

fn default_response_time_alpha() -> f64 {
    RESPONSE_TIME_ALPHA
}

fn default_forecast_horizon() -> usize {
    DEFAULT_FORECAST_HORIZON
}

fn default_forecast_lookback() -> usize {
    DEFAULT_FORECAST_LOOKBACK
}

fn default_min_history() -> usize {
    DEFAULT_MIN_HISTORY
}

fn default_cpu_threshold() -> f64 {
    DEFAULT_CPU_THRESHOLD
}

fn default_memory_threshold() -> f64 {
    DEFAULT_MEMORY_THRESHOLD
}

fn default_latency_threshold() -> f64 {
    DEFAULT_LATENCY_THRESHOLD_MS
}

// ----------------------------------------------------------------------------
// 5.5 Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "compact".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// SECTION 6: LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// The library only emits events; installing a subscriber is the binary's job
// (see `init_logging`). Targets: cerebro::detector, cerebro::predictor,
// cerebro::engine, cerebro::alerts, cerebro::init.
// ============================================================================

// ----------------------------------------------------------------------------
// 6.1 Logger Initialization
// ----------------------------------------------------------------------------

/// Initialize the logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> InsightResult<()> {
    let level_filter = match config.level.to_lowercase().as_str() {
        "trace" => tracing::level_filters::LevelFilter::TRACE,
        "debug" => tracing::level_filters::LevelFilter::DEBUG,
        "info" => tracing::level_filters::LevelFilter::INFO,
        "warn" | "warning" => tracing::level_filters::LevelFilter::WARN,
        "error" => tracing::level_filters::LevelFilter::ERROR,
        _ => tracing::level_filters::LevelFilter::INFO,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();

    // Logs go to stderr; stdout carries the JSON reports.
    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            )
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            )
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_fmt::layer()
                    .compact()
                    .with_writer(io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true),
            )
            .try_init(),
    };
    installed.map_err(|e| InsightError::Logging(format!("Failed to set logger: {}", e)))?;

    info!(
        target: "cerebro::init",
        level = %config.level,
        format = %config.format,
        "Logging initialized"
    );

    Ok(())
}

// ----------------------------------------------------------------------------
// 6.2 Logging Macros for Pipeline Components
// ----------------------------------------------------------------------------

/// Log a detected anomaly
#[macro_export]
macro_rules! log_anomaly {
    ($record:expr) => {
        tracing::warn!(
            target: "cerebro::alerts",
            anomaly_type = %$record.anomaly_type,
            severity = %$record.severity,
            score = $record.anomaly_score,
            "Anomaly detected"
        )
    };
}

/// Log a predicted capacity alert
#[macro_export]
macro_rules! log_alert {
    ($alert:expr) => {
        tracing::warn!(
            target: "cerebro::alerts",
            alert_type = %$alert.alert_type,
            severity = %$alert.severity,
            message = %$alert.message,
            "Alert triggered"
        )
    };
}

// ============================================================================
// SECTION 7: STATISTICAL FUNCTIONS
// ============================================================================
// Column statistics over feature vectors, standardization, percentiles and
// ordinary least squares. Population (ddof = 0) statistics throughout.
// ============================================================================

// ----------------------------------------------------------------------------
// 7.1 Column Statistics
// ----------------------------------------------------------------------------

/// Per-dimension mean and population standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub mean: FeatureVector,
    pub std_dev: FeatureVector,
}

impl ColumnStats {
    /// Compute column statistics. Returns `None` for an empty input.
    pub fn compute<'a, I>(vectors: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let rows: Vec<&FeatureVector> = vectors.into_iter().collect();
        if rows.is_empty() {
            return None;
        }

        let mut mean = [0.0; FEATURE_COUNT];
        let mut std_dev = [0.0; FEATURE_COUNT];
        let mut column = Vec::with_capacity(rows.len());
        for i in 0..FEATURE_COUNT {
            column.clear();
            column.extend(rows.iter().map(|row| row[i]));
            let mu = statistical::mean(&column);
            mean[i] = mu;
            std_dev[i] = statistical::population_standard_deviation(&column, Some(mu));
        }

        Some(Self {
            mean: FeatureVector::new(mean),
            std_dev: FeatureVector::new(std_dev),
        })
    }
}

// ----------------------------------------------------------------------------
// 7.2 Standard Scaler
// ----------------------------------------------------------------------------

/// Zero-mean, unit-variance transform fitted once on the training window.
///
/// A constant column gets a scale of 1, so it maps to 0 instead of NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardScaler {
    mean: FeatureVector,
    scale: FeatureVector,
}

impl StandardScaler {
    pub fn fit(data: &[FeatureVector]) -> Self {
        match ColumnStats::compute(data) {
            Some(stats) => Self {
                mean: stats.mean,
                scale: stats
                    .std_dev
                    .map_columns(|_, sd| if sd == 0.0 { 1.0 } else { sd }),
            },
            None => Self {
                mean: FeatureVector::default(),
                scale: FeatureVector::new([1.0; FEATURE_COUNT]),
            },
        }
    }

    #[inline]
    pub fn transform(&self, vector: &FeatureVector) -> FeatureVector {
        vector.map_columns(|i, value| (value - self.mean[i]) / self.scale[i])
    }

    pub fn mean(&self) -> &FeatureVector {
        &self.mean
    }

    pub fn scale(&self) -> &FeatureVector {
        &self.scale
    }
}

// ----------------------------------------------------------------------------
// 7.3 Percentile & Regression
// ----------------------------------------------------------------------------

/// Linearly interpolated percentile, `p` in [0, 100]. 0 for an empty input.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by_key(|v| OrderedFloat(*v));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

/// Least-squares line through `(i, values[i])` - returns (slope, intercept).
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    match values.len() {
        0 => return (0.0, 0.0),
        1 => return (0.0, values[0]),
        _ => {}
    }

    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i * i) as f64).sum();

    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x);
    let intercept = (sum_y - slope * sum_x) / n;

    (slope, intercept)
}

// ============================================================================
// SECTION 8: ISOLATION FOREST
// ============================================================================
// Outlier scoring by random partitioning: anomalies are isolated in fewer
// splits than inliers.
//
// - score_samples(x)     = -2^(-E[h(x)] / c(psi))   (lower = more anomalous)
// - offset               = contamination-th percentile of training scores
// - decision_function(x) = score_samples(x) - offset (< 0 = outlier)
// ============================================================================

/// Euler-Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Hyper-parameters for [`IsolationForest::fit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl From<&DetectorConfig> for ForestParams {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            max_samples: config.max_samples,
            contamination: config.contamination,
            seed: config.random_seed,
        }
    }
}

#[derive(Debug, Clone)]
enum IsolationNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

/// A single isolation tree.
#[derive(Debug, Clone)]
pub struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn grow(data: &[FeatureVector], indices: Vec<usize>, max_depth: usize, rng: &mut ChaCha8Rng) -> Self {
        Self {
            root: Self::grow_node(data, indices, 0, max_depth, rng),
        }
    }

    fn grow_node(
        data: &[FeatureVector],
        indices: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> IsolationNode {
        if depth >= max_depth || indices.len() <= 1 {
            return IsolationNode::Leaf { size: indices.len() };
        }

        // Constant columns cannot separate anything at this node.
        let candidates: SmallVec<[(usize, f64, f64); FEATURE_COUNT]> = (0..FEATURE_COUNT)
            .filter_map(|feature| {
                let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(data[i][feature]), hi.max(data[i][feature]))
                });
                (hi > lo).then_some((feature, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return IsolationNode::Leaf { size: indices.len() };
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| data[i][feature] <= threshold);

        IsolationNode::Split {
            feature,
            threshold,
            left: Box::new(Self::grow_node(data, left, depth + 1, max_depth, rng)),
            right: Box::new(Self::grow_node(data, right, depth + 1, max_depth, rng)),
        }
    }

    /// Depth at which `x` lands, plus the expected remainder for the leaf.
    pub fn path_length(&self, x: &FeatureVector) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                    depth += 1;
                }
                IsolationNode::Leaf { size } => {
                    return depth as f64 + average_path_length(*size);
                }
            }
        }
    }
}

/// Fitted isolation forest.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit on `data`. Fitting is deterministic for a given seed.
    pub fn fit(data: &[FeatureVector], params: &ForestParams) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let sample_size = params.max_samples.min(data.len());
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;

        let trees = if sample_size == 0 {
            Vec::new()
        } else {
            (0..params.n_estimators)
                .map(|_| {
                    let indices = sample_indices(&mut rng, data.len(), sample_size).into_vec();
                    IsolationTree::grow(data, indices, max_depth, &mut rng)
                })
                .collect()
        };

        let mut forest = Self {
            trees,
            sample_size,
            offset: 0.0,
        };
        let training_scores: Vec<f64> = data.iter().map(|x| forest.score_samples(x)).collect();
        forest.offset = percentile(&training_scores, params.contamination * 100.0);
        forest
    }

    /// Raw isolation score in [-1, 0); lower is more anomalous.
    pub fn score_samples(&self, x: &FeatureVector) -> f64 {
        if self.trees.is_empty() {
            return -0.5;
        }
        let mean_path = self.trees.iter().map(|tree| tree.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        let normalizer = match average_path_length(self.sample_size) {
            c if c > 0.0 => c,
            _ => 1.0,
        };
        -(2f64.powf(-mean_path / normalizer))
    }

    /// Score shifted by the contamination offset; negative means outlier.
    #[inline]
    pub fn decision_function(&self, x: &FeatureVector) -> f64 {
        self.score_samples(x) - self.offset
    }

    #[inline]
    pub fn is_outlier(&self, x: &FeatureVector) -> bool {
        self.decision_function(x) < 0.0
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

// ============================================================================
// SECTION 9: SLIDING WINDOW
// ============================================================================

/// Bounded FIFO of feature vectors in chronological order.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    buffer: VecDeque<FeatureVector>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a vector, returning the evicted oldest entry when full.
    pub fn push(&mut self, vector: FeatureVector) -> Option<FeatureVector> {
        let evicted = if self.buffer.len() == self.capacity {
            self.buffer.pop_front()
        } else {
            None
        };
        self.buffer.push_back(vector);
        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &FeatureVector> + '_ {
        self.buffer.iter()
    }

    /// The last `n` entries (or all of them), oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &FeatureVector> + '_ {
        self.buffer.iter().skip(self.buffer.len().saturating_sub(n))
    }

    pub fn to_vec(&self) -> Vec<FeatureVector> {
        self.buffer.iter().copied().collect()
    }
}

// ============================================================================
// SECTION 10: ANOMALY DETECTOR
// ============================================================================
// Two states, one transition:
//
//   Untrained ──(window reaches training_threshold during add)──► Trained
//
// The fit happens once over the window contents at that moment. Later adds
// keep sliding the window but never refit.
//
// Attribution uses only the most recent `attribution_lookback` entries while
// the model saw the whole training window; the two can diverge once the
// window grows past the lookback.
// ============================================================================

/// Everything produced by the one-shot fit.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    scaler: StandardScaler,
    forest: IsolationForest,
    trained_on: usize,
}

impl TrainedModel {
    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn forest(&self) -> &IsolationForest {
        &self.forest
    }

    /// Window size at fit time
    pub fn trained_on(&self) -> usize {
        self.trained_on
    }
}

/// Training state of an [`AnomalyDetector`].
#[derive(Debug, Clone)]
pub enum DetectorState {
    Untrained,
    Trained(TrainedModel),
}

/// Windowed multi-dimensional outlier detector.
///
/// Callers that feed a sample to both [`add_metrics`](Self::add_metrics) and
/// [`detect_anomaly`](Self::detect_anomaly) must pick one order and keep it:
/// add-then-detect includes the sample in the attribution statistics,
/// detect-then-add does not. [`InsightEngine`] uses add-then-detect.
///
/// No internal locking: wrap the detector in a mutex held across add + detect
/// when several threads feed it.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
    window: SlidingWindow,
    state: DetectorState,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            window: SlidingWindow::new(config.window_capacity),
            state: DetectorState::Untrained,
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    #[inline]
    pub fn is_trained(&self) -> bool {
        matches!(self.state, DetectorState::Trained(_))
    }

    /// Window size at fit time, if fitted
    pub fn trained_on(&self) -> Option<usize> {
        match &self.state {
            DetectorState::Trained(model) => Some(model.trained_on),
            DetectorState::Untrained => None,
        }
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    #[inline]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Record a sample; fits the model the first time the window is big enough.
    pub fn add_metrics(&mut self, sample: &MetricSample) {
        self.window.push(sample.to_features());

        if matches!(self.state, DetectorState::Untrained)
            && self.window.len() >= self.config.training_threshold
        {
            self.train();
        }
    }

    fn train(&mut self) {
        let started = Instant::now();
        let data = self.window.to_vec();
        let scaler = StandardScaler::fit(&data);
        let scaled: Vec<FeatureVector> = data.iter().map(|v| scaler.transform(v)).collect();
        let forest = IsolationForest::fit(&scaled, &ForestParams::from(&self.config));

        info!(
            target: "cerebro::detector",
            samples = data.len(),
            trees = forest.n_trees(),
            offset = forest.offset(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Anomaly model trained"
        );

        self.state = DetectorState::Trained(TrainedModel {
            scaler,
            forest,
            trained_on: data.len(),
        });
    }

    /// Classify a sample against the fitted model. Does not touch the window.
    pub fn detect_anomaly(&self, sample: &MetricSample) -> Option<AnomalyRecord> {
        let model = match &self.state {
            DetectorState::Trained(model) => model,
            DetectorState::Untrained => return None,
        };

        let features = sample.to_features();
        let scaled = model.scaler.transform(&features);
        let score = model.forest.decision_function(&scaled);
        trace!(target: "cerebro::detector", score, "Sample scored");

        if !model.forest.is_outlier(&scaled) {
            return None;
        }

        let record = AnomalyRecord {
            is_anomaly: true,
            anomaly_score: score,
            anomaly_type: self.identify_anomaly_type(&features),
            severity: Severity::from_score(score, self.config.critical_score_threshold),
            timestamp: Timestamp::now(),
            metrics: *sample,
        };
        log_anomaly!(record);
        Some(record)
    }

    /// Dimension with the largest |z-score| against the recent window.
    ///
    /// Ties go to the earliest field in schema order.
    pub fn identify_anomaly_type(&self, features: &FeatureVector) -> AnomalyType {
        if self.window.len() < self.config.attribution_min_samples {
            return AnomalyType::Unknown;
        }

        let stats = match ColumnStats::compute(self.window.recent(self.config.attribution_lookback)) {
            Some(stats) => stats,
            None => return AnomalyType::Unknown,
        };

        let mut best: Option<(MetricField, f64)> = None;
        for field in MetricField::ALL {
            let i = field.index();
            let sd = stats.std_dev[i].max(self.config.std_epsilon);
            let z = ((features[i] - stats.mean[i]) / sd).abs();
            if best.map_or(true, |(_, top)| z > top) {
                best = Some((field, z));
            }
        }

        best.map_or(AnomalyType::Unknown, |(field, _)| AnomalyType::Field(field))
    }
}

// ============================================================================
// SECTION 11: TIME-SERIES FORECASTING
// ============================================================================

// ----------------------------------------------------------------------------
// 11.1 Time-Series Forecaster - Exponential Smoothing
// ----------------------------------------------------------------------------

/// Single-dimension exponential smoother with a fixed alpha.
#[derive(Debug, Clone)]
pub struct TimeSeriesForecaster {
    /// Smoothing factor (alpha)
    alpha: f64,
    /// Current smoothed value, `None` until the first observation
    smoothed: Option<f64>,
    /// Sample count
    count: u64,
}

impl TimeSeriesForecaster {
    /// Create a forecaster. Alpha is clamped to [0, 1].
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            smoothed: None,
            count: 0,
        }
    }

    /// Fold `value` into the smoothed level and return the new level.
    ///
    /// The first observation seeds the level as-is.
    pub fn update_and_predict(&mut self, value: f64) -> f64 {
        self.count += 1;
        let next = match self.smoothed {
            None => value,
            Some(previous) => self.alpha * value + (1.0 - self.alpha) * previous,
        };
        self.smoothed = Some(next);
        next
    }

    /// Extrapolate a least-squares line through the last values.
    ///
    /// Stateless: never reads or updates the smoothed level. With fewer than
    /// three values the last value (or 0) is repeated.
    pub fn predict_trend(values: &[f64], steps: usize) -> Vec<f64> {
        if values.len() < MIN_TREND_POINTS {
            let last = values.last().copied().unwrap_or(0.0);
            return vec![last; steps];
        }

        let recent = &values[values.len().saturating_sub(TREND_FIT_LOOKBACK)..];
        let (slope, intercept) = linear_fit(recent);
        let n = recent.len();
        (n..n + steps).map(|x| slope * x as f64 + intercept).collect()
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    #[inline]
    pub fn current(&self) -> Option<f64> {
        self.smoothed
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }
}

// ============================================================================
// SECTION 12: PERFORMANCE PREDICTOR
// ============================================================================
// Three independent smoothers (CPU reacts at 0.3, memory at 0.25, response
// time at 0.35) plus stateless linear extrapolation of the recent history.
// Alerts fire on the peak of each forecast; order is CPU, memory, latency.
// ============================================================================

/// Short-horizon resource forecaster and alert source.
#[derive(Debug, Clone)]
pub struct PerformancePredictor {
    config: PredictorConfig,
    cpu: TimeSeriesForecaster,
    memory: TimeSeriesForecaster,
    response_time: TimeSeriesForecaster,
}

impl Default for PerformancePredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

impl PerformancePredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            cpu: TimeSeriesForecaster::new(config.cpu_alpha),
            memory: TimeSeriesForecaster::new(config.memory_alpha),
            response_time: TimeSeriesForecaster::new(config.response_time_alpha),
            config,
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn forecaster(&self, dimension: ForecastDimension) -> &TimeSeriesForecaster {
        match dimension {
            ForecastDimension::CpuUsage => &self.cpu,
            ForecastDimension::MemoryUsage => &self.memory,
            ForecastDimension::ResponseTime => &self.response_time,
        }
    }

    /// Feed one sample through the three smoothers.
    pub fn smooth(&mut self, sample: &MetricSample) -> SmoothedMetrics {
        SmoothedMetrics {
            cpu_usage: self.cpu.update_and_predict(sample.cpu_usage),
            memory_usage: self.memory.update_and_predict(sample.memory_usage),
            response_time: self.response_time.update_and_predict(sample.response_time),
        }
    }

    /// Forecast CPU, memory and response time and raise threshold alerts.
    ///
    /// Returns an empty result while the history is shorter than
    /// `min_history`.
    pub fn predict_resource_exhaustion(&self, history: &[MetricSample]) -> ForecastResult {
        if history.len() < self.config.min_history {
            debug!(
                target: "cerebro::predictor",
                history = history.len(),
                required = self.config.min_history,
                "Insufficient history for forecast"
            );
            return ForecastResult::empty();
        }

        let recent = &history[history.len().saturating_sub(self.config.history_lookback)..];
        let predictions: BTreeMap<ForecastDimension, Vec<f64>> = ForecastDimension::ALL
            .iter()
            .map(|dimension| {
                let field = dimension.field();
                let values: Vec<f64> = recent.iter().map(|sample| sample.get(field)).collect();
                (*dimension, TimeSeriesForecaster::predict_trend(&values, self.config.horizon))
            })
            .collect();

        let peak = |dimension: ForecastDimension| {
            predictions
                .get(&dimension)
                .and_then(|values| values.iter().copied().map(OrderedFloat).max())
                .map(|peak| peak.into_inner())
        };

        let mut alerts = Vec::new();
        if let Some(cpu) = peak(ForecastDimension::CpuUsage).filter(|v| *v > self.config.cpu_threshold) {
            alerts.push(AlertRecord::warning(
                AlertKind::CpuExhaustionPredicted,
                format_compact!("CPU usage predicted to reach {:.1}%", cpu),
                RecommendedAction::ScaleUp,
            ));
        }
        if let Some(memory) = peak(ForecastDimension::MemoryUsage).filter(|v| *v > self.config.memory_threshold) {
            alerts.push(AlertRecord::warning(
                AlertKind::MemoryExhaustionPredicted,
                format_compact!("Memory usage predicted to reach {:.1}%", memory),
                RecommendedAction::ScaleUp,
            ));
        }
        if let Some(latency) =
            peak(ForecastDimension::ResponseTime).filter(|v| *v > self.config.latency_threshold_ms)
        {
            alerts.push(AlertRecord::warning(
                AlertKind::LatencySpikePredicted,
                format_compact!("Response time predicted to reach {:.0}ms", latency),
                RecommendedAction::EnableCaching,
            ));
        }

        for alert in &alerts {
            log_alert!(alert);
        }

        ForecastResult { predictions, alerts }
    }
}

// ============================================================================
// SECTION 13: SELF-METRICS
// ============================================================================
// Prometheus counters for the pipeline. Built against a registry the caller
// owns and handed to the engine; nothing here touches a global registry.
// ============================================================================

/// Prometheus handle for pipeline activity.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: PrometheusRegistry,
    samples_total: IntCounter,
    anomalies_total: IntCounterVec,
    alerts_total: IntCounterVec,
    detector_trained: IntGauge,
    window_size: IntGauge,
}

impl fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("samples_total", &self.samples_total.get())
            .field("detector_trained", &self.detector_trained.get())
            .field("window_size", &self.window_size.get())
            .finish_non_exhaustive()
    }
}

impl PipelineMetrics {
    /// Register the pipeline collectors on `registry`.
    pub fn new(registry: &PrometheusRegistry) -> InsightResult<Self> {
        let samples_total = IntCounter::with_opts(Opts::new(
            "insight_samples_total",
            "Metric samples ingested",
        ))?;
        let anomalies_total = IntCounterVec::new(
            Opts::new("insight_anomalies_total", "Anomalies detected"),
            &["anomaly_type", "severity"],
        )?;
        let alerts_total = IntCounterVec::new(
            Opts::new("insight_alerts_total", "Capacity alerts predicted"),
            &["alert_type"],
        )?;
        let detector_trained = IntGauge::with_opts(Opts::new(
            "insight_detector_trained",
            "1 once the anomaly model has been fitted",
        ))?;
        let window_size = IntGauge::with_opts(Opts::new(
            "insight_window_size",
            "Feature vectors in the detector window",
        ))?;

        registry.register(Box::new(samples_total.clone()))?;
        registry.register(Box::new(anomalies_total.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(detector_trained.clone()))?;
        registry.register(Box::new(window_size.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            samples_total,
            anomalies_total,
            alerts_total,
            detector_trained,
            window_size,
        })
    }

    fn record_report(&self, report: &PipelineReport, detector: &AnomalyDetector) {
        self.samples_total.inc();
        self.detector_trained.set(i64::from(detector.is_trained()));
        self.window_size.set(detector.window_len() as i64);

        if let Some(anomaly) = &report.anomaly {
            self.anomalies_total
                .with_label_values(&[anomaly.anomaly_type.as_str(), anomaly.severity.as_str()])
                .inc();
        }
        for alert in &report.forecast.alerts {
            self.alerts_total.with_label_values(&[alert.alert_type.as_str()]).inc();
        }
    }

    pub fn samples_total(&self) -> u64 {
        self.samples_total.get()
    }

    pub fn anomalies_total(&self, anomaly_type: &str, severity: &str) -> u64 {
        self.anomalies_total.with_label_values(&[anomaly_type, severity]).get()
    }

    pub fn alerts_total(&self, alert_type: AlertKind) -> u64 {
        self.alerts_total.with_label_values(&[alert_type.as_str()]).get()
    }

    /// Prometheus text exposition of the registry
    pub fn render(&self) -> InsightResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| InsightError::Internal(e.to_string()))
    }
}

// ============================================================================
// SECTION 14: INSIGHT ENGINE
// ============================================================================
// Feeds one stream to both components and merges their output. Per sample:
// history append → add_metrics → detect_anomaly → smooth → forecast.
// ============================================================================

/// Merged output for one ingested sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// 1-based position of the sample in the stream
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub anomaly: Option<AnomalyRecord>,
    pub forecast: ForecastResult,
    pub smoothed: SmoothedMetrics,
}

/// Owns a detector, a predictor and the rolling history they share.
///
/// Single-writer: share it across threads only behind a mutex held for the
/// whole `ingest` call.
#[derive(Debug)]
pub struct InsightEngine {
    detector: AnomalyDetector,
    predictor: PerformancePredictor,
    history: VecDeque<MetricSample>,
    history_capacity: usize,
    metrics: PipelineMetrics,
    sequence: u64,
}

impl InsightEngine {
    pub fn new(config: &EngineConfig, metrics: PipelineMetrics) -> Self {
        info!(
            target: "cerebro::engine",
            instance = %config.engine.instance_name,
            window = config.detector.window_capacity,
            training_threshold = config.detector.training_threshold,
            horizon = config.predictor.horizon,
            "Insight engine created"
        );

        let history_capacity = config.engine.history_capacity.max(1);
        Self {
            detector: AnomalyDetector::new(config.detector.clone()),
            predictor: PerformancePredictor::new(config.predictor.clone()),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            metrics,
            sequence: 0,
        }
    }

    /// Run one sample through the whole pipeline.
    pub fn ingest(&mut self, sample: MetricSample) -> PipelineReport {
        self.sequence += 1;

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);

        let was_trained = self.detector.is_trained();
        self.detector.add_metrics(&sample);
        if !was_trained && self.detector.is_trained() {
            info!(target: "cerebro::engine", sequence = self.sequence, "Detector armed");
        }

        let anomaly = self.detector.detect_anomaly(&sample);
        let smoothed = self.predictor.smooth(&sample);
        let forecast = self.forecast();

        let report = PipelineReport {
            sequence: self.sequence,
            timestamp: Timestamp::now(),
            anomaly,
            forecast,
            smoothed,
        };
        self.metrics.record_report(&report, &self.detector);
        report
    }

    /// Forecast over the current history without ingesting anything
    pub fn forecast(&self) -> ForecastResult {
        let (front, back) = self.history.as_slices();
        if front.is_empty() || back.is_empty() {
            let contiguous = if front.is_empty() { back } else { front };
            return self.predictor.predict_resource_exhaustion(contiguous);
        }
        let history: Vec<MetricSample> = self.history.iter().copied().collect();
        self.predictor.predict_resource_exhaustion(&history)
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    pub fn predictor(&self) -> &PerformancePredictor {
        &self.predictor
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn samples_ingested(&self) -> u64 {
        self.sequence
    }
}

// ----------------------------------------------------------------------------
// 14.1 Sample Files
// ----------------------------------------------------------------------------

/// Parse JSON-lines samples. Blank lines are skipped, missing fields are 0.
pub fn parse_samples(text: &str) -> Result<Vec<MetricSample>, InputError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<MetricSample>(line).map_err(|e| InputError::InvalidSample {
                line: i + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Read a JSON-lines sample file; an empty file is an error.
pub fn load_samples<P: AsRef<Path>>(path: P) -> InsightResult<Vec<MetricSample>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let samples = parse_samples(&text)?;
    if samples.is_empty() {
        return Err(InputError::Empty {
            source_name: path.display().to_string(),
        }
        .into());
    }
    Ok(samples)
}

// ----------------------------------------------------------------------------
// 14.2 Replay Driver
// ----------------------------------------------------------------------------

/// Totals for a replay run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    pub samples: u64,
    pub anomalies: u64,
    pub alerts: u64,
    pub interrupted: bool,
}

/// Replay samples through the engine at a fixed pace, writing one JSON report
/// per line. Ctrl-C stops between samples.
pub async fn replay<W: Write>(
    engine: &mut InsightEngine,
    samples: Vec<MetricSample>,
    pace: Duration,
    out: &mut W,
) -> InsightResult<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    let mut ticker = interval(pace.max(Duration::from_millis(1)));
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    for sample in samples {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!(target: "cerebro::engine", "Interrupt received, stopping replay");
                summary.interrupted = true;
                break;
            }
        }

        let report = engine.ingest(sample);
        summary.samples += 1;
        summary.anomalies += u64::from(report.anomaly.is_some());
        summary.alerts += report.forecast.alerts.len() as u64;

        serde_json::to_writer(&mut *out, &report)?;
        writeln!(out)?;
    }

    out.flush()?;
    Ok(summary)
}

// ============================================================================
// SECTION 15: CLI & COMMAND LINE INTERFACE
// ============================================================================

/// Cerebro Insight CLI
#[derive(Parser, Debug)]
#[command(
    name = "cerebro-insight",
    author = "AIOps Team",
    version,
    about = "Anomaly detection and capacity forecasting for AIOps metric streams",
    long_about = "Cerebro Insight replays metric samples through an isolation-forest \
                  anomaly detector and a trend-based capacity forecaster, emitting \
                  one JSON report per sample."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "cerebro-insight.toml", env = "CEREBRO_INSIGHT_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "CEREBRO_INSIGHT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a JSON-lines sample file through the engine
    Run {
        /// Sample file (one JSON object per line)
        #[arg(short, long)]
        input: PathBuf,

        /// Delay between samples, e.g. "250ms" (defaults to engine.replay_interval)
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,

        /// Print prometheus metrics when the replay ends
        #[arg(long)]
        metrics: bool,
    },

    /// Forecast resource exhaustion for a sample history
    Forecast {
        /// Sample file (one JSON object per line)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

/// Handle the validate subcommand
fn handle_validate(config_path: &Path, verbose: bool) -> InsightResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    let config = EngineConfig::load(config_path)?;
    println!("Configuration is valid");

    if verbose {
        println!("{}", toml::to_string_pretty(&config).unwrap_or_default());
    }

    println!("  window capacity:    {}", config.detector.window_capacity);
    println!("  training threshold: {}", config.detector.training_threshold);
    println!("  contamination:      {}", config.detector.contamination);
    println!("  forecast horizon:   {}", config.predictor.horizon);
    println!(
        "  replay interval:    {}",
        humantime::format_duration(config.engine.replay_interval)
    );
    Ok(())
}

/// Handle the generate-config subcommand
fn handle_generate_config(output: Option<&Path>) -> InsightResult<()> {
    let config_str = EngineConfig::generate_default_config();
    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("Default configuration written to: {}", path.display());
        }
        None => println!("{}", config_str),
    }
    Ok(())
}

/// Handle the version subcommand
fn handle_version() {
    println!("{} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    println!("  target: {}-{}", std::env::consts::ARCH, std::env::consts::OS);
}

// ============================================================================
// SECTION 16: MAIN ENTRY POINT
// ============================================================================

/// Entry point of the `cerebro-insight` binary. The library target compiles
/// this file too, where `main` goes unused.
#[allow(dead_code)]
#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            handle_version();
            return Ok(());
        }
        Commands::GenerateConfig { output } => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Commands::Validate { verbose } => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        _ => {}
    }

    let config = if cli.config.exists() {
        EngineConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        EngineConfig::default()
    };

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config)?;

    if !cli.config.exists() {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }

    match cli.command {
        Commands::Run { input, interval, metrics } => {
            let samples = load_samples(&input)
                .with_context(|| format!("Failed to read samples from {}", input.display()))?;
            let registry = PrometheusRegistry::new();
            let mut engine = InsightEngine::new(&config, PipelineMetrics::new(&registry)?);
            let pace = interval.unwrap_or(config.engine.replay_interval);

            let started = Instant::now();
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let summary = replay(&mut engine, samples, pace, &mut out).await?;

            info!(
                target: "cerebro::engine",
                samples = summary.samples,
                anomalies = summary.anomalies,
                alerts = summary.alerts,
                interrupted = summary.interrupted,
                elapsed = %humantime::format_duration(Duration::from_millis(started.elapsed().as_millis() as u64)),
                "Replay finished"
            );

            if metrics {
                print!("{}", engine.metrics().render()?);
            }
        }
        Commands::Forecast { input } => {
            let samples = load_samples(&input)
                .with_context(|| format!("Failed to read samples from {}", input.display()))?;
            let predictor = PerformancePredictor::new(config.predictor.clone());
            let result = predictor.predict_resource_exhaustion(&samples);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Version | Commands::GenerateConfig { .. } | Commands::Validate { .. } => {}
    }

    Ok(())
}

// ============================================================================
// SECTION 17: CORE TYPE & STATISTICS TESTS
// ============================================================================

#[cfg(test)]
mod core_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_feature_order_matches_schema() {
        let sample = MetricSample {
            cpu_usage: 1.0,
            memory_usage: 2.0,
            response_time: 3.0,
            error_rate: 4.0,
            requests_per_sec: 5.0,
            disk_io: 6.0,
            network_throughput: 7.0,
        };
        assert_eq!(sample.to_features().as_array(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        for (i, field) in MetricField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
            assert_eq!(MetricField::from_index(i), Some(*field));
        }
        assert_eq!(MetricField::from_index(FEATURE_COUNT), None);
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let sample: MetricSample = serde_json::from_str(r#"{"cpu_usage": 42.5}"#).unwrap();
        assert_eq!(sample.cpu_usage, 42.5);
        assert_eq!(sample.memory_usage, 0.0);
        assert_eq!(sample.network_throughput, 0.0);
    }

    #[test]
    fn test_with_field_overrides_single_dimension() {
        let sample = MetricSample::new(10.0, 20.0, 30.0).with_field(MetricField::DiskIo, 99.0);
        assert_eq!(sample.get(MetricField::DiskIo), 99.0);
        assert_eq!(sample.get(MetricField::CpuUsage), 10.0);
    }

    #[test]
    fn test_anomaly_type_string_form() {
        assert_eq!(AnomalyType::Field(MetricField::CpuUsage).to_string(), "CPU_USAGE");
        assert_eq!(AnomalyType::Unknown.to_string(), "UNKNOWN");
        assert_eq!("REQUESTS_PER_SEC".parse::<AnomalyType>(), Ok(AnomalyType::Field(MetricField::RequestsPerSec)));
        assert!("BOGUS".parse::<AnomalyType>().is_err());

        let json = serde_json::to_string(&AnomalyType::Field(MetricField::DiskIo)).unwrap();
        assert_eq!(json, "\"DISK_IO\"");
    }

    #[test]
    fn test_alert_record_wire_format() {
        let alert = AlertRecord::warning(
            AlertKind::LatencySpikePredicted,
            "Response time predicted to reach 1500ms",
            RecommendedAction::EnableCaching,
        );
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["type"], "LATENCY_SPIKE_PREDICTED");
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["recommended_action"], "ENABLE_CACHING");
    }

    #[test_case(-0.6, Severity::Critical ; "below threshold")]
    #[test_case(-0.5, Severity::Warning ; "at threshold")]
    #[test_case(-0.01, Severity::Warning ; "barely anomalous")]
    fn test_severity_from_score(score: f64, expected: Severity) {
        assert_eq!(Severity::from_score(score, DEFAULT_CRITICAL_SCORE), expected);
    }

    #[test]
    fn test_timestamp_conversions() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
        assert_eq!(ts.as_nanos(), 1_700_000_000_123_000_000);
        assert_eq!(Timestamp::from(ts.to_datetime()), ts);
        assert_eq!(Timestamp::from_nanos(ts.as_nanos()), ts);
    }

    #[test]
    fn test_standard_scaler_constant_column() {
        let data = vec![
            FeatureVector::new([1.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            FeatureVector::new([3.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ];
        let scaler = StandardScaler::fit(&data);
        assert_eq!(scaler.mean()[0], 2.0);
        assert_eq!(scaler.scale()[0], 1.0);
        // Constant column: scale 1, transformed to 0
        assert_eq!(scaler.scale()[1], 1.0);

        let scaled = scaler.transform(&data[1]);
        assert_eq!(scaled[0], 1.0);
        assert_eq!(scaled[1], 0.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-12);
        assert_eq!(percentile(&[], 10.0), 0.0);
    }

    #[test]
    fn test_linear_fit_exact_line() {
        let (slope, intercept) = linear_fit(&[3.0, 5.0, 7.0, 9.0]);
        assert_eq!(slope, 2.0);
        assert_eq!(intercept, 3.0);
        assert_eq!(linear_fit(&[4.0]), (0.0, 4.0));
    }

    #[test]
    fn test_sliding_window_evicts_oldest() {
        let mut window = SlidingWindow::new(3);
        for i in 0..3 {
            assert!(window.push(FeatureVector::new([i as f64; FEATURE_COUNT])).is_none());
        }
        let evicted = window.push(FeatureVector::new([3.0; FEATURE_COUNT]));
        assert_eq!(evicted.map(|v| v[0]), Some(0.0));
        assert_eq!(window.len(), 3);

        let recent: Vec<f64> = window.recent(2).map(|v| v[0]).collect();
        assert_eq!(recent, vec![2.0, 3.0]);
        assert_eq!(window.recent(10).count(), 3);
    }

    #[test]
    fn test_detector_window_keeps_latest_in_order() {
        let mut detector = AnomalyDetector::default();
        let samples: Vec<MetricSample> = (0..150).map(|i| MetricSample::new(i as f64, 0.0, 0.0)).collect();
        for sample in &samples {
            detector.add_metrics(sample);
        }

        let expected: Vec<FeatureVector> = samples[50..].iter().map(MetricSample::to_features).collect();
        assert_eq!(detector.window_len(), DEFAULT_WINDOW_CAPACITY);
        assert_eq!(detector.window().to_vec(), expected);
    }

    proptest::proptest! {
        #[test]
        fn prop_window_never_exceeds_capacity(capacity in 1usize..50, pushes in 0usize..200) {
            let mut window = SlidingWindow::new(capacity);
            for i in 0..pushes {
                window.push(FeatureVector::new([i as f64; FEATURE_COUNT]));
            }
            proptest::prop_assert_eq!(window.len(), pushes.min(capacity));
        }

        #[test]
        fn prop_percentile_within_bounds(
            values in proptest::collection::vec(-1e6f64..1e6, 1..64),
            p in 0.0f64..=100.0,
        ) {
            let result = percentile(&values, p);
            let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            proptest::prop_assert!(result >= lo && result <= hi);
        }
    }
}

// ============================================================================
// SECTION 18: DETECTOR TESTS
// ============================================================================


// ============================================================================
// SECTION 19: FORECAST TESTS
// ============================================================================

#[cfg(test)]
mod forecast_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn history(cpu: impl Fn(usize) -> f64, memory: impl Fn(usize) -> f64, latency: impl Fn(usize) -> f64, n: usize) -> Vec<MetricSample> {
        (0..n).map(|i| MetricSample::new(cpu(i), memory(i), latency(i))).collect()
    }

    #[rstest]
    #[case(vec![1.0, 2.0, 3.0, 4.0, 5.0], 3, vec![6.0, 7.0, 8.0])]
    #[case(vec![], 3, vec![0.0, 0.0, 0.0])]
    #[case(vec![42.0], 3, vec![42.0, 42.0, 42.0])]
    #[case(vec![7.0, 9.0], 2, vec![9.0, 9.0])]
    #[case(vec![5.0, 5.0, 5.0], 2, vec![5.0, 5.0])]
    fn test_predict_trend(#[case] values: Vec<f64>, #[case] steps: usize, #[case] expected: Vec<f64>) {
        assert_eq!(TimeSeriesForecaster::predict_trend(&values, steps), expected);
    }

    #[test]
    fn test_predict_trend_uses_last_ten_values() {
        // A flat tail after an early ramp: only the tail is fitted.
        let mut values: Vec<f64> = (0..10).map(|i| i as f64 * 100.0).collect();
        values.extend(std::iter::repeat(20.0).take(10));
        assert_eq!(TimeSeriesForecaster::predict_trend(&values, 2), vec![20.0, 20.0]);
    }

    #[test]
    fn test_update_and_predict_smooths() {
        let mut forecaster = TimeSeriesForecaster::new(0.3);
        assert_eq!(forecaster.current(), None);
        assert_eq!(forecaster.update_and_predict(100.0), 100.0);
        let second = forecaster.update_and_predict(0.0);
        assert!((second - 70.0).abs() < 1e-9);
        assert_eq!(forecaster.count(), 2);
        assert_eq!(forecaster.current(), Some(second));
    }

    #[test]
    fn test_predictor_alphas() {
        let predictor = PerformancePredictor::default();
        assert_eq!(predictor.forecaster(ForecastDimension::CpuUsage).alpha(), 0.3);
        assert_eq!(predictor.forecaster(ForecastDimension::MemoryUsage).alpha(), 0.25);
        assert_eq!(predictor.forecaster(ForecastDimension::ResponseTime).alpha(), 0.35);
    }

    #[test]
    fn test_short_history_yields_empty_result() {
        let predictor = PerformancePredictor::default();
        let result = predictor.predict_resource_exhaustion(&history(|_| 99.0, |_| 99.0, |_| 5000.0, 3));
        assert!(result.is_empty());
        assert!(predictor.predict_resource_exhaustion(&[]).is_empty());
    }

    #[test]
    fn test_rising_cpu_raises_single_alert() {
        let predictor = PerformancePredictor::default();
        let samples = history(|i| 50.0 + 4.0 * i as f64, |_| 40.0, |_| 200.0, 10);
        let result = predictor.predict_resource_exhaustion(&samples);

        assert_eq!(
            result.prediction(ForecastDimension::CpuUsage),
            Some(&[90.0, 94.0, 98.0, 102.0, 106.0][..])
        );
        assert_eq!(result.prediction(ForecastDimension::MemoryUsage).map(<[f64]>::len), Some(5));
        assert_eq!(result.alerts.len(), 1);

        let alert = &result.alerts[0];
        assert_eq!(alert.alert_type, AlertKind::CpuExhaustionPredicted);
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.recommended_action, RecommendedAction::ScaleUp);
        assert_eq!(alert.message.as_str(), "CPU usage predicted to reach 106.0%");
    }

    #[test]
    fn test_threshold_is_strict() {
        let predictor = PerformancePredictor::default();
        let result = predictor.predict_resource_exhaustion(&history(|_| 85.0, |_| 85.0, |_| 1000.0, 10));
        assert!(!result.is_empty());
        assert!(result.alerts.is_empty());
    }

    #[test]
    fn test_alert_order_and_latency_action() {
        let predictor = PerformancePredictor::default();
        let samples = history(
            |i| 60.0 + 3.0 * i as f64,
            |i| 60.0 + 3.0 * i as f64,
            |i| 600.0 + 100.0 * i as f64,
            10,
        );
        let kinds: Vec<AlertKind> = predictor
            .predict_resource_exhaustion(&samples)
            .alerts
            .iter()
            .map(|a| a.alert_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::CpuExhaustionPredicted,
                AlertKind::MemoryExhaustionPredicted,
                AlertKind::LatencySpikePredicted,
            ]
        );

        let latency = predictor.predict_resource_exhaustion(&history(|_| 10.0, |_| 10.0, |i| 600.0 + 100.0 * i as f64, 10));
        assert_eq!(latency.alerts.len(), 1);
        assert_eq!(latency.alerts[0].recommended_action, RecommendedAction::EnableCaching);
        assert_eq!(latency.alerts[0].message.as_str(), "Response time predicted to reach 2000ms");
    }

    #[test]
    fn test_forecast_ignores_smoother_state() {
        let mut predictor = PerformancePredictor::default();
        let samples = history(|i| 50.0 + 4.0 * i as f64, |_| 40.0, |_| 200.0, 10);
        let before = predictor.predict_resource_exhaustion(&samples);
        for sample in &samples {
            predictor.smooth(sample);
        }
        assert_eq!(predictor.predict_resource_exhaustion(&samples), before);
    }

    proptest::proptest! {
        #[test]
        fn prop_predict_trend_length(
            values in proptest::collection::vec(-1e3f64..1e3, 0..40),
            steps in 0usize..20,
        ) {
            proptest::prop_assert_eq!(TimeSeriesForecaster::predict_trend(&values, steps).len(), steps);
        }
    }
}

// ============================================================================
// SECTION 20: CONFIGURATION, INPUT & ENGINE TESTS
// ============================================================================

#[cfg(test)]
mod engine_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine_with(config: &EngineConfig) -> InsightEngine {
        let registry = PrometheusRegistry::new();
        InsightEngine::new(config, PipelineMetrics::new(&registry).unwrap())
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.training_threshold, 20);
        assert_eq!(config.detector.random_seed, 42);
        assert_eq!(config.engine.replay_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_generated_config_parses_back() {
        let text = EngineConfig::generate_default_config();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.predictor.horizon, DEFAULT_FORECAST_HORIZON);
        assert_eq!(parsed.detector.contamination, DEFAULT_CONTAMINATION);
        assert_eq!(parsed.logging.format, "compact");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [engine]
            replay_interval = "250ms"

            [predictor]
            horizon = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.replay_interval, Duration::from_millis(250));
        assert_eq!(config.predictor.horizon, 8);
        assert_eq!(config.predictor.cpu_alpha, CPU_ALPHA);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let err = EngineConfig::from_toml_str("[detector]\ncontamination = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "detector.contamination"));

        let err = EngineConfig::from_toml_str("[detector]\ncontamination = 0.9\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { .. }));

        let err = EngineConfig::from_toml_str("[detector]\nwindow_capacity = 10\ntraining_threshold = 20\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "detector.training_threshold"));

        assert!(matches!(
            EngineConfig::from_toml_str("[predictor]\nhorizon = \"soon\"\n"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_config_rejects_non_finite_values() {
        let err = EngineConfig::from_toml_str("[detector]\ncontamination = nan\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "detector.contamination"));

        for (toml_text, expected) in [
            ("[detector]\nstd_epsilon = nan\n", "detector.std_epsilon"),
            ("[detector]\ncritical_score_threshold = nan\n", "detector.critical_score_threshold"),
            ("[predictor]\ncpu_alpha = nan\n", "predictor.cpu_alpha"),
            ("[predictor]\nmemory_alpha = nan\n", "predictor.memory_alpha"),
            ("[predictor]\nresponse_time_alpha = nan\n", "predictor.response_time_alpha"),
            ("[predictor]\ncpu_threshold = nan\n", "predictor.cpu_threshold"),
            ("[predictor]\nmemory_threshold = inf\n", "predictor.memory_threshold"),
            ("[predictor]\nlatency_threshold_ms = -inf\n", "predictor.latency_threshold_ms"),
        ] {
            let err = EngineConfig::from_toml_str(toml_text).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref field, .. } if field == expected),
                "{toml_text:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\ninstance_name = \"edge-01\"\n\n[detector]\nn_estimators = 25").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.engine.instance_name, "edge-01");
        assert_eq!(config.detector.n_estimators, 25);

        let missing = EngineConfig::load("/nonexistent/cerebro-insight.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_parse_samples_skips_blank_lines() {
        let text = "{\"cpu_usage\": 10}\n\n   \n{\"cpu_usage\": 20, \"memory_usage\": 30}\n";
        let samples = parse_samples(text).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].memory_usage, 30.0);
        assert_eq!(samples[1].response_time, 0.0);
    }

    #[test]
    fn test_parse_samples_reports_line() {
        let err = parse_samples("{\"cpu_usage\": 1}\n\nnot json\n").unwrap_err();
        assert!(matches!(err, InputError::InvalidSample { line: 3, .. }));
    }

    #[test]
    fn test_load_samples_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = load_samples(file.path()).unwrap_err();
        assert_eq!(err.category(), "input");
        assert!(matches!(err, InsightError::Input(InputError::Empty { .. })));
    }

    #[test]
    fn test_engine_pipeline() {
        let mut engine = engine_with(&EngineConfig::default());

        let first = engine.ingest(MetricSample::new(50.0, 40.0, 200.0));
        assert_eq!(first.sequence, 1);
        assert!(first.anomaly.is_none());
        assert!(first.forecast.is_empty());
        assert_eq!(first.smoothed.cpu_usage, 50.0);

        let mut last = first;
        for i in 1..25 {
            last = engine.ingest(MetricSample::new(50.0 + (i % 5) as f64, 40.0, 200.0));
        }
        assert_eq!(last.sequence, 25);
        assert!(engine.detector().is_trained());
        assert_eq!(engine.detector().trained_on(), Some(20));
        assert!(!last.forecast.is_empty());
        assert_eq!(engine.samples_ingested(), 25);
        assert_eq!(engine.metrics().samples_total(), 25);
    }

    #[test]
    fn test_engine_history_is_bounded() {
        let mut config = EngineConfig::default();
        config.engine.history_capacity = 8;
        let mut engine = engine_with(&config);
        for i in 0..30 {
            engine.ingest(MetricSample::new(i as f64, 10.0, 100.0));
        }
        assert_eq!(engine.history_len(), 8);
    }

    #[test]
    fn test_metrics_count_alerts() {
        let mut engine = engine_with(&EngineConfig::default());
        for i in 0..10 {
            engine.ingest(MetricSample::new(50.0 + 4.0 * i as f64, 40.0, 200.0));
        }
        assert!(engine.metrics().alerts_total(AlertKind::CpuExhaustionPredicted) >= 1);
        assert_eq!(engine.metrics().alerts_total(AlertKind::LatencySpikePredicted), 0);

        let rendered = engine.metrics().render().unwrap();
        assert!(rendered.contains("insight_samples_total 10"));
        assert!(rendered.contains("insight_detector_trained 0"));
        assert!(rendered.contains("insight_window_size 10"));
    }

    #[test]
    fn test_metrics_reject_double_registration() {
        let registry = PrometheusRegistry::new();
        assert!(PipelineMetrics::new(&registry).is_ok());
        let err = PipelineMetrics::new(&registry).unwrap_err();
        assert_eq!(err.category(), "metrics");
    }

    #[tokio::test]
    async fn test_replay_writes_one_report_per_sample() {
        let mut engine = engine_with(&EngineConfig::default());
        let samples: Vec<MetricSample> = (0..6).map(|i| MetricSample::new(40.0 + i as f64, 30.0, 150.0)).collect();

        let mut out = Vec::new();
        let summary = replay(&mut engine, samples, Duration::from_millis(1), &mut out).await.unwrap();

        assert_eq!(summary.samples, 6);
        assert!(!summary.interrupted);

        let text = String::from_utf8(out).unwrap();
        let sequences: Vec<u64> = text
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    }
}
