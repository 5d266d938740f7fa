//! Metric values and the envelope used on the wire and in snapshots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Point-in-time reading. Last write wins.
pub type Gauge = f64;

/// Accumulating total. Every update adds its delta.
pub type Counter = i64;

/// The two metric kinds. Names are per-kind namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown metric kind: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for MetricKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// Validation failures for a single metric update. Always client-caused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("metric name is empty")]
    EmptyName,

    #[error("gauge {0} has no value")]
    MissingValue(String),

    #[error("counter {0} has no delta")]
    MissingDelta(String),

    #[error("invalid {kind} value: {text:?}")]
    InvalidValue { kind: MetricKind, text: String },
}

/// One metric update as it travels between agent and collector.
///
/// Exactly one of `value` (gauge) or `delta` (counter) is meaningful,
/// selected by `kind`. Absent fields are omitted when encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Gauge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Counter>,
}

impl MetricEnvelope {
    pub fn gauge(id: impl Into<String>, value: Gauge) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            value: Some(value),
            delta: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: Counter) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            value: None,
            delta: Some(delta),
        }
    }

    /// A read request: kind and name only, no payload.
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
            value: None,
            delta: None,
        }
    }

    /// Check the envelope and turn it into an update a store can apply.
    pub fn to_update(&self) -> Result<MetricUpdate, EnvelopeError> {
        if self.id.is_empty() {
            return Err(EnvelopeError::EmptyName);
        }
        match self.kind {
            MetricKind::Gauge => {
                let value = self
                    .value
                    .ok_or_else(|| EnvelopeError::MissingValue(self.id.clone()))?;
                Ok(MetricUpdate::Gauge {
                    name: self.id.clone(),
                    value,
                })
            }
            MetricKind::Counter => {
                let delta = self
                    .delta
                    .ok_or_else(|| EnvelopeError::MissingDelta(self.id.clone()))?;
                Ok(MetricUpdate::Counter {
                    name: self.id.clone(),
                    delta,
                })
            }
        }
    }
}

/// A validated update. Backends only ever see this form.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    Gauge { name: String, value: Gauge },
    Counter { name: String, delta: Counter },
}

impl MetricUpdate {
    pub fn name(&self) -> &str {
        match self {
            MetricUpdate::Gauge { name, .. } | MetricUpdate::Counter { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricUpdate::Gauge { .. } => MetricKind::Gauge,
            MetricUpdate::Counter { .. } => MetricKind::Counter,
        }
    }
}

/// Validate a whole batch up front. The first bad envelope fails the batch.
pub fn validate_batch(batch: &[MetricEnvelope]) -> Result<Vec<MetricUpdate>, EnvelopeError> {
    batch.iter().map(MetricEnvelope::to_update).collect()
}

/// Parse the textual value of a positional update.
pub fn parse_value(kind: MetricKind, name: &str, text: &str) -> Result<MetricUpdate, EnvelopeError> {
    if name.is_empty() {
        return Err(EnvelopeError::EmptyName);
    }
    let invalid = || EnvelopeError::InvalidValue {
        kind,
        text: text.to_string(),
    };
    match kind {
        MetricKind::Gauge => {
            let value: Gauge = text.trim().parse().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }
            Ok(MetricUpdate::Gauge {
                name: name.to_string(),
                value,
            })
        }
        MetricKind::Counter => {
            let delta: Counter = text.trim().parse().map_err(|_| invalid())?;
            Ok(MetricUpdate::Counter {
                name: name.to_string(),
                delta,
            })
        }
    }
}

/// Render a gauge the way the plain-text endpoints return it:
/// shortest round-trip decimal, never in exponent form.
pub fn format_gauge(value: Gauge) -> String {
    format!("{value}")
}

pub fn format_counter(value: Counter) -> String {
    value.to_string()
}
