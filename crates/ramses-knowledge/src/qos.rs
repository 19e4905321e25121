//! Quality-of-service kinds, specifications and value histories.
//!
//! Every service and every instance carries a [`QosHistory`]: one
//! newest-first value stack per [`QosKind`] plus a "current value" slot
//! holding the latest figure computed by the Analyse stage.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A monitored quality dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosKind {
    Availability,
    AverageResponseTime,
    Vulnerability,
}

/// Whether larger or smaller values of a QoS kind are preferable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

impl QosKind {
    pub const ALL: [QosKind; 3] = [
        QosKind::Availability,
        QosKind::AverageResponseTime,
        QosKind::Vulnerability,
    ];

    pub fn direction(self) -> Direction {
        match self {
            QosKind::Availability => Direction::HigherIsBetter,
            QosKind::AverageResponseTime | QosKind::Vulnerability => Direction::LowerIsBetter,
        }
    }

    /// Name used in model files and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            QosKind::Availability => "Availability",
            QosKind::AverageResponseTime => "AverageResponseTime",
            QosKind::Vulnerability => "Vulnerability",
        }
    }
}

impl fmt::Display for QosKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Satisfaction bound of a QoS specification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosThreshold {
    Min(f64),
    Max(f64),
}

/// Importance weight and satisfaction threshold for one QoS kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QosSpecification {
    pub weight: f64,
    pub threshold: QosThreshold,
}

impl QosSpecification {
    pub fn new(weight: f64, threshold: QosThreshold) -> Self {
        Self { weight, threshold }
    }

    pub fn is_satisfied(&self, value: f64) -> bool {
        match self.threshold {
            QosThreshold::Min(min) => value >= min,
            QosThreshold::Max(max) => value <= max,
        }
    }

    pub fn constraint_description(&self) -> String {
        match self.threshold {
            QosThreshold::Min(min) => format!("value >= {min}"),
            QosThreshold::Max(max) => format!("value <= {max}"),
        }
    }
}

/// A single recorded QoS figure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QosValue {
    pub value: f64,
    /// Unix timestamp (seconds) when the value was recorded.
    pub timestamp: u64,
    /// Set once the value no longer reflects the running configuration.
    #[serde(default)]
    pub invalid: bool,
}

impl QosValue {
    pub fn new(value: f64, timestamp: u64) -> Self {
        Self {
            value,
            timestamp,
            invalid: false,
        }
    }
}

/// Per-kind, newest-first value log plus the current-value slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QosHistory {
    stacks: BTreeMap<QosKind, VecDeque<QosValue>>,
    current: BTreeMap<QosKind, QosValue>,
}

impl QosHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value on top of the stack for `kind`.
    pub fn push(&mut self, kind: QosKind, value: f64, timestamp: u64) {
        self.stacks
            .entry(kind)
            .or_default()
            .push_front(QosValue::new(value, timestamp));
    }

    /// Newest valid value for `kind`.
    pub fn latest(&self, kind: QosKind) -> Option<&QosValue> {
        self.stacks.get(&kind)?.iter().find(|v| !v.invalid)
    }

    /// Up to `n` newest valid values, newest first.
    pub fn latest_n(&self, kind: QosKind, n: usize) -> Vec<f64> {
        self.stacks
            .get(&kind)
            .map(|stack| {
                stack
                    .iter()
                    .filter(|v| !v.invalid)
                    .take(n)
                    .map(|v| v.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Exactly `n` newest valid values, or `None` when fewer are available.
    pub fn latest_analysis_window(&self, kind: QosKind, n: usize) -> Option<Vec<f64>> {
        let window = self.latest_n(kind, n);
        (window.len() == n).then_some(window)
    }

    /// Mark the latest value and every value before it as invalid.
    ///
    /// Returns how many values changed state.
    pub fn invalidate_latest_and_previous(&mut self, kind: QosKind) -> usize {
        let Some(stack) = self.stacks.get_mut(&kind) else {
            return 0;
        };
        let mut changed = 0;
        for value in stack.iter_mut().filter(|v| !v.invalid) {
            value.invalid = true;
            changed += 1;
        }
        changed
    }

    /// Invalidate every kind. Returns how many values changed state.
    pub fn invalidate_all(&mut self) -> usize {
        let kinds: Vec<QosKind> = self.stacks.keys().copied().collect();
        kinds
            .into_iter()
            .map(|kind| self.invalidate_latest_and_previous(kind))
            .sum()
    }

    /// True when no valid value is recorded for `kind`.
    pub fn is_empty(&self, kind: QosKind) -> bool {
        self.latest(kind).is_none()
    }

    pub fn current_value(&self, kind: QosKind) -> Option<f64> {
        self.current.get(&kind).map(|v| v.value)
    }

    pub fn set_current_value(&mut self, kind: QosKind, value: f64, timestamp: u64) {
        self.current.insert(kind, QosValue::new(value, timestamp));
    }

    /// All recorded values for `kind`, newest first, including invalid ones.
    pub fn values(&self, kind: QosKind) -> impl Iterator<Item = &QosValue> {
        self.stacks.get(&kind).into_iter().flatten()
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_returns_newest_valid_value() {
        let mut history = QosHistory::new();
        history.push(QosKind::Availability, 0.9, 10);
        history.push(QosKind::Availability, 0.95, 20);

        let latest = history.latest(QosKind::Availability).unwrap();
        assert_eq!(latest.value, 0.95);
        assert_eq!(latest.timestamp, 20);
        assert_eq!(history.latest_n(QosKind::Availability, 5), vec![0.95, 0.9]);
    }

    #[test]
    fn invalidation_hides_all_recorded_values() {
        let mut history = QosHistory::new();
        history.push(QosKind::AverageResponseTime, 120.0, 1);
        history.push(QosKind::AverageResponseTime, 130.0, 2);
        history.set_current_value(QosKind::AverageResponseTime, 125.0, 2);

        assert_eq!(history.invalidate_latest_and_previous(QosKind::AverageResponseTime), 2);
        assert!(history.is_empty(QosKind::AverageResponseTime));
        // Current value slot survives invalidation.
        assert_eq!(history.current_value(QosKind::AverageResponseTime), Some(125.0));

        // Values appended afterwards are valid again.
        history.push(QosKind::AverageResponseTime, 90.0, 3);
        assert_eq!(history.latest_n(QosKind::AverageResponseTime, 3), vec![90.0]);
        assert_eq!(history.values(QosKind::AverageResponseTime).count(), 3);
    }

    #[test]
    fn analysis_window_requires_enough_values() {
        let mut history = QosHistory::new();
        history.push(QosKind::Availability, 0.9, 1);
        history.push(QosKind::Availability, 0.8, 2);

        assert_eq!(history.latest_analysis_window(QosKind::Availability, 3), None);
        assert_eq!(
            history.latest_analysis_window(QosKind::Availability, 2),
            Some(vec![0.8, 0.9])
        );
    }

    #[test]
    fn invalidate_unknown_kind_is_noop() {
        let mut history = QosHistory::new();
        assert_eq!(history.invalidate_latest_and_previous(QosKind::Vulnerability), 0);
        assert_eq!(history.invalidate_all(), 0);
    }

    #[test]
    fn specification_thresholds() {
        let min = QosSpecification::new(0.5, QosThreshold::Min(0.95));
        assert!(min.is_satisfied(0.99));
        assert!(!min.is_satisfied(0.9));

        let max = QosSpecification::new(0.5, QosThreshold::Max(200.0));
        assert!(max.is_satisfied(150.0));
        assert!(!max.is_satisfied(250.0));
        assert_eq!(max.constraint_description(), "value <= 200");
    }

    #[test]
    fn directions() {
        assert_eq!(QosKind::Availability.direction(), Direction::HigherIsBetter);
        assert_eq!(QosKind::AverageResponseTime.direction(), Direction::LowerIsBetter);
        assert_eq!(QosKind::Vulnerability.direction(), Direction::LowerIsBetter);
    }
}
