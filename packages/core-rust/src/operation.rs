//! Operation record and its lifecycle state machine.
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!    │            │    └───▶ failed
//!    └────────────┴────────▶ cancelled
//! ```
//!
//! `completed`, `failed` and `cancelled` are terminal. The transition methods
//! on [`Operation`] are the only way to move a record between states; each
//! one checks legality first and leaves the record untouched on refusal.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Downstream tools an investigation conceptually runs through. Display only.
pub const DEFAULT_RESOURCES: [&str; 3] = ["Scrapy", "SpiderFoot", "AI Analysis"];

/// Reason recorded on operations cancelled through the public API.
pub const CANCELLED_BY_CALLER: &str = "cancelled by caller";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Error returned when a status or priority string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    /// Which enum was being parsed (`"status"` or `"priority"`).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Every status, in state-machine order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` for states that accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if the state machine permits `self -> next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Cancelled)
                | (
                    Self::Processing,
                    Self::Completed | Self::Failed | Self::Cancelled
                )
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// Scheduling priority attached to an operation at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Every priority, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Wire name of the priority.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parses an optional caller-supplied priority.
    ///
    /// Absent or blank input falls back to [`Priority::Medium`].
    ///
    /// # Errors
    ///
    /// Returns [`ParseEnumError`] for any other unrecognised value.
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, ParseEnumError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(value) => value.parse(),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|priority| priority.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "priority",
                value: s.to_string(),
            })
    }
}

/// Refused state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: OperationStatus,
    pub to: OperationStatus,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One tracked investigation.
///
/// Timestamps are Unix milliseconds. Optional fields are omitted from JSON
/// until they are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub target: String,
    pub status: OperationStatus,
    pub priority: Priority,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings_count: Option<u32>,
}

impl Operation {
    /// Creates a `pending` record with zero progress.
    #[must_use]
    pub fn new(id: String, target: String, priority: Priority, created_at: u64) -> Self {
        Self {
            id,
            target,
            status: OperationStatus::Pending,
            priority,
            progress: 0,
            created_at,
            started_at: None,
            completed_at: None,
            current_stage: None,
            results: None,
            error: None,
            duration: None,
            resources: DEFAULT_RESOURCES.iter().map(ToString::to_string).collect(),
            risk_score: None,
            findings_count: None,
        }
    }

    /// Returns `true` once the record has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time between `started_at` and `completed_at`, if both are set.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some(Duration::from_millis(completed.saturating_sub(started)))
            }
            _ => None,
        }
    }

    fn check(&self, to: OperationStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    /// `pending -> processing`. Sets `started_at` in the same step.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the record is `pending`.
    pub fn start(&mut self, now: u64) -> Result<(), TransitionError> {
        self.check(OperationStatus::Processing)?;
        self.status = OperationStatus::Processing;
        self.started_at = Some(now);
        Ok(())
    }

    /// Records a completed stage while `processing`.
    ///
    /// Progress never moves backwards; a lower value than the current one is
    /// ignored. Values above 100 are clamped.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the record is `processing`.
    pub fn advance(&mut self, stage: &str, progress: u8) -> Result<(), TransitionError> {
        if self.status != OperationStatus::Processing {
            return Err(TransitionError {
                from: self.status,
                to: OperationStatus::Processing,
            });
        }
        self.progress = self.progress.max(progress.min(100));
        self.current_stage = Some(stage.to_string());
        Ok(())
    }

    /// `processing -> completed`.
    ///
    /// Fills `results`, the derived `risk_score`/`findings_count`, progress
    /// 100 and the duration.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the record is `processing`.
    pub fn complete(&mut self, now: u64, results: Value) -> Result<(), TransitionError> {
        self.check(OperationStatus::Completed)?;
        self.status = OperationStatus::Completed;
        self.progress = 100;
        self.risk_score = results.get("risk_score").and_then(Value::as_f64);
        self.findings_count = results
            .get("findings_count")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());
        self.results = Some(results);
        self.finish(now);
        Ok(())
    }

    /// `processing -> failed` with a reason.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the record is `processing`.
    pub fn fail(&mut self, now: u64, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.check(OperationStatus::Failed)?;
        self.status = OperationStatus::Failed;
        self.error = Some(reason.into());
        self.finish(now);
        Ok(())
    }

    /// `{pending, processing} -> cancelled`.
    ///
    /// Returns `false` without touching the record when it is already
    /// terminal, so repeated cancels are harmless.
    pub fn cancel(&mut self, now: u64, reason: impl Into<String>) -> bool {
        if self.check(OperationStatus::Cancelled).is_err() {
            return false;
        }
        self.status = OperationStatus::Cancelled;
        self.progress = 0;
        self.error = Some(reason.into());
        self.finish(now);
        true
    }

    fn finish(&mut self, now: u64) {
        let completed = self.started_at.map_or(now, |started| now.max(started));
        self.completed_at = Some(completed);
        self.duration = self
            .elapsed()
            .map(|elapsed| humantime::format_duration(elapsed).to_string());
    }
}
