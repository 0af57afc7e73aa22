//! Job model: what gets submitted and what the service reports back.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A statistical quantity a computation can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Mean,
    Variance,
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::Variance => write!(f, "variance"),
        }
    }
}

/// One requested statistic over one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticDefinition {
    /// Display name of the statistic
    pub name: String,

    /// Variable (column) the statistic is computed over
    pub variable: String,

    /// Quantities requested for this variable
    pub quantities: Vec<Quantity>,
}

impl StatisticDefinition {
    /// Create a statistic definition.
    pub fn new(
        name: impl Into<String>,
        variable: impl Into<String>,
        quantities: Vec<Quantity>,
    ) -> Self {
        Self {
            name: name.into(),
            variable: variable.into(),
            quantities,
        }
    }

    /// Whether the given quantity was requested.
    #[must_use]
    pub fn requests(&self, quantity: Quantity) -> bool {
        self.quantities.contains(&quantity)
    }
}

/// Parameters of the computation itself.
///
/// The computation types are owned by the remote service; the client only
/// forwards `kind` and `parameters` and reads `statistics` back when
/// post-processing DP results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationDefinition {
    /// Computation type understood by the service (e.g. `datasetStatistics`)
    pub kind: String,

    /// Opaque computation parameters
    #[serde(default)]
    pub parameters: serde_json::Value,

    /// Statistics requested, in the order the service aggregates them
    #[serde(default)]
    pub statistics: Vec<StatisticDefinition>,

    /// Differential privacy budget, when DP was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp_epsilon: Option<f64>,
}

impl ComputationDefinition {
    /// Create a definition with no statistics and no DP.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: serde_json::Value::Null,
            statistics: Vec::new(),
            dp_epsilon: None,
        }
    }

    /// Add a requested statistic.
    #[must_use]
    pub fn with_statistic(mut self, statistic: StatisticDefinition) -> Self {
        self.statistics.push(statistic);
        self
    }

    /// Enable differential privacy with the given budget.
    #[must_use]
    pub fn with_dp(mut self, epsilon: f64) -> Self {
        self.dp_epsilon = Some(epsilon);
        self
    }
}

/// Immutable description of a computation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Computation to run
    pub computation: ComputationDefinition,

    /// Target participants (empty means every participant of the project)
    #[serde(default)]
    pub participants: Vec<String>,

    /// Server-side execution timeout
    #[serde(default = "default_job_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Run only on the local instance instead of collectively
    #[serde(default)]
    pub local: bool,
}

impl JobDefinition {
    /// Create a collective job with a ten-minute server timeout.
    pub fn new(computation: ComputationDefinition) -> Self {
        Self {
            computation,
            participants: Vec::new(),
            timeout: default_job_timeout(),
            local: false,
        }
    }
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(600)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,

    /// Local submission time
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            submitted_at: chrono::Utc::now(),
        }
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Opaque identifier for one output artifact of a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultReference(pub String);

impl ResultReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
///
/// Transitions only move forward: `Requested -> Running -> {Success, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Requested,
    Running,
    Success,
    Error,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Requested => 0,
            Self::Running => 1,
            Self::Success | Self::Error => 2,
        }
    }

    /// Whether observing `next` after `self` respects the lifecycle.
    ///
    /// Repeated observations of the same state are allowed; a terminal state
    /// only admits itself.
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "REQUESTED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// One status read from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: JobStatus,

    /// Server-supplied message, set when `status` is `Error`
    #[serde(default)]
    pub error: Option<String>,

    /// Result references, in server order
    #[serde(default)]
    pub results: Vec<ResultReference>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            error: None,
            results: Vec::new(),
        }
    }

    pub fn success(results: Vec<ResultReference>) -> Self {
        Self {
            status: JobStatus::Success,
            error: None,
            results,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            error: Some(message.into()),
            results: Vec::new(),
        }
    }
}

/// A job that reached `Success` with a non-empty result set.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalJob {
    pub handle: JobHandle,
    pub results: Vec<ResultReference>,

    /// Number of status reads issued
    pub polls: u32,

    /// Time spent polling, as measured by the poller's clock
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(JobStatus::Requested.can_transition_to(JobStatus::Requested));
        assert!(JobStatus::Requested.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Requested.can_transition_to(JobStatus::Success));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Error));
    }

    #[test]
    fn test_regressions_rejected() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Requested));
        assert!(!JobStatus::Success.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Error.can_transition_to(JobStatus::Success));
        assert!(JobStatus::Success.can_transition_to(JobStatus::Success));
    }

    #[test]
    fn test_job_definition_json_shape() {
        let def = JobDefinition::new(
            ComputationDefinition::new("datasetStatistics")
                .with_statistic(StatisticDefinition::new(
                    "age stats",
                    "age",
                    vec![Quantity::Mean, Quantity::Variance],
                ))
                .with_dp(1.0),
        );

        let json = serde_json::to_value(&def).expect("serialize");
        assert_eq!(json["timeout"], 600);
        assert_eq!(json["computation"]["statistics"][0]["quantities"][1], "variance");

        let back: JobDefinition = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, def);
    }

    #[test]
    fn test_job_definition_timeout_defaults_to_ten_minutes() {
        let definition: JobDefinition =
            serde_json::from_str(r#"{"computation":{"kind":"sum"}}"#).expect("valid job");

        assert_eq!(definition.timeout, Duration::from_secs(600));
        assert_eq!(definition.timeout, JobDefinition::new(definition.computation.clone()).timeout);
        assert!(definition.participants.is_empty());
        assert!(!definition.local);
    }

    #[test]
    fn test_status_report_defaults() {
        let report: StatusReport =
            serde_json::from_str(r#"{"status":"running"}"#).expect("deserialize");
        assert_eq!(report.status, JobStatus::Running);
        assert!(report.results.is_empty());
        assert!(report.error.is_none());
    }
}
