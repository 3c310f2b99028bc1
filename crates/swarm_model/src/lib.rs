use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type SubmitterId = i64;
pub type JobId = i64;
pub type RunId = i64;
pub type AssignmentId = i64;
pub type ResultId = i64;
pub type ClientId = i64;

/// Stable identifier of an execution endpoint, e.g. a browser/OS signature.
pub type TargetId = String;

/// Longest job or run name accepted by a submission, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Valid range for `Submission::max_attempts`.
pub const MIN_ATTEMPTS: i64 = 1;
pub const MAX_ATTEMPTS: i64 = 99;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub url: String,
}

impl RunSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A job submission as delivered by the request layer.
///
/// Run names and urls arrive as index-aligned arrays and may be sparse: a slot
/// where both are empty is a blank form row, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub submitter_id: SubmitterId,
    pub job_name: String,
    pub max_attempts: i64,
    #[serde(default)]
    pub run_names: Vec<String>,
    #[serde(default)]
    pub run_urls: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Submission {
    pub fn new(submitter_id: SubmitterId, job_name: impl Into<String>, max_attempts: i64) -> Self {
        Self {
            submitter_id,
            job_name: job_name.into(),
            max_attempts,
            run_names: Vec::new(),
            run_urls: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn run(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.run_names.push(name.into());
        self.run_urls.push(url.into());
        self
    }

    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.groups.push(name.into());
        self
    }
}

/// De-duplicated set of targets resolved from one or more groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetSet(BTreeSet<TargetId>);

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_from<'a>(&mut self, targets: impl IntoIterator<Item = &'a TargetId>) {
        self.0.extend(targets.into_iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.0.contains(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetId> {
        self.0.iter()
    }
}

impl<T: Into<TargetId>> FromIterator<T> for TargetSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Available,
    InProgress,
    Completed,
}

impl AssignmentStatus {
    pub fn code(self) -> i64 {
        match self {
            AssignmentStatus::Available => 0,
            AssignmentStatus::InProgress => 1,
            AssignmentStatus::Completed => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AssignmentStatus::Available),
            1 => Some(AssignmentStatus::InProgress),
            2 => Some(AssignmentStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    InProgress,
    Completed,
    Aborted,
    Heartbeat,
    Lost,
}

impl ResultStatus {
    pub fn code(self) -> i64 {
        match self {
            ResultStatus::InProgress => 1,
            ResultStatus::Completed => 2,
            ResultStatus::Aborted => 3,
            ResultStatus::Heartbeat => 4,
            ResultStatus::Lost => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ResultStatus::InProgress),
            2 => Some(ResultStatus::Completed),
            3 => Some(ResultStatus::Aborted),
            4 => Some(ResultStatus::Heartbeat),
            5 => Some(ResultStatus::Lost),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResultStatus::Completed | ResultStatus::Aborted | ResultStatus::Lost
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub id: JobId,
    pub submitter_id: SubmitterId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRow {
    pub id: RunId,
    pub job_id: JobId,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub id: AssignmentId,
    pub run_id: RunId,
    pub target_id: TargetId,
    pub max_attempts: i64,
    pub status: AssignmentStatus,
    pub result_id: Option<ResultId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: ResultId,
    pub run_id: RunId,
    pub client_id: ClientId,
    pub status: ResultStatus,
    pub fail: i64,
    pub error: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRow {
    pub id: ClientId,
    pub submitter_id: SubmitterId,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub run_count: usize,
    pub target_count: usize,
}

impl SubmitReceipt {
    pub fn assignment_count(&self) -> usize {
        self.run_count * self.target_count
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchdogReport {
    pub recovered_count: usize,
    pub orphan_results_deleted: usize,
    pub idle_clients_deleted: usize,
    pub accounts_deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReapReport {
    pub deleted_job_count: usize,
    pub artifact_dirs_removed: usize,
    pub artifact_dirs_skipped: usize,
}

/// Row counts per table, used for status output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreCounts {
    pub accounts: usize,
    pub jobs: usize,
    pub runs: usize,
    pub assignments: usize,
    pub results: usize,
    pub clients: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MissingParameters,
    InvalidInput,
    DataCorrupt,
    InternalError,
    Unauthorized,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::MissingParameters => "missing-parameters",
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::DataCorrupt => "data-corrupt",
            ErrorKind::InternalError => "internal-error",
            ErrorKind::Unauthorized => "unauthorized",
        };
        f.write_str(label)
    }
}

/// Failure payload returned to the caller of a rejected operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}
