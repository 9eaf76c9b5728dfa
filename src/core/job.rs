//! Job record data model: identifiers, priorities, concurrency classes, the
//! status state machine and the opaque request/progress payloads.

use std::fmt;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier assigned to a job at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Scheduling priority. Declaration order gives `Stat > High > Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Normal,
    /// Interactive work that should run ahead of background work.
    High,
    /// Time-critical work served by the reserved stat lane.
    Stat,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::High => "High",
            Self::Stat => "Stat",
        };
        f.write_str(name)
    }
}

/// Compatibility category deciding which jobs may run side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyClass {
    /// Conflicts with every other job regardless of scope.
    Exclusive,
    /// Runs alongside anything that is not exclusive.
    NonExclusive,
    /// Work that will trigger a later scope update (e.g. a retrieve).
    ScopeUpdateTrigger,
    /// Writes into a scope (e.g. receiving or processing a study).
    ScopeUpdate,
    /// Removes a scope or part of it.
    ScopeDelete,
    /// Reads a scope (e.g. sending a study elsewhere).
    ScopeRead,
}

impl ConcurrencyClass {
    /// Whether a candidate of this class may start while `other` holds the same scope.
    ///
    /// The relation is keyed on the candidate and is not symmetric: a scope
    /// update may join a running update trigger, but not the reverse.
    #[must_use]
    pub const fn can_run_concurrently_with(self, other: Self) -> bool {
        match self {
            Self::Exclusive => false,
            Self::NonExclusive => !matches!(other, Self::Exclusive),
            Self::ScopeUpdateTrigger | Self::ScopeDelete => matches!(other, Self::NonExclusive),
            Self::ScopeUpdate => matches!(other, Self::ScopeUpdateTrigger | Self::NonExclusive),
            Self::ScopeRead => matches!(other, Self::ScopeRead | Self::NonExclusive),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its first admission attempt.
    Pending,
    /// Admitted and owned by a worker.
    InProgress,
    /// Postponed after a failed admission attempt; re-evaluated in place.
    Idle,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// Cancel was forwarded to a running processor.
    Canceling,
    /// Canceled before or during processing.
    Canceled,
    /// The deletion sweep owns the record.
    DeleteInProgress,
    /// Marked for removal; purged by the deletion sweep.
    Deleted,
}

impl JobStatus {
    /// Holding a worker slot (`InProgress` or `Canceling`).
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::InProgress | Self::Canceling)
    }

    /// Finished with a final outcome and eligible for the deletion sweep.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Canceled)
    }

    /// Not yet started (`Pending` or `Idle`).
    #[must_use]
    pub const fn is_waiting(self) -> bool {
        matches!(self, Self::Pending | Self::Idle)
    }

    /// Whether the state machine permits `self -> to` for an external edit.
    ///
    /// A running job only leaves `InProgress` through its processor or crash
    /// recovery, never back to a waiting state.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        use JobStatus::{
            Canceled, Canceling, Complete, DeleteInProgress, Deleted, Failed, Idle, InProgress,
            Pending,
        };
        matches!(
            (self, to),
            (Pending, InProgress | Idle | Canceling | Canceled | Deleted)
                | (Idle, InProgress | Canceling | Canceled | Deleted)
                | (InProgress, Complete | Failed | Canceling | Canceled | DeleteInProgress)
                | (Canceling, Canceled | Complete | Failed)
                | (Complete, DeleteInProgress | Deleted)
                | (Failed | Canceled, DeleteInProgress | Deleted | Pending)
                | (DeleteInProgress, Deleted | Failed)
                | (Deleted, DeleteInProgress)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status predicate used by store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Any status.
    Any,
    /// `Pending`, `InProgress`, `Idle` or `Canceling`.
    Active,
    /// `InProgress` or `Canceling`.
    Running,
    /// Running or `Idle`.
    RunningOrIdle,
    /// Exactly one status.
    Only(JobStatus),
}

impl StatusFilter {
    /// Whether `status` passes the filter.
    #[must_use]
    pub const fn matches(self, status: JobStatus) -> bool {
        match self {
            Self::Any => true,
            Self::Active => status.is_running() || status.is_waiting(),
            Self::Running => status.is_running(),
            Self::RunningOrIdle => status.is_running() || matches!(status, JobStatus::Idle),
            Self::Only(only) => status as u8 == only as u8,
        }
    }
}

impl From<JobStatus> for StatusFilter {
    fn from(status: JobStatus) -> Self {
        Self::Only(status)
    }
}

/// Daily processing window in whole UTC hours, `[start_hour, end_hour)`.
///
/// A window with `start_hour > end_hour` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// First hour (0-23) inside the window.
    pub start_hour: u32,
    /// First hour (0-23) after the window.
    pub end_hour: u32,
}

impl TimeWindow {
    /// Window opening at `start_hour` and closing at `end_hour`.
    #[must_use]
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// Next time the job may be scheduled when it is postponed at `now`.
    ///
    /// Inside the window this is `now + delay`; outside it is the next
    /// opening of the window.
    #[must_use]
    pub fn scheduled_time(&self, now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        let hour = now.hour();
        let inside = if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            hour >= self.start_hour && hour < self.end_hour
        };
        if inside {
            return now + delay;
        }

        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map_or(now, |t| t.and_utc());
        let opening_today = midnight + Duration::hours(i64::from(self.start_hour));
        if self.start_hour > self.end_hour || hour < self.start_hour {
            opening_today
        } else {
            opening_today + Duration::days(1)
        }
    }
}

/// Submission payload. The engine reads only the scheduling fields; `data`
/// belongs to the processor registered for `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Processor selector.
    pub kind: String,
    /// Compatibility class, fixed for the job's lifetime.
    pub concurrency: ConcurrencyClass,
    /// Requested priority.
    pub priority: Priority,
    /// Scope key (e.g. a study instance UID).
    pub scope: Option<String>,
    /// Human-readable activity, used in waiting reasons and logs.
    pub description: String,
    /// Optional daily processing window.
    pub time_window: Option<TimeWindow>,
    /// Processor-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl JobRequest {
    /// Request of `kind` in `concurrency` class with normal priority.
    pub fn new(kind: impl Into<String>, concurrency: ConcurrencyClass) -> Self {
        let kind = kind.into();
        Self {
            description: kind.clone(),
            kind,
            concurrency,
            priority: Priority::Normal,
            scope: None,
            time_window: None,
            data: serde_json::Value::Null,
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the scope key.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the activity description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restrict processing to a daily window.
    #[must_use]
    pub const fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    /// Attach the processor payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Import of loose files.
    #[must_use]
    pub fn import_files() -> Self {
        Self::new(kinds::IMPORT_FILES, ConcurrencyClass::NonExclusive)
            .with_priority(Priority::High)
            .with_description("Import files")
    }

    /// Retrieve of a study from a remote server.
    pub fn retrieve_study(scope: impl Into<String>) -> Self {
        Self::new(kinds::DICOM_RETRIEVE, ConcurrencyClass::ScopeUpdateTrigger)
            .with_priority(Priority::High)
            .with_scope(scope)
            .with_description("Retrieve study")
    }

    /// Processing of received study content.
    pub fn process_study(scope: impl Into<String>) -> Self {
        Self::new(kinds::PROCESS_STUDY, ConcurrencyClass::ScopeUpdate)
            .with_priority(Priority::High)
            .with_scope(scope)
            .with_description("Process study")
    }

    /// Send of a study to a remote server.
    pub fn send_study(scope: impl Into<String>) -> Self {
        Self::new(kinds::DICOM_SEND, ConcurrencyClass::ScopeRead)
            .with_priority(Priority::High)
            .with_scope(scope)
            .with_description("Send study")
    }

    /// Deletion of a study.
    pub fn delete_study(scope: impl Into<String>) -> Self {
        Self::new(kinds::DELETE_STUDY, ConcurrencyClass::ScopeDelete)
            .with_priority(Priority::High)
            .with_scope(scope)
            .with_description("Delete study")
    }

    /// Rebuild of the whole local index.
    #[must_use]
    pub fn reindex() -> Self {
        Self::new(kinds::REINDEX, ConcurrencyClass::Exclusive)
            .with_priority(Priority::High)
            .with_description("Reindex")
    }
}

/// Well-known job kinds.
pub mod kinds {
    /// Import of loose files.
    pub const IMPORT_FILES: &str = "Import";
    /// Retrieve from a remote server.
    pub const DICOM_RETRIEVE: &str = "DicomRetrieve";
    /// Processing of received study content.
    pub const PROCESS_STUDY: &str = "ProcessStudy";
    /// Send to a remote server.
    pub const DICOM_SEND: &str = "DicomSend";
    /// Rebuild of the local index; deduplicated on intake.
    pub const REINDEX: &str = "ReIndex";
    /// Study deletion; deduplicated per scope and hides the scope on intake.
    pub const DELETE_STUDY: &str = "DeleteStudy";
    /// Series deletion.
    pub const DELETE_SERIES: &str = "DeleteSeries";
    /// Re-application of storage rules.
    pub const REAPPLY_RULES: &str = "ReapplyRules";
}

/// Progress payload updated by the processor while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Free-text detail: waiting reason, failure message, current step.
    pub status_details: String,
    /// Whether a cancel request may be honoured.
    pub cancelable: bool,
    /// Processor-specific counters.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            status_details: String::new(),
            cancelable: true,
            data: serde_json::Value::Null,
        }
    }
}

impl JobProgress {
    /// Progress for work that must not be interrupted.
    #[must_use]
    pub fn non_cancelable() -> Self {
        Self {
            cancelable: false,
            ..Self::default()
        }
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier.
    pub id: JobId,
    /// Processor selector, immutable.
    pub kind: String,
    /// Scope key for per-scope conflict checks.
    pub scope: Option<String>,
    /// Current priority.
    pub priority: Priority,
    /// Compatibility class, immutable.
    pub concurrency: ConcurrencyClass,
    /// Lifecycle status.
    pub status: JobStatus,
    /// When the job was submitted.
    pub requested_time: DateTime<Utc>,
    /// Position in the schedule, used for importance ordering.
    pub scheduled_time: DateTime<Utc>,
    /// Earliest time the job may be fetched for processing.
    pub process_time: DateTime<Utc>,
    /// When the job is considered stale.
    pub expiration_time: DateTime<Utc>,
    /// When a finished job becomes eligible for the deletion sweep.
    pub delete_time: DateTime<Utc>,
    /// Number of non-fatal failures.
    pub failure_count: u32,
    /// Submission payload.
    pub request: JobRequest,
    /// Progress payload.
    pub progress: JobProgress,
}

impl Job {
    /// New pending job with every timestamp set to `now`.
    #[must_use]
    pub fn new(request: JobRequest, progress: JobProgress, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            kind: request.kind.clone(),
            scope: request.scope.clone().filter(|s| !s.is_empty()),
            priority: request.priority,
            concurrency: request.concurrency,
            status: JobStatus::Pending,
            requested_time: now,
            scheduled_time: now,
            process_time: now,
            expiration_time: now,
            delete_time: now,
            failure_count: 0,
            request,
            progress,
        }
    }

    /// Activity description for logs and waiting reasons.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.request.description
    }

    /// Move the job's eligibility forward by `delay`, honouring its time window.
    ///
    /// Stat jobs ignore the window. The status is left untouched.
    pub fn postpone(&mut self, now: DateTime<Utc>, delay: Duration) {
        match self.request.time_window {
            Some(window) if self.priority != Priority::Stat => {
                let at = window.scheduled_time(now, delay);
                self.process_time = at;
                self.scheduled_time = at;
            }
            _ => self.process_time = now + delay,
        }
        if self.process_time > self.expiration_time {
            self.expiration_time = self.process_time;
        }
    }

    /// Whether `self` outranks `candidate` in the schedule at `now`.
    ///
    /// Jobs scheduled in the future never outrank anything. Otherwise a
    /// higher priority wins, and at equal priority the earlier schedule wins.
    #[must_use]
    pub fn is_scheduled_before_or_higher_priority(
        &self,
        time: DateTime<Utc>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> bool {
        self.scheduled_time <= now
            && (self.priority > priority
                || (self.priority == priority && self.scheduled_time < time))
    }

    /// Compact view published to change subscribers.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            kind: self.kind.clone(),
            scope: self.scope.clone(),
            priority: self.priority,
            status: self.status,
            process_time: self.process_time,
            failure_count: self.failure_count,
            status_details: self.progress.status_details.clone(),
        }
    }
}

/// Snapshot of the fields subscribers care about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job identifier.
    pub id: JobId,
    /// Job kind.
    pub kind: String,
    /// Scope key.
    pub scope: Option<String>,
    /// Priority.
    pub priority: Priority,
    /// Status.
    pub status: JobStatus,
    /// Next eligibility time.
    pub process_time: DateTime<Utc>,
    /// Non-fatal failure count.
    pub failure_count: u32,
    /// Waiting reason or failure message.
    pub status_details: String,
}
