use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::BatchError;

use super::parameters::{JobParameters, ParameterValue};

/// Lifecycle status shared by job and step executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Status of a batch job prior to its execution.
    Starting,
    /// Status of a batch job that is running.
    Started,
    /// Status of a batch job waiting for a step to complete before stopping.
    Stopping,
    /// Status of a batch job that has been stopped by request.
    Stopped,
    /// Status of a batch job that has failed during its execution.
    Failed,
    /// The batch job has successfully completed its execution.
    Completed,
    /// Status of a batch job that did not stop properly and can not be restarted.
    Abandoned,
    /// Status of a batch job that is in an uncertain state.
    Unknown,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    /// Whether an execution in this status may be restarted.
    pub fn is_restartable(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Stopped)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", label)
    }
}

pub const EXECUTING: &str = "EXECUTING";
pub const COMPLETED: &str = "COMPLETED";
pub const NOOP: &str = "NOOP";
pub const STOPPED: &str = "STOPPED";
pub const FAILED: &str = "FAILED";
pub const UNKNOWN: &str = "UNKNOWN";

/// Exit code and description of a finished (or running) execution.
///
/// Conditional transitions between steps match on `exit_code`. Custom codes are
/// allowed; the well known ones are the constants of this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub fn new(exit_code: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            exit_description: String::new(),
        }
    }

    pub fn executing() -> Self {
        Self::new(EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(NOOP)
    }

    pub fn stopped() -> Self {
        Self::new(STOPPED)
    }

    pub fn failed() -> Self {
        Self::new(FAILED)
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN)
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.exit_description = description.to_string();
        self
    }

    fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            EXECUTING => 1,
            COMPLETED => 2,
            NOOP => 3,
            STOPPED => 4,
            FAILED => 5,
            UNKNOWN => 6,
            _ => 7,
        }
    }

    /// Combines two statuses, keeping the most severe exit code.
    ///
    /// Descriptions are concatenated so that no failure message is lost.
    pub fn and(self, other: ExitStatus) -> ExitStatus {
        let mut result = if other.severity() > self.severity() {
            ExitStatus::new(&other.exit_code)
        } else {
            ExitStatus::new(&self.exit_code)
        };

        result.exit_description = [self.exit_description, other.exit_description]
            .into_iter()
            .filter(|description| !description.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        result
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == EXECUTING || self.exit_code == UNKNOWN
    }

    /// Process exit code for launchers: 0 on success, 1 on failure, 2 otherwise.
    pub fn process_exit_code(&self) -> i32 {
        match self.exit_code.as_str() {
            COMPLETED | NOOP => 0,
            FAILED => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exit_description.is_empty() {
            write!(f, "{}", self.exit_code)
        } else {
            write!(f, "{}: {}", self.exit_code, self.exit_description)
        }
    }
}

/// Key/value state a step persists at every commit point.
///
/// Readers store their position here so that a restarted step resumes after the
/// last committed chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), BatchError> {
        self.entries
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn put_usize(&mut self, key: &str, value: usize) {
        self.entries.insert(key.to_string(), Value::from(value));
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BatchError> {
        match self.entries.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.entries
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run record of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Name of the executed step
    pub name: String,
    /// Owning job execution
    pub job_execution_id: Uuid,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    /// Job parameters, resolved when the step scope was created
    pub parameters: JobParameters,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Number of items read in committed chunks
    pub read_count: usize,
    /// Number of items written in committed chunks
    pub write_count: usize,
    /// Number of items dropped by the processor
    pub filter_count: usize,
    /// Number of read errors tolerated by the skip limit
    pub read_skip_count: usize,
    /// Number of processing errors tolerated by the skip limit
    pub process_skip_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    pub execution_context: ExecutionContext,
}

impl StepExecution {
    /// Creates a detached step execution, mostly useful to call a tasklet directly.
    pub fn new(name: &str) -> Self {
        Self::for_job(name, Uuid::nil(), JobParameters::new())
    }

    pub(crate) fn for_job(name: &str, job_execution_id: Uuid, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            job_execution_id,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            parameters,
            start_time: None,
            end_time: None,
            last_updated: None,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            execution_context: ExecutionContext::new(),
        }
    }

    /// Returns a resolved job parameter, `None` when it was not supplied.
    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name)
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn summary(&self) -> StepSummary {
        StepSummary {
            name: self.name.clone(),
            status: self.status,
            exit_status: self.exit_status.clone(),
            read_count: self.read_count,
            write_count: self.write_count,
            filter_count: self.filter_count,
            skip_count: self.skip_count(),
            commit_count: self.commit_count,
        }
    }
}

/// Run record of one job launch.
///
/// Restarts of the same job instance share `instance_id` and get a new `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Step executions of this run, in execution order
    pub step_executions: Vec<StepExecution>,
    pub failure_exceptions: Vec<String>,
    /// Node a restart of the instance resumes at, once a `stop_and_restart` transition fired
    #[serde(default)]
    pub restart_node: Option<String>,
}

impl JobExecution {
    pub fn new(job_name: &str, instance_id: Uuid, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            job_name: job_name.to_string(),
            parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            step_executions: Vec::new(),
            failure_exceptions: Vec::new(),
            restart_node: None,
        }
    }

    /// Key of the job instance this execution belongs to.
    pub fn job_key(&self) -> String {
        self.parameters.identifying_key()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Last execution of the named step within this run.
    pub fn step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|step_execution| step_execution.name == name)
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn summary(&self) -> JobExecutionSummary {
        JobExecutionSummary {
            id: self.id,
            job_name: self.job_name.clone(),
            status: self.status,
            exit_code: self.exit_status.exit_code.clone(),
            exit_description: self.exit_status.exit_description.clone(),
            step_summaries: self
                .step_executions
                .iter()
                .map(StepExecution::summary)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub skip_count: usize,
    pub commit_count: usize,
}

/// What a launcher returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionSummary {
    pub id: Uuid,
    pub job_name: String,
    pub status: BatchStatus,
    pub exit_code: String,
    pub exit_description: String,
    pub step_summaries: Vec<StepSummary>,
}
