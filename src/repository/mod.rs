//! Durable record of job and step executions.
//!
//! The launcher saves a job execution whenever its status changes and a step
//! execution at every commit point. Restart decisions are made from what the
//! repository returns, so an implementation must hand back what was last saved.

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    BatchError,
    core::{
        execution::{BatchStatus, JobExecution, StepExecution},
        parameters::JobParameters,
    },
};

#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub mod json;

pub mod memory;

/// Store of execution records.
///
/// Implementations serialize their writes: concurrent saves for one job
/// execution must never lose an update.
pub trait ExecutionRepository: Send + Sync {
    /// Inserts or replaces a job execution, step executions included.
    fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;

    /// Inserts or replaces a step execution within its job execution.
    fn save_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    /// Moves a running job execution to `STOPPING` in a single write.
    ///
    /// Returns `false`, leaving the record untouched, when it already reached a
    /// terminal status. Step executions of the record are never replaced.
    fn request_stop(&self, job_execution_id: Uuid) -> Result<bool, BatchError>;

    /// All executions of the job instance identified by `parameters`, oldest first.
    fn find_job_executions(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Vec<JobExecution>, BatchError>;

    fn find_job_execution(&self, id: Uuid) -> Result<Option<JobExecution>, BatchError>;

    /// Most recent execution of any instance of the job.
    fn find_last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError>;

    /// Most recent execution of the job instance identified by `parameters`.
    fn find_latest(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.find_job_executions(job_name, parameters)?.pop())
    }
}

/// Execution records kept in creation order, shared by the repositories of this module.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ExecutionStore {
    job_executions: Vec<JobExecution>,
}

impl ExecutionStore {
    pub(crate) fn save_job_execution(&mut self, job_execution: &JobExecution) {
        match self
            .job_executions
            .iter_mut()
            .find(|existing| existing.id == job_execution.id)
        {
            Some(existing) => *existing = job_execution.clone(),
            None => self.job_executions.push(job_execution.clone()),
        }
    }

    pub(crate) fn save_step_execution(
        &mut self,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError> {
        if step_execution.job_execution_id.is_nil() {
            debug!(
                "Step execution {} is detached from any job, not persisted",
                step_execution.name
            );
            return Ok(());
        }

        let job_execution = self
            .job_executions
            .iter_mut()
            .find(|existing| existing.id == step_execution.job_execution_id)
            .ok_or_else(|| BatchError::NoSuchExecution(step_execution.job_execution_id.to_string()))?;

        match job_execution
            .step_executions
            .iter_mut()
            .find(|existing| existing.id == step_execution.id)
        {
            Some(existing) => *existing = step_execution.clone(),
            None => job_execution.step_executions.push(step_execution.clone()),
        }
        Ok(())
    }

    pub(crate) fn request_stop(&mut self, job_execution_id: Uuid) -> Result<bool, BatchError> {
        let job_execution = self
            .job_executions
            .iter_mut()
            .find(|existing| existing.id == job_execution_id)
            .ok_or_else(|| BatchError::NoSuchExecution(job_execution_id.to_string()))?;

        if !job_execution.is_running() {
            return Ok(false);
        }
        job_execution.status = BatchStatus::Stopping;
        job_execution.last_updated = Some(Utc::now());
        Ok(true)
    }

    pub(crate) fn find_job_executions(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Vec<JobExecution> {
        let job_key = parameters.identifying_key();
        self.job_executions
            .iter()
            .filter(|execution| execution.job_name == job_name && execution.job_key() == job_key)
            .cloned()
            .collect()
    }

    pub(crate) fn find_job_execution(&self, id: Uuid) -> Option<JobExecution> {
        self.job_executions
            .iter()
            .find(|execution| execution.id == id)
            .cloned()
    }

    pub(crate) fn find_last_job_execution(&self, job_name: &str) -> Option<JobExecution> {
        self.job_executions
            .iter()
            .rev()
            .find(|execution| execution.job_name == job_name)
            .cloned()
    }
}
