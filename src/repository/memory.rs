use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::{
    BatchError,
    core::{
        execution::{JobExecution, StepExecution},
        parameters::JobParameters,
    },
};

use super::{ExecutionRepository, ExecutionStore};

/// Repository keeping every record in memory for the lifetime of the process.
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    store: Mutex<ExecutionStore>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> Result<MutexGuard<'_, ExecutionStore>, BatchError> {
        self.store
            .lock()
            .map_err(|error| BatchError::Repository(error.to_string()))
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        self.store()?.save_job_execution(job_execution);
        Ok(())
    }

    fn save_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.store()?.save_step_execution(step_execution)
    }

    fn request_stop(&self, job_execution_id: Uuid) -> Result<bool, BatchError> {
        self.store()?.request_stop(job_execution_id)
    }

    fn find_job_executions(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Vec<JobExecution>, BatchError> {
        Ok(self.store()?.find_job_executions(job_name, parameters))
    }

    fn find_job_execution(&self, id: Uuid) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.store()?.find_job_execution(id))
    }

    fn find_last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.store()?.find_last_job_execution(job_name))
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{
        execution::BatchStatus,
        parameters::JobParametersBuilder,
    };

    use super::*;

    fn parameters(date: &str) -> JobParameters {
        JobParametersBuilder::new().add_string("requestDate", date).build()
    }

    #[test]
    fn saved_job_execution_is_found_by_instance() -> Result<(), BatchError> {
        let repository = InMemoryExecutionRepository::new();
        let execution = JobExecution::new("job", Uuid::new_v4(), parameters("20180101"));
        repository.save_job_execution(&execution)?;

        let latest = repository.find_latest("job", &parameters("20180101"))?;
        assert_eq!(latest.map(|e| e.id), Some(execution.id));
        assert!(repository.find_latest("job", &parameters("20180102"))?.is_none());
        assert!(repository.find_latest("other", &parameters("20180101"))?.is_none());
        Ok(())
    }

    #[test]
    fn saving_again_replaces_the_record() -> Result<(), BatchError> {
        let repository = InMemoryExecutionRepository::new();
        let mut execution = JobExecution::new("job", Uuid::new_v4(), parameters("d"));
        repository.save_job_execution(&execution)?;

        execution.status = BatchStatus::Completed;
        repository.save_job_execution(&execution)?;

        let executions = repository.find_job_executions("job", &parameters("d"))?;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, BatchStatus::Completed);
        Ok(())
    }

    #[test]
    fn step_executions_are_upserted_into_their_job() -> Result<(), BatchError> {
        let repository = InMemoryExecutionRepository::new();
        let execution = JobExecution::new("job", Uuid::new_v4(), parameters("d"));
        repository.save_job_execution(&execution)?;

        let mut step_execution = StepExecution::for_job("step", execution.id, parameters("d"));
        repository.save_step_execution(&step_execution)?;
        step_execution.write_count = 5;
        repository.save_step_execution(&step_execution)?;

        let stored = repository.find_job_execution(execution.id)?.unwrap();
        assert_eq!(stored.step_executions.len(), 1);
        assert_eq!(stored.step_executions[0].write_count, 5);
        Ok(())
    }

    #[test]
    fn step_execution_of_unknown_job_is_rejected() {
        let repository = InMemoryExecutionRepository::new();
        let step_execution = StepExecution::for_job("step", Uuid::new_v4(), JobParameters::new());

        let result = repository.save_step_execution(&step_execution);
        assert!(matches!(result, Err(BatchError::NoSuchExecution(_))));
    }

    #[test]
    fn last_job_execution_spans_instances() -> Result<(), BatchError> {
        let repository = InMemoryExecutionRepository::new();
        let first = JobExecution::new("job", Uuid::new_v4(), parameters("a"));
        let second = JobExecution::new("job", Uuid::new_v4(), parameters("b"));
        repository.save_job_execution(&first)?;
        repository.save_job_execution(&second)?;

        let last = repository.find_last_job_execution("job")?;
        assert_eq!(last.map(|e| e.id), Some(second.id));
        Ok(())
    }

    #[test]
    fn stop_request_only_moves_running_executions() -> Result<(), BatchError> {
        let repository = InMemoryExecutionRepository::new();
        let mut execution = JobExecution::new("job", Uuid::new_v4(), parameters("d"));
        execution.status = BatchStatus::Started;
        repository.save_job_execution(&execution)?;

        let mut step_execution = StepExecution::for_job("step", execution.id, parameters("d"));
        step_execution.commit_count = 2;
        repository.save_step_execution(&step_execution)?;

        assert!(repository.request_stop(execution.id)?);
        let stored = repository.find_job_execution(execution.id)?.unwrap();
        assert_eq!(stored.status, BatchStatus::Stopping);
        assert_eq!(stored.step_executions.len(), 1);
        assert_eq!(stored.step_executions[0].commit_count, 2);

        execution.status = BatchStatus::Completed;
        repository.save_job_execution(&execution)?;
        assert!(!repository.request_stop(execution.id)?);
        let stored = repository.find_job_execution(execution.id)?.unwrap();
        assert_eq!(stored.status, BatchStatus::Completed);
        Ok(())
    }

    #[test]
    fn stop_request_of_unknown_execution_is_rejected() {
        let repository = InMemoryExecutionRepository::new();
        let result = repository.request_stop(Uuid::new_v4());
        assert!(matches!(result, Err(BatchError::NoSuchExecution(_))));
    }
}
