use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use log::debug;

use crate::{BatchError, repository::ExecutionRepository};

use super::{
    chunk::ChunkOrientedStepBuilder,
    event::{BatchEvent, EventListener},
    execution::{BatchStatus, ExitStatus, StepExecution},
};

/// A stage of a job: either a [`TaskletStep`] or a chunk-oriented step.
///
/// The launcher creates the [`StepExecution`] (with job parameters already
/// resolved), marks it started and hands it to `execute`. When `execute` returns
/// `Ok` the step completed, unless it set the status to `Stopped` itself. When it
/// returns `Err` the launcher marks the execution failed.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Job parameters the step cannot run without.
    fn required_parameters(&self) -> &[String] {
        &[]
    }

    /// Whether the step runs again on restart even if it completed before.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError>;
}

/// Per-run collaborators handed down to a running step.
pub struct StepContext<'r> {
    job_name: &'r str,
    repository: &'r dyn ExecutionRepository,
    listeners: &'r [Arc<dyn EventListener>],
    stop_signal: &'r AtomicBool,
}

impl<'r> StepContext<'r> {
    pub fn new(
        job_name: &'r str,
        repository: &'r dyn ExecutionRepository,
        listeners: &'r [Arc<dyn EventListener>],
        stop_signal: &'r AtomicBool,
    ) -> Self {
        Self {
            job_name,
            repository,
            listeners,
            stop_signal,
        }
    }

    pub fn job_name(&self) -> &str {
        self.job_name
    }

    /// Whether a stop was requested for the running job execution.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    pub fn publish(&self, event: BatchEvent) {
        for listener in self.listeners {
            listener.on_event(&event);
        }
    }

    /// Records a commit point: the step execution, counters and execution context
    /// included, is saved to the repository.
    pub fn commit(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        step_execution.commit_count += 1;
        step_execution.last_updated = Some(Utc::now());
        self.repository.save_step_execution(step_execution)?;

        self.publish(BatchEvent::ChunkCommitted {
            step_name: step_execution.name.clone(),
            step_execution_id: step_execution.id,
            commit_count: step_execution.commit_count,
            read_count: step_execution.read_count,
            write_count: step_execution.write_count,
        });
        Ok(())
    }

    /// Marks the step execution stopped, keeping what was already committed.
    pub fn mark_stopped(&self, step_execution: &mut StepExecution) {
        debug!("Stop requested, stopping step: {}", step_execution.name);
        step_execution.status = BatchStatus::Stopped;
        step_execution.exit_status =
            ExitStatus::stopped().with_description("Stopped at a commit point on request");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet can continue to execute.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// Custom unit of work run by a [`TaskletStep`].
///
/// The tasklet is called until it returns [`RepeatStatus::Finished`]. It may
/// update the step execution, e.g. to set a custom exit status for conditional
/// transitions.
pub trait Tasklet: Send + Sync {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError>;
}

impl<F> Tasklet for F
where
    F: Fn(&mut StepExecution) -> Result<RepeatStatus, BatchError> + Send + Sync,
{
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        self(step_execution)
    }
}

pub struct TaskletStep<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    required_parameters: Vec<String>,
    allow_start_if_complete: bool,
}

impl Step for TaskletStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_parameters(&self) -> &[String] {
        &self.required_parameters
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        loop {
            if context.is_stop_requested() {
                context.mark_stopped(step_execution);
                return Ok(());
            }

            let repeat_status = self.tasklet.execute(step_execution)?;
            context.commit(step_execution)?;

            match repeat_status {
                RepeatStatus::Continuable => {
                    debug!("Tasklet of step {} continues", self.name);
                }
                RepeatStatus::Finished => return Ok(()),
            }
        }
    }
}

pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    required_parameters: Vec<String>,
    allow_start_if_complete: bool,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn new(name: &str, tasklet: &'a dyn Tasklet) -> Self {
        Self {
            name: name.to_string(),
            tasklet,
            required_parameters: Vec::new(),
            allow_start_if_complete: false,
        }
    }

    pub fn required_parameter(mut self, name: &str) -> Self {
        self.required_parameters.push(name.to_string());
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn build(self) -> TaskletStep<'a> {
        TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
            required_parameters: self.required_parameters,
            allow_start_if_complete: self.allow_start_if_complete,
        }
    }
}

/// Entry point for building steps.
///
/// ```
/// use batch_engine::core::step::{RepeatStatus, Step, StepBuilder};
/// use batch_engine::core::execution::StepExecution;
/// use batch_engine::BatchError;
///
/// let tasklet = |_: &mut StepExecution| -> Result<RepeatStatus, BatchError> {
///     Ok(RepeatStatus::Finished)
/// };
/// let step = StepBuilder::new("simpleStep1").tasklet(&tasklet).build();
/// assert_eq!(step.name(), "simpleStep1");
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn tasklet<'a>(self, tasklet: &'a dyn Tasklet) -> TaskletStepBuilder<'a> {
        TaskletStepBuilder::new(&self.name, tasklet)
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
