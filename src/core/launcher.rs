//! Job launcher: the execution engine.
//!
//! [`JobLauncher::run`] turns a [`Job`] and a set of [`JobParameters`] into a
//! finished [`JobExecution`]:
//!
//! 1. The repository is asked for previous executions of the same job instance.
//!    A running or completed instance is refused; a failed or stopped one is
//!    restarted.
//! 2. The flow is walked from its first node, or from the node named by a
//!    `stop_and_restart` transition of an earlier run. On restart, steps that completed in
//!    an earlier execution are not run again: their recorded exit status drives
//!    the flow instead, so the job resumes at the first step that did not complete.
//! 3. Each step runs inside its own [`StepExecution`], persisted at every commit.
//!    A failed step ends the job as failed unless a transition handles it.
//! 4. A stop request is honoured between steps, chunks and tasklet iterations;
//!    the job then ends as stopped with everything committed so far kept.
//!
//! Step failures do not surface as `Err`: the returned execution is `FAILED` and
//! its exit status carries the failing step's description. `Err` is reserved for
//! launches that are refused and for repository failures.

use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use chrono::Utc;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    BatchError,
    repository::{ExecutionRepository, memory::InMemoryExecutionRepository},
};

use super::{
    event::{BatchEvent, EventListener},
    execution::{BatchStatus, ExitStatus, JobExecution, JobExecutionSummary, StepExecution},
    job::{FlowDecision, FlowElement, FlowNode, Job},
    parameters::JobParameters,
    step::{Step, StepContext},
};

struct RunningExecution {
    job_name: String,
    stop_signal: Arc<AtomicBool>,
}

pub struct JobLauncher<'a> {
    repository: Arc<dyn ExecutionRepository>,
    listeners: Vec<Arc<dyn EventListener>>,
    jobs: HashMap<String, &'a Job<'a>>,
    running: Mutex<HashMap<Uuid, RunningExecution>>,
    /// Serializes the check-then-create of job executions
    launch_lock: Mutex<()>,
}

impl<'a> JobLauncher<'a> {
    pub fn repository(&self) -> &dyn ExecutionRepository {
        self.repository.as_ref()
    }

    /// Launches a registered job by name.
    ///
    /// When the job has an incrementer, the parameters of the next instance are
    /// derived from the last execution of the job and overridden by `parameters`.
    pub fn launch(
        &self,
        job_name: &str,
        parameters: JobParameters,
    ) -> Result<JobExecutionSummary, BatchError> {
        let job = self.registered_job(job_name)?;

        let parameters = match job.incrementer() {
            Some(incrementer) => {
                let last = self.repository.find_last_job_execution(job_name)?;
                incrementer
                    .next(last.as_ref().map(|execution| &execution.parameters))
                    .merge(&parameters)
            }
            None => parameters,
        };

        Ok(self.run(job, parameters)?.summary())
    }

    /// Restarts a failed or stopped execution with its original parameters.
    pub fn restart(&self, job_execution_id: Uuid) -> Result<JobExecution, BatchError> {
        let execution = self
            .repository
            .find_job_execution(job_execution_id)?
            .ok_or_else(|| BatchError::NoSuchExecution(job_execution_id.to_string()))?;

        let job = self.registered_job(&execution.job_name)?;
        self.run(job, execution.parameters)
    }

    /// Requests a running execution to stop.
    ///
    /// Returns `false` when the execution exists but is not running in this launcher.
    pub fn stop(&self, job_execution_id: Uuid) -> Result<bool, BatchError> {
        let running = self
            .running()?
            .get(&job_execution_id)
            .map(|running| (running.job_name.clone(), running.stop_signal.clone()));

        let Some((job_name, stop_signal)) = running else {
            return match self.repository.find_job_execution(job_execution_id)? {
                Some(_) => Ok(false),
                None => Err(BatchError::NoSuchExecution(job_execution_id.to_string())),
            };
        };

        info!("Stop requested for job: {}, id: {}", job_name, job_execution_id);
        stop_signal.store(true, Ordering::SeqCst);

        if self.repository.request_stop(job_execution_id)? {
            self.publish(BatchEvent::JobStatusChanged {
                job_name,
                job_execution_id,
                status: BatchStatus::Stopping,
            });
        } else {
            debug!("Job execution {} finished before it could be stopped", job_execution_id);
        }

        Ok(true)
    }

    /// Ids of the executions of `job_name` currently running in this launcher.
    pub fn running_executions(&self, job_name: &str) -> Result<Vec<Uuid>, BatchError> {
        Ok(self
            .running()?
            .iter()
            .filter(|(_, running)| running.job_name == job_name)
            .map(|(id, _)| *id)
            .collect())
    }

    /// Runs `job` to a terminal status.
    pub fn run(&self, job: &Job<'_>, parameters: JobParameters) -> Result<JobExecution, BatchError> {
        let (job_execution, previous) = self.create_execution(job, parameters)?;

        let stop_signal = Arc::new(AtomicBool::new(false));
        self.running()?.insert(
            job_execution.id,
            RunningExecution {
                job_name: job.name().to_string(),
                stop_signal: stop_signal.clone(),
            },
        );

        let result = self.execute(job, job_execution, &previous, &stop_signal);

        self.running()?.remove(&result.id);
        result.finish()
    }

    /// Checks the restart policy and records the new execution as `STARTING`.
    fn create_execution(
        &self,
        job: &Job<'_>,
        parameters: JobParameters,
    ) -> Result<(JobExecution, Vec<JobExecution>), BatchError> {
        let _guard = self
            .launch_lock
            .lock()
            .map_err(|error| BatchError::Repository(error.to_string()))?;

        let previous = self.repository.find_job_executions(job.name(), &parameters)?;

        let instance_id = match previous.last() {
            None => Uuid::new_v4(),
            Some(last) if last.is_running() => {
                return Err(BatchError::JobAlreadyRunning(job.name().to_string()));
            }
            Some(last) if last.status == BatchStatus::Completed => {
                return Err(BatchError::DuplicateExecution {
                    job: job.name().to_string(),
                    parameters: parameters.identifying_key(),
                });
            }
            Some(last) if !last.status.is_restartable() => {
                return Err(BatchError::Restartability {
                    job: job.name().to_string(),
                    reason: format!("the last execution ended with status {}", last.status),
                });
            }
            Some(last) => {
                Self::check_restartable(job, &previous)?;
                info!(
                    "Restarting job: {} after execution {} ended {}",
                    job.name(),
                    last.id,
                    last.status
                );
                last.instance_id
            }
        };

        let job_execution = JobExecution::new(job.name(), instance_id, parameters);
        self.repository.save_job_execution(&job_execution)?;
        self.publish(BatchEvent::JobStatusChanged {
            job_name: job.name().to_string(),
            job_execution_id: job_execution.id,
            status: BatchStatus::Starting,
        });

        Ok((job_execution, previous))
    }

    fn check_restartable(job: &Job<'_>, previous: &[JobExecution]) -> Result<(), BatchError> {
        if !job.is_restartable() {
            return Err(BatchError::Restartability {
                job: job.name().to_string(),
                reason: "the job is not restartable".to_string(),
            });
        }

        let step_names = job.step_names();
        let removed = previous
            .iter()
            .flat_map(|execution| &execution.step_executions)
            .find(|step_execution| !step_names.contains(&step_execution.name.as_str()));

        if let Some(step_execution) = removed {
            return Err(BatchError::Restartability {
                job: job.name().to_string(),
                reason: format!(
                    "step {} of a previous execution is no longer part of the job",
                    step_execution.name
                ),
            });
        }

        let restart_node = previous
            .last()
            .and_then(|last| last.restart_node.as_deref())
            .filter(|name| job.node(name).is_none());
        match restart_node {
            Some(name) => Err(BatchError::Restartability {
                job: job.name().to_string(),
                reason: format!("restart node {} is no longer part of the job", name),
            }),
            None => Ok(()),
        }
    }

    fn execute(
        &self,
        job: &Job<'_>,
        mut job_execution: JobExecution,
        previous: &[JobExecution],
        stop_signal: &AtomicBool,
    ) -> ExecutionResult {
        info!("Start of job: {}, id: {}", job.name(), job_execution.id);

        job_execution.start_time = Some(Utc::now());
        if let Err(error) = self.update_status(&mut job_execution, BatchStatus::Started) {
            return ExecutionResult::failed_to_start(job_execution, error);
        }

        // Latest record of every step across the previous executions of the instance.
        let mut prior_steps: HashMap<&str, &StepExecution> = HashMap::new();
        for step_execution in previous.iter().flat_map(|execution| &execution.step_executions) {
            prior_steps.insert(step_execution.name.as_str(), step_execution);
        }

        // A run ended by a stop-and-restart transition resumes at the node it named.
        let start = previous
            .last()
            .and_then(|last| last.restart_node.as_deref())
            .and_then(|name| job.node(name))
            .unwrap_or_else(|| job.first_node());
        if start.name() != job.first_node().name() {
            info!("Job {} resumes at {}", job.name(), start.name());
            job_execution.restart_node = Some(start.name().to_string());
        }

        let status = match self.run_flow(job, start, &mut job_execution, &prior_steps, stop_signal) {
            Ok(status) => status,
            Err(error) => {
                error!("Job {} aborted: {}", job.name(), error);
                job_execution.failure_exceptions.push(error.to_string());
                BatchStatus::Failed
            }
        };

        job_execution.end_time = Some(Utc::now());
        job_execution.exit_status = match status {
            BatchStatus::Completed => ExitStatus::completed(),
            BatchStatus::Stopped => ExitStatus::stopped(),
            _ => ExitStatus::failed().with_description(&job_execution.failure_exceptions.join("; ")),
        };

        let saved = self.update_status(&mut job_execution, status);

        info!(
            "End of job: {}, id: {}, status: {}",
            job.name(),
            job_execution.id,
            job_execution.status
        );

        ExecutionResult {
            id: job_execution.id,
            job_execution,
            error: saved.err(),
        }
    }

    fn run_flow<'j, 'f>(
        &self,
        job: &'j Job<'f>,
        start: &'j FlowNode<'f>,
        job_execution: &mut JobExecution,
        prior_steps: &HashMap<&str, &StepExecution>,
        stop_signal: &AtomicBool,
    ) -> Result<BatchStatus, BatchError> {
        let mut node = start;

        loop {
            if stop_signal.load(Ordering::SeqCst) {
                info!("Job {} stopped before {}", job.name(), node.name());
                return Ok(BatchStatus::Stopped);
            }

            let (status, exit_status) = match &node.element {
                FlowElement::Step(step) => {
                    self.handle_step(job, *step, job_execution, prior_steps, stop_signal)?
                }
                FlowElement::Split { name, steps } => {
                    debug!("Running split {} with {} steps", name, steps.len());
                    self.handle_split(job, steps, job_execution, prior_steps, stop_signal)?
                }
            };

            match job.decide(node, status, &exit_status.exit_code) {
                FlowDecision::Continue(next) => node = next,
                FlowDecision::Finish(status) => return Ok(status),
                FlowDecision::StopAndRestart(restart) => {
                    info!("Job {} stopped, restart resumes at {}", job.name(), restart.name());
                    job_execution.restart_node = Some(restart.name().to_string());
                    return Ok(BatchStatus::Stopped);
                }
            }
        }
    }

    /// Runs one step unless it already completed for this job instance.
    fn handle_step(
        &self,
        job: &Job<'_>,
        step: &dyn Step,
        job_execution: &mut JobExecution,
        prior_steps: &HashMap<&str, &StepExecution>,
        stop_signal: &AtomicBool,
    ) -> Result<(BatchStatus, ExitStatus), BatchError> {
        let prior = prior_steps.get(step.name()).copied();

        if let Some(outcome) = self.skip_completed(job, step, prior) {
            return Ok(outcome);
        }

        let mut step_execution = Self::create_step_execution(job_execution, step, prior);
        self.execute_step(job.name(), step, &mut step_execution, stop_signal)?;

        Self::record_step(job_execution, step_execution)
    }

    /// Runs the steps of a split on scoped threads and joins them.
    fn handle_split(
        &self,
        job: &Job<'_>,
        steps: &[&dyn Step],
        job_execution: &mut JobExecution,
        prior_steps: &HashMap<&str, &StepExecution>,
        stop_signal: &AtomicBool,
    ) -> Result<(BatchStatus, ExitStatus), BatchError> {
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut to_run = Vec::with_capacity(steps.len());

        for step in steps {
            let prior = prior_steps.get(step.name()).copied();
            match self.skip_completed(job, *step, prior) {
                Some(outcome) => outcomes.push(outcome),
                None => to_run.push((*step, Self::create_step_execution(job_execution, *step, prior))),
            }
        }

        let finished: Vec<Result<StepExecution, BatchError>> = thread::scope(|scope| {
            let handles: Vec<_> = to_run
                .into_iter()
                .map(|(step, mut step_execution)| {
                    let name = step.name().to_string();
                    let handle = scope.spawn(move || {
                        self.execute_step(job.name(), step, &mut step_execution, stop_signal)
                            .map(|()| step_execution)
                    });
                    (name, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(BatchError::Step {
                            step: name,
                            cause: "worker thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        for result in finished {
            outcomes.push(Self::record_step(job_execution, result?)?);
        }

        let status = if outcomes.iter().any(|(status, _)| *status == BatchStatus::Failed) {
            BatchStatus::Failed
        } else if outcomes.iter().any(|(status, _)| *status == BatchStatus::Stopped) {
            BatchStatus::Stopped
        } else {
            BatchStatus::Completed
        };

        let exit_status = outcomes
            .into_iter()
            .map(|(_, exit_status)| exit_status)
            .reduce(ExitStatus::and)
            .unwrap_or_else(ExitStatus::completed);

        Ok((status, exit_status))
    }

    fn skip_completed(
        &self,
        job: &Job<'_>,
        step: &dyn Step,
        prior: Option<&StepExecution>,
    ) -> Option<(BatchStatus, ExitStatus)> {
        let prior = prior.filter(|prior| prior.status == BatchStatus::Completed)?;

        if step.allow_start_if_complete() {
            return None;
        }

        info!("Step already completed, skipping: {}", step.name());
        self.publish(BatchEvent::StepSkipped {
            job_name: job.name().to_string(),
            step_name: step.name().to_string(),
        });
        Some((BatchStatus::Completed, prior.exit_status.clone()))
    }

    /// Creates the step scope: parameters are resolved here, once, and the
    /// execution context of an unfinished previous run is handed over.
    fn create_step_execution(
        job_execution: &JobExecution,
        step: &dyn Step,
        prior: Option<&StepExecution>,
    ) -> StepExecution {
        let mut step_execution = StepExecution::for_job(
            step.name(),
            job_execution.id,
            job_execution.parameters.clone(),
        );

        if let Some(prior) = prior.filter(|prior| prior.status != BatchStatus::Completed) {
            debug!("Resuming step {} from its last commit", step.name());
            step_execution.execution_context = prior.execution_context.clone();
        }

        step_execution
    }

    /// Runs a step and finalizes its execution record.
    ///
    /// Only repository failures are returned as `Err`; a failing step is recorded
    /// as `FAILED` on the step execution.
    fn execute_step(
        &self,
        job_name: &str,
        step: &dyn Step,
        step_execution: &mut StepExecution,
        stop_signal: &AtomicBool,
    ) -> Result<(), BatchError> {
        step_execution.start_time = Some(Utc::now());
        step_execution.status = BatchStatus::Started;
        step_execution.last_updated = step_execution.start_time;
        self.repository.save_step_execution(step_execution)?;

        self.publish(BatchEvent::StepStarted {
            job_name: job_name.to_string(),
            step_name: step.name().to_string(),
            step_execution_id: step_execution.id,
            parameters: step_execution.parameters.clone(),
        });

        let missing = step
            .required_parameters()
            .iter()
            .find(|parameter| !step_execution.parameters.contains(parameter));

        let outcome = match missing {
            Some(parameter) => Err(BatchError::MissingParameter {
                step: step.name().to_string(),
                parameter: parameter.clone(),
            }),
            None => {
                let context =
                    StepContext::new(job_name, self.repository.as_ref(), &self.listeners, stop_signal);
                panic::catch_unwind(AssertUnwindSafe(|| step.execute(step_execution, &context)))
                    .unwrap_or_else(|payload| Err(BatchError::Step {
                        step: step.name().to_string(),
                        cause: format!("panicked: {}", panic_message(payload.as_ref())),
                    }))
            }
        };

        match outcome {
            Ok(()) if step_execution.status == BatchStatus::Stopped => {}
            Ok(()) => {
                step_execution.status = BatchStatus::Completed;
                if step_execution.exit_status.is_running() {
                    step_execution.exit_status = ExitStatus::completed();
                }
            }
            Err(error) => {
                let error = match error {
                    BatchError::Step { .. } => error,
                    error => BatchError::Step {
                        step: step.name().to_string(),
                        cause: error.to_string(),
                    },
                };
                warn!("{}", error);
                step_execution.status = BatchStatus::Failed;
                step_execution.exit_status = ExitStatus::failed().with_description(&error.to_string());
            }
        }

        step_execution.end_time = Some(Utc::now());
        step_execution.last_updated = step_execution.end_time;
        self.repository.save_step_execution(step_execution)?;

        self.publish(BatchEvent::StepFinished {
            job_name: job_name.to_string(),
            step_name: step.name().to_string(),
            step_execution_id: step_execution.id,
            status: step_execution.status,
            exit_status: step_execution.exit_status.clone(),
        });

        Ok(())
    }

    fn record_step(
        job_execution: &mut JobExecution,
        step_execution: StepExecution,
    ) -> Result<(BatchStatus, ExitStatus), BatchError> {
        let outcome = (step_execution.status, step_execution.exit_status.clone());

        if step_execution.status == BatchStatus::Failed {
            job_execution
                .failure_exceptions
                .push(step_execution.exit_status.exit_description.clone());
        }
        job_execution.step_executions.push(step_execution);

        Ok(outcome)
    }

    fn update_status(
        &self,
        job_execution: &mut JobExecution,
        status: BatchStatus,
    ) -> Result<(), BatchError> {
        job_execution.status = status;
        job_execution.last_updated = Some(Utc::now());
        self.repository.save_job_execution(job_execution)?;

        self.publish(BatchEvent::JobStatusChanged {
            job_name: job_execution.job_name.clone(),
            job_execution_id: job_execution.id,
            status,
        });
        Ok(())
    }

    fn publish(&self, event: BatchEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }

    fn registered_job(&self, job_name: &str) -> Result<&'a Job<'a>, BatchError> {
        self.jobs
            .get(job_name)
            .copied()
            .ok_or_else(|| BatchError::NoSuchJob(job_name.to_string()))
    }

    fn running(&self) -> Result<MutexGuard<'_, HashMap<Uuid, RunningExecution>>, BatchError> {
        self.running
            .lock()
            .map_err(|error| BatchError::Repository(error.to_string()))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

/// A finished run, with the repository error raised while recording its end, if any.
struct ExecutionResult {
    id: Uuid,
    job_execution: JobExecution,
    error: Option<BatchError>,
}

impl ExecutionResult {
    fn failed_to_start(mut job_execution: JobExecution, error: BatchError) -> Self {
        job_execution.status = BatchStatus::Failed;
        job_execution.exit_status = ExitStatus::failed().with_description(&error.to_string());
        Self {
            id: job_execution.id,
            job_execution,
            error: Some(error),
        }
    }

    fn finish(self) -> Result<JobExecution, BatchError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.job_execution),
        }
    }
}

/// Builder for [`JobLauncher`].
///
/// Without an explicit repository, executions are kept in memory.
#[derive(Default)]
pub struct JobLauncherBuilder<'a> {
    repository: Option<Arc<dyn ExecutionRepository>>,
    listeners: Vec<Arc<dyn EventListener>>,
    jobs: Vec<&'a Job<'a>>,
}

impl<'a> JobLauncherBuilder<'a> {
    pub fn new() -> Self {
        Self {
            repository: None,
            listeners: Vec::new(),
            jobs: Vec::new(),
        }
    }

    pub fn repository(mut self, repository: Arc<dyn ExecutionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn listener(mut self, listener: impl EventListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Registers a job so it can be launched and restarted by name.
    pub fn register(mut self, job: &'a Job<'a>) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn build(self) -> Result<JobLauncher<'a>, BatchError> {
        let mut jobs = HashMap::new();
        for job in self.jobs {
            if jobs.insert(job.name().to_string(), job).is_some() {
                return Err(BatchError::Configuration(format!(
                    "Job {} is registered twice",
                    job.name()
                )));
            }
        }

        Ok(JobLauncher {
            repository: self
                .repository
                .unwrap_or_else(|| Arc::new(InMemoryExecutionRepository::new())),
            listeners: self.listeners,
            jobs,
            running: Mutex::new(HashMap::new()),
            launch_lock: Mutex::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::core::{
        job::JobBuilder,
        parameters::JobParametersBuilder,
        step::{RepeatStatus, StepBuilder},
    };

    use super::*;

    fn finished(_: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        Ok(RepeatStatus::Finished)
    }

    fn failing(_: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        Err(BatchError::Tasklet("boom".to_string()))
    }

    fn parameters() -> JobParameters {
        JobParametersBuilder::new().add_long("run", 1i64).build()
    }

    #[test]
    fn runs_steps_in_order() -> Result<(), BatchError> {
        let step1 = StepBuilder::new("step1").tasklet(&finished).build();
        let step2 = StepBuilder::new("step2").tasklet(&finished).build();
        let job = JobBuilder::new("job").start(&step1).next(&step2).build()?;

        let launcher = JobLauncherBuilder::new().build()?;
        let execution = launcher.run(&job, parameters())?;

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status.exit_code, "COMPLETED");
        let names: Vec<&str> = execution
            .step_executions
            .iter()
            .map(|step_execution| step_execution.name.as_str())
            .collect();
        assert_eq!(names, vec!["step1", "step2"]);
        assert!(execution.start_time.is_some() && execution.end_time.is_some());
        assert!(launcher.running_executions("job")?.is_empty());
        Ok(())
    }

    #[test]
    fn failing_step_halts_job() -> Result<(), BatchError> {
        let step1 = StepBuilder::new("step1").tasklet(&failing).build();
        let step2 = StepBuilder::new("step2").tasklet(&finished).build();
        let job = JobBuilder::new("job").start(&step1).next(&step2).build()?;

        let launcher = JobLauncherBuilder::new().build()?;
        let execution = launcher.run(&job, parameters())?;

        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.step_executions.len(), 1);
        assert!(execution.exit_status.exit_description.contains("step1"));
        assert!(execution.exit_status.exit_description.contains("boom"));
        Ok(())
    }

    #[test]
    fn panicking_step_fails_job_and_releases_instance() -> Result<(), BatchError> {
        let broken = AtomicBool::new(true);
        let panicking = |_: &mut StepExecution| -> Result<RepeatStatus, BatchError> {
            if broken.load(Ordering::SeqCst) {
                panic!("bug in step");
            }
            Ok(RepeatStatus::Finished)
        };
        let step = StepBuilder::new("step").tasklet(&panicking).build();
        let job = JobBuilder::new("job").start(&step).build()?;
        let launcher = JobLauncherBuilder::new().build()?;

        let execution = launcher.run(&job, parameters())?;

        assert_eq!(execution.status, BatchStatus::Failed);
        assert!(execution.exit_status.exit_description.contains("bug in step"));
        let stored = launcher.repository().find_job_execution(execution.id)?.unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.step_executions[0].status, BatchStatus::Failed);
        assert!(launcher.running_executions("job")?.is_empty());

        broken.store(false, Ordering::SeqCst);
        let restarted = launcher.run(&job, parameters())?;
        assert_eq!(restarted.status, BatchStatus::Completed);
        assert_eq!(restarted.instance_id, execution.instance_id);
        Ok(())
    }

    #[test]
    fn failed_transition_runs_recovery_step() -> Result<(), BatchError> {
        let step1 = StepBuilder::new("step1").tasklet(&failing).build();
        let recover = StepBuilder::new("recover").tasklet(&finished).build();
        let job = JobBuilder::new("job")
            .start(&step1)
            .on("FAILED")
            .to("recover")
            .step(&recover)
            .build()?;

        let launcher = JobLauncherBuilder::new().build()?;
        let execution = launcher.run(&job, parameters())?;

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.step_executions.len(), 2);
        assert_eq!(execution.step_executions[0].status, BatchStatus::Failed);
        Ok(())
    }

    #[test]
    fn missing_required_parameter_fails_step() -> Result<(), BatchError> {
        let step = StepBuilder::new("step")
            .tasklet(&finished)
            .required_parameter("requestDate")
            .build();
        let job = JobBuilder::new("job").start(&step).build()?;

        let launcher = JobLauncherBuilder::new().build()?;
        let execution = launcher.run(&job, parameters())?;

        assert_eq!(execution.status, BatchStatus::Failed);
        assert!(
            execution.step_executions[0]
                .exit_status
                .exit_description
                .contains("requestDate")
        );
        Ok(())
    }

    #[test]
    fn events_follow_status_lifecycle() -> Result<(), BatchError> {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let recorded = statuses.clone();

        let step = StepBuilder::new("step").tasklet(&finished).build();
        let job = JobBuilder::new("job").start(&step).build()?;

        let launcher = JobLauncherBuilder::new()
            .listener(move |event: &BatchEvent| {
                if let BatchEvent::JobStatusChanged { status, .. } = event {
                    recorded.lock().unwrap().push(*status);
                }
            })
            .build()?;
        launcher.run(&job, parameters())?;

        assert_eq!(
            *statuses.lock().unwrap(),
            vec![
                BatchStatus::Starting,
                BatchStatus::Started,
                BatchStatus::Completed
            ]
        );
        Ok(())
    }

    #[test]
    fn split_runs_every_step() -> Result<(), BatchError> {
        let calls = AtomicUsize::new(0);
        let counting = |_: &mut StepExecution| -> Result<RepeatStatus, BatchError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(RepeatStatus::Finished)
        };
        let first = StepBuilder::new("first").tasklet(&counting).build();
        let left = StepBuilder::new("left").tasklet(&counting).build();
        let right = StepBuilder::new("right").tasklet(&counting).build();
        let last = StepBuilder::new("last").tasklet(&counting).build();

        let job = JobBuilder::new("job")
            .start(&first)
            .split("parallel", &[&left, &right])
            .next(&last)
            .build()?;

        let launcher = JobLauncherBuilder::new().build()?;
        let execution = launcher.run(&job, parameters())?;

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(execution.step_executions.len(), 4);
        assert_eq!(execution.step_executions[3].name, "last");
        Ok(())
    }

    #[test]
    fn failing_split_member_fails_job() -> Result<(), BatchError> {
        let left = StepBuilder::new("left").tasklet(&finished).build();
        let right = StepBuilder::new("right").tasklet(&failing).build();
        let last = StepBuilder::new("last").tasklet(&finished).build();

        let job = JobBuilder::new("job")
            .split("parallel", &[&left, &right])
            .next(&last)
            .build()?;

        let launcher = JobLauncherBuilder::new().build()?;
        let execution = launcher.run(&job, parameters())?;

        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.step_executions.len(), 2);
        assert!(execution.step_execution("last").is_none());
        Ok(())
    }

    #[test]
    fn stop_of_unknown_execution_is_an_error() -> Result<(), BatchError> {
        let launcher = JobLauncherBuilder::new().build()?;
        let result = launcher.stop(Uuid::new_v4());
        assert!(matches!(result, Err(BatchError::NoSuchExecution(_))));
        Ok(())
    }

    #[test]
    fn stop_of_finished_execution_returns_false() -> Result<(), BatchError> {
        let step = StepBuilder::new("step").tasklet(&finished).build();
        let job = JobBuilder::new("job").start(&step).build()?;

        let launcher = JobLauncherBuilder::new().build()?;
        let execution = launcher.run(&job, parameters())?;

        assert!(!launcher.stop(execution.id)?);
        Ok(())
    }

    #[test]
    fn launch_requires_registered_job() -> Result<(), BatchError> {
        let launcher = JobLauncherBuilder::new().build()?;
        let result = launcher.launch("unknown", JobParameters::new());
        assert!(matches!(result, Err(BatchError::NoSuchJob(_))));
        Ok(())
    }

    #[test]
    fn registering_a_job_twice_is_rejected() -> Result<(), BatchError> {
        let step = StepBuilder::new("step").tasklet(&finished).build();
        let job = JobBuilder::new("job").start(&step).build()?;

        let result = JobLauncherBuilder::new().register(&job).register(&job).build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));
        Ok(())
    }
}
