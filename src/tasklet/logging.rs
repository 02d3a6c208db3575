//! # Logging Tasklet
//!
//! A tasklet that logs a message followed by the values of selected job
//! parameters, then finishes. It is the smallest useful unit of work and the
//! usual building block of a first job:
//!
//! ```rust
//! use batch_engine::core::job::JobBuilder;
//! use batch_engine::core::launcher::JobLauncherBuilder;
//! use batch_engine::core::parameters::JobParametersBuilder;
//! use batch_engine::core::step::StepBuilder;
//! use batch_engine::core::execution::BatchStatus;
//! use batch_engine::tasklet::logging::LoggingTaskletBuilder;
//! use chrono::NaiveDate;
//!
//! # fn main() -> Result<(), batch_engine::BatchError> {
//! let tasklet = LoggingTaskletBuilder::new()
//!     .message("This is Step1")
//!     .parameter("requestDate")
//!     .build()?;
//! let step = StepBuilder::new("simpleStep1").tasklet(&tasklet).build();
//! let job = JobBuilder::new("simpleJob").start(&step).build()?;
//!
//! let launcher = JobLauncherBuilder::new().build()?;
//! let parameters = JobParametersBuilder::new()
//!     .add_date("requestDate", NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
//!     .build();
//! let execution = launcher.run(&job, parameters)?;
//!
//! assert_eq!(execution.status, BatchStatus::Completed);
//! # Ok(())
//! # }
//! ```
//!
//! A parameter missing from the launch parameters is logged as absent and does
//! not fail the step; declare it with `required_parameter` on the step builder
//! when it must be present.

use log::info;

use crate::{
    BatchError,
    core::{
        execution::StepExecution,
        step::{RepeatStatus, Tasklet},
    },
};

pub struct LoggingTasklet {
    message: String,
    parameters: Vec<String>,
}

impl LoggingTasklet {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            parameters: Vec::new(),
        }
    }

    /// Lines logged for the given step execution, in order.
    fn lines(&self, step_execution: &StepExecution) -> Vec<String> {
        let mut lines = vec![format!(">>>>> {}", self.message)];
        lines.extend(self.parameters.iter().map(|name| {
            match step_execution.parameter(name) {
                Some(value) => format!(">>>>> {} = {}", name, value),
                None => format!(">>>>> {} is not set", name),
            }
        }));
        lines
    }
}

impl Tasklet for LoggingTasklet {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        for line in self.lines(step_execution) {
            info!("{}", line);
        }
        Ok(RepeatStatus::Finished)
    }
}

#[derive(Default)]
pub struct LoggingTaskletBuilder {
    message: Option<String>,
    parameters: Vec<String>,
}

impl LoggingTaskletBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Adds a job parameter whose value is logged after the message.
    pub fn parameter(mut self, name: &str) -> Self {
        self.parameters.push(name.to_string());
        self
    }

    pub fn build(self) -> Result<LoggingTasklet, BatchError> {
        let message = self
            .message
            .filter(|message| !message.is_empty())
            .ok_or_else(|| {
                BatchError::Configuration("LoggingTasklet requires a message".to_string())
            })?;

        Ok(LoggingTasklet {
            message,
            parameters: self.parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use crate::core::parameters::JobParametersBuilder;

    use super::*;

    fn step_execution() -> StepExecution {
        let parameters = JobParametersBuilder::new()
            .add_date(
                "requestDate",
                NaiveDate::from_ymd_opt(2024, 1, 31).expect("valid date"),
            )
            .build();
        StepExecution::for_job("simpleStep1", Uuid::new_v4(), parameters)
    }

    #[test]
    fn logs_message_and_parameter_values() {
        let tasklet = LoggingTaskletBuilder::new()
            .message("This is Step1")
            .parameter("requestDate")
            .parameter("missing")
            .build()
            .expect("valid tasklet");

        let lines = tasklet.lines(&step_execution());

        assert_eq!(
            lines,
            vec![
                ">>>>> This is Step1",
                ">>>>> requestDate = 2024-01-31",
                ">>>>> missing is not set",
            ]
        );
    }

    #[test]
    fn finishes_after_one_call() -> Result<(), BatchError> {
        let tasklet = LoggingTasklet::new("This is Step2");
        assert_eq!(tasklet.execute(&mut step_execution())?, RepeatStatus::Finished);
        Ok(())
    }

    #[test]
    fn builder_requires_message() {
        let result = LoggingTaskletBuilder::new().parameter("requestDate").build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
