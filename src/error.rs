use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("Tasklet from: {0}")]
    Tasklet(String),

    /// A step failed; `cause` is the description of the underlying error.
    #[error("Step {step} failed: {cause}")]
    Step { step: String, cause: String },

    /// The job instance identified by these parameters already completed.
    #[error("A job instance already exists and is complete for job {job} with parameters {parameters}")]
    DuplicateExecution { job: String, parameters: String },

    #[error("A job execution for job {0} is already running with the same parameters")]
    JobAlreadyRunning(String),

    #[error("Job {job} cannot be restarted: {reason}")]
    Restartability { job: String, reason: String },

    #[error("Step {step} requires job parameter '{parameter}'")]
    MissingParameter { step: String, parameter: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("No job registered with name: {0}")]
    NoSuchJob(String),

    #[error("No job execution with id: {0}")]
    NoSuchExecution(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
