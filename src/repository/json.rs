//! # JSON file repository
//!
//! Keeps every execution record in a single JSON document so that a job failed
//! in one process can be restarted by the next one.
//!
//! The whole document is rewritten at every save, through a temporary file that
//! is renamed over the previous one, so a crash mid-write never leaves a truncated
//! file behind. This suits the record volumes of a handful of jobs; it is not meant
//! to track thousands of executions.
//!
//! ```rust
//! use batch_engine::repository::{ExecutionRepository, json::JsonFileExecutionRepository};
//! use std::env::temp_dir;
//!
//! # fn example() -> Result<(), batch_engine::BatchError> {
//! let repository = JsonFileExecutionRepository::new(temp_dir().join("executions.json"))?;
//! let last = repository.find_last_job_execution("simpleJob")?;
//! # Ok(())
//! # }
//! ```

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::debug;
use uuid::Uuid;

use crate::{
    BatchError,
    core::{
        execution::{JobExecution, StepExecution},
        parameters::JobParameters,
    },
};

use super::{ExecutionRepository, ExecutionStore};

pub struct JsonFileExecutionRepository {
    path: PathBuf,
    store: Mutex<ExecutionStore>,
}

impl JsonFileExecutionRepository {
    /// Opens the repository stored at `path`, starting empty when the file does not exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref().to_path_buf();

        let store = if path.exists() && fs::metadata(&path)?.len() > 0 {
            debug!("Loading execution records from {}", path.display());
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            ExecutionStore::default()
        };

        Ok(Self {
            path,
            store: Mutex::new(store),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store(&self) -> Result<MutexGuard<'_, ExecutionStore>, BatchError> {
        self.store
            .lock()
            .map_err(|error| BatchError::Repository(error.to_string()))
    }

    fn persist(&self, store: &ExecutionStore) -> Result<(), BatchError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let temporary = self.path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&temporary)?);
        serde_json::to_writer_pretty(&mut writer, store)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temporary, &self.path)?;
        Ok(())
    }
}

impl ExecutionRepository for JsonFileExecutionRepository {
    fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let mut store = self.store()?;
        store.save_job_execution(job_execution);
        self.persist(&store)
    }

    fn save_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        let mut store = self.store()?;
        store.save_step_execution(step_execution)?;
        self.persist(&store)
    }

    fn request_stop(&self, job_execution_id: Uuid) -> Result<bool, BatchError> {
        let mut store = self.store()?;
        if !store.request_stop(job_execution_id)? {
            return Ok(false);
        }
        self.persist(&store)?;
        Ok(true)
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
