//! Observation of running jobs.
//!
//! The launcher reports every status change and step boundary as a
//! [`BatchEvent`] to the listeners it was built with. [`LoggingListener`] turns
//! events into log lines; [`ChannelListener`] forwards them to another thread.

use std::sync::mpsc::Sender;

use log::{info, warn};
use uuid::Uuid;

use super::{
    execution::{BatchStatus, ExitStatus},
    parameters::JobParameters,
};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    JobStatusChanged {
        job_name: String,
        job_execution_id: Uuid,
        status: BatchStatus,
    },
    StepStarted {
        job_name: String,
        step_name: String,
        step_execution_id: Uuid,
        parameters: JobParameters,
    },
    /// The step completed in an earlier execution of the same job instance.
    StepSkipped {
        job_name: String,
        step_name: String,
    },
    ChunkCommitted {
        step_name: String,
        step_execution_id: Uuid,
        commit_count: usize,
        read_count: usize,
        write_count: usize,
    },
    StepFinished {
        job_name: String,
        step_name: String,
        step_execution_id: Uuid,
        status: BatchStatus,
        exit_status: ExitStatus,
    },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &BatchEvent);
}

impl<F> EventListener for F
where
    F: Fn(&BatchEvent) + Send + Sync,
{
    fn on_event(&self, event: &BatchEvent) {
        self(event)
    }
}

/// Writes every event to the `log` facade.
#[derive(Default)]
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &BatchEvent) {
        match event {
            BatchEvent::JobStatusChanged {
                job_name,
                job_execution_id,
                status,
            } => info!("Job: {}, id: {}, status: {}", job_name, job_execution_id, status),
            BatchEvent::StepStarted {
                step_name,
                parameters,
                ..
            } => info!("Start of step: {}, parameters: {}", step_name, parameters),
            BatchEvent::StepSkipped { step_name, .. } => {
                info!("Step already completed, skipping: {}", step_name)
            }
            BatchEvent::ChunkCommitted {
                step_name,
                commit_count,
                read_count,
                write_count,
                ..
            } => info!(
                "Chunk {} committed for step: {} (read: {}, written: {})",
                commit_count, step_name, read_count, write_count
            ),
            BatchEvent::StepFinished {
                step_name,
                status: BatchStatus::Failed,
                exit_status,
                ..
            } => warn!("Step {} failed: {}", step_name, exit_status),
            BatchEvent::StepFinished {
                step_name, status, ..
            } => info!("End of step: {}, status: {}", step_name, status),
        }
    }
}

/// Forwards events to a channel, e.g. to a monitoring thread.
///
/// Events are dropped silently once the receiving side hangs up.
pub struct ChannelListener {
    sender: Sender<BatchEvent>,
}

impl ChannelListener {
    pub fn new(sender: Sender<BatchEvent>) -> Self {
        Self { sender }
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &BatchEvent) {
        let _ = self.sender.send(event.clone());
    }
}
