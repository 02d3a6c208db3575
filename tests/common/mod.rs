#![allow(dead_code)]

pub mod mocks;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use batch_engine::{
    BatchError,
    core::{
        event::BatchEvent,
        execution::{JobExecution, StepExecution},
        step::RepeatStatus,
    },
};

pub use mocks::MockWriter;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn finished(_: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
    Ok(RepeatStatus::Finished)
}

pub fn step_names(execution: &JobExecution) -> Vec<String> {
    execution
        .step_executions
        .iter()
        .map(|step_execution| step_execution.name.clone())
        .collect()
}

/// Tasklet failing while its switch is on.
pub struct SwitchableTasklet {
    failing: AtomicBool,
    calls: Mutex<usize>,
}

impl SwitchableTasklet {
    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            calls: Mutex::new(0),
        }
    }

    pub fn repair(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl batch_engine::core::step::Tasklet for SwitchableTasklet {
    fn execute(&self, _: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        *self.calls.lock().unwrap() += 1;
        if self.failing.load(Ordering::SeqCst) {
            Err(BatchError::Tasklet("switched off".to_string()))
        } else {
            Ok(RepeatStatus::Finished)
        }
    }
}

/// Listener keeping every event it receives.
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<BatchEvent>>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<BatchEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl batch_engine::core::event::EventListener for RecordingListener {
    fn on_event(&self, event: &BatchEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
