//! Chunk-oriented processing.
//!
//! Items are read one by one until a chunk of `chunk_size` items is buffered,
//! each item is handed to the processor, and the processed chunk is written in a
//! single call. Only then are the step's counters and execution context updated
//! and committed, so a failure anywhere in a chunk leaves no trace of it in the
//! step execution.

use log::{debug, warn};

use crate::BatchError;

use super::{
    execution::StepExecution,
    item::{ItemProcessor, ItemReader, ItemWriter},
    step::{Step, StepContext},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChunkStatus {
    /// The chunk reached `chunk_size` items; more input may follow.
    Full,
    /// The reader is exhausted.
    Finished,
}

/// Items read for one chunk.
struct Chunk<I> {
    items: Vec<I>,
    status: ChunkStatus,
}

/// Counters accumulated while a chunk is in flight.
///
/// They reach the [`StepExecution`] only when the chunk commits.
#[derive(Debug, Clone, Default)]
struct ChunkContribution {
    read_count: usize,
    write_count: usize,
    filter_count: usize,
    read_skip_count: usize,
    process_skip_count: usize,
}

impl ChunkContribution {
    fn is_empty(&self) -> bool {
        self.read_count == 0 && self.read_skip_count == 0
    }

    fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count
    }

    fn apply(&self, step_execution: &mut StepExecution) {
        step_execution.read_count += self.read_count;
        step_execution.write_count += self.write_count;
        step_execution.filter_count += self.filter_count;
        step_execution.read_skip_count += self.read_skip_count;
        step_execution.process_skip_count += self.process_skip_count;
    }
}

pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    /// Number of items to process in each chunk
    chunk_size: usize,
    /// Maximum number of read or process errors tolerated before failing the step
    skip_limit: usize,
    /// Number of extra attempts at processing and writing a failed chunk
    retry_limit: usize,
    required_parameters: Vec<String>,
    allow_start_if_complete: bool,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
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
        self.reader.open(&step_execution.execution_context)?;

        if let Err(error) = self.writer.open() {
            Self::manage_error(self.reader.close());
            return Err(error);
        }

        let result = self.run_chunks(step_execution, context);

        Self::manage_error(self.writer.close());
        Self::manage_error(self.reader.close());

        result
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn run_chunks(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        loop {
            if context.is_stop_requested() {
                context.mark_stopped(step_execution);
                return Ok(());
            }

            let mut contribution = ChunkContribution::default();

            let chunk = match self.read_chunk(step_execution, &mut contribution) {
                Ok(chunk) => chunk,
                Err(error) => {
                    step_execution.rollback_count += 1;
                    return Err(error);
                }
            };

            if chunk.status == ChunkStatus::Finished && contribution.is_empty() {
                debug!("Nothing left to read for step: {}", self.name);
                return Ok(());
            }

            if let Err(error) = self.process_and_write(step_execution, &chunk, &mut contribution) {
                step_execution.rollback_count += 1;
                return Err(error);
            }

            contribution.apply(step_execution);
            self.reader.update(&mut step_execution.execution_context)?;
            context.commit(step_execution)?;

            if chunk.status == ChunkStatus::Finished {
                return Ok(());
            }
        }
    }

    /// Reads up to `chunk_size` items.
    ///
    /// Read errors are skipped until the skip limit is exceeded.
    fn read_chunk(
        &self,
        step_execution: &StepExecution,
        contribution: &mut ChunkContribution,
    ) -> Result<Chunk<I>, BatchError> {
        debug!("Start reading chunk");

        let mut items = Vec::with_capacity(self.chunk_size);

        loop {
            match self.reader.read() {
                Ok(Some(item)) => {
                    items.push(item);
                    contribution.read_count += 1;

                    if items.len() >= self.chunk_size {
                        return Ok(Chunk {
                            items,
                            status: ChunkStatus::Full,
                        });
                    }
                }
                Ok(None) => {
                    return Ok(Chunk {
                        items,
                        status: ChunkStatus::Finished,
                    });
                }
                Err(error) => {
                    warn!("Error reading item: {}", error);
                    contribution.read_skip_count += 1;

                    if self.is_skip_limit_reached(step_execution, contribution) {
                        return Err(error);
                    }
                }
            }
        }
    }

    /// Processes and writes a chunk, retrying the whole chunk up to `retry_limit` times.
    fn process_and_write(
        &self,
        step_execution: &StepExecution,
        chunk: &Chunk<I>,
        contribution: &mut ChunkContribution,
    ) -> Result<(), BatchError> {
        let mut attempt = 0;

        loop {
            let mut attempt_contribution = contribution.clone();

            let result = self
                .process_chunk(step_execution, &chunk.items, &mut attempt_contribution)
                .and_then(|processed| self.write_chunk(&processed, &mut attempt_contribution));

            match result {
                Ok(()) => {
                    *contribution = attempt_contribution;
                    return Ok(());
                }
                Err(error) if attempt < self.retry_limit => {
                    attempt += 1;
                    warn!(
                        "Chunk of step {} failed ({}), retry {}/{}",
                        self.name, error, attempt, self.retry_limit
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn process_chunk(
        &self,
        step_execution: &StepExecution,
        read_items: &[I],
        contribution: &mut ChunkContribution,
    ) -> Result<Vec<O>, BatchError> {
        debug!("Processing chunk of {} items", read_items.len());
        let mut result = Vec::with_capacity(read_items.len());

        for item in read_items {
            match self.processor.process(item) {
                Ok(Some(processed_item)) => result.push(processed_item),
                Ok(None) => contribution.filter_count += 1,
                Err(error) => {
                    warn!("Error processing item: {}", error);
                    contribution.process_skip_count += 1;

                    if self.is_skip_limit_reached(step_execution, contribution) {
                        return Err(error);
                    }
                }
            }
        }

        Ok(result)
    }

    fn write_chunk(
        &self,
        processed_items: &[O],
        contribution: &mut ChunkContribution,
    ) -> Result<(), BatchError> {
        debug!("Writing chunk of {} items", processed_items.len());

        if processed_items.is_empty() {
            debug!("No items to write, skipping write call");
            return Ok(());
        }

        self.writer.write(processed_items)?;
        self.writer.flush()?;
        contribution.write_count += processed_items.len();
        Ok(())
    }

    fn is_skip_limit_reached(
        &self,
        step_execution: &StepExecution,
        contribution: &ChunkContribution,
    ) -> bool {
        step_execution.skip_count() + contribution.skip_count() > self.skip_limit
    }

    /// Logs errors from operations that must not fail the step.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    chunk_size: usize,
    skip_limit: usize,
    retry_limit: usize,
    required_parameters: Vec<String>,
    allow_start_if_complete: bool,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            skip_limit: 0,
            retry_limit: 0,
            required_parameters: Vec::new(),
            allow_start_if_complete: false,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn required_parameter(mut self, name: &str) -> Self {
        self.required_parameters.push(name.to_string());
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        let missing = |component: &str| {
            BatchError::Configuration(format!(
                "{} is required for building step {}",
                component, self.name
            ))
        };

        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "Chunk size of step {} must be greater than zero",
                self.name
            )));
        }

        let reader = self.reader.ok_or_else(|| missing("Reader"))?;
        let processor = self.processor.ok_or_else(|| missing("Processor"))?;
        let writer = self.writer.ok_or_else(|| missing("Writer"))?;

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor,
            writer,
            chunk_size: self.chunk_size,
            skip_limit: self.skip_limit,
            retry_limit: self.retry_limit,
            required_parameters: self.required_parameters,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}
