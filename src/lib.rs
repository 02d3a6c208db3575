#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Batch Engine

 A batch job execution engine: jobs composed of ordered steps, each either a
 custom unit of work (tasklet) or a read-process-write pipeline committed in
 chunks, parameterized at launch, with restart and status tracking.

 ## Core Concepts

- **Job:** A named composition of steps, linked sequentially or by conditional transitions on a step's exit code. Steps can also run side by side in a split.
- **Step:** One stage of a job. A `TaskletStep` calls a `Tasklet` until it reports it is finished; a `ChunkOrientedStep` reads, processes and writes items one chunk at a time.
- **JobParameters:** Typed launch parameters. The identifying ones, with the job name, identify a job instance.
- **JobLauncher:** Runs a job, records every `JobExecution` and `StepExecution` in an `ExecutionRepository`, and restarts failed or stopped instances from the first step that did not complete.
- **ItemReader / ItemProcessor / ItemWriter:** Application components of a chunk-oriented step. A reader signals the end of its input by returning `None`; a processor filters an item by returning `None`.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| json          | Enables the JSON file `ExecutionRepository`                   |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```rust
use batch_engine::core::execution::BatchStatus;
use batch_engine::core::item::PassThroughProcessor;
use batch_engine::core::job::JobBuilder;
use batch_engine::core::launcher::JobLauncherBuilder;
use batch_engine::core::parameters::JobParametersBuilder;
use batch_engine::core::step::StepBuilder;
use batch_engine::item::memory::{InMemoryItemReader, InMemoryItemWriter};
use batch_engine::tasklet::logging::LoggingTaskletBuilder;
use batch_engine::BatchError;

fn main() -> Result<(), BatchError> {
    let reader = InMemoryItemReader::new(vec![1, 2, 3, 4, 5]);
    let processor = PassThroughProcessor;
    let writer = InMemoryItemWriter::new();

    let copy = StepBuilder::new("copy")
        .chunk::<i32, i32>(2)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()?;

    let tasklet = LoggingTaskletBuilder::new()
        .message("Copy done")
        .parameter("requestDate")
        .build()?;
    let report = StepBuilder::new("report").tasklet(&tasklet).build();

    let job = JobBuilder::new("copyJob").start(&copy).next(&report).build()?;

    let launcher = JobLauncherBuilder::new().build()?;
    let parameters = JobParametersBuilder::new()
        .add_string("requestDate", "2024-01-31")
        .build();
    let execution = launcher.run(&job, parameters)?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(writer.items(), vec![1, 2, 3, 4, 5]);
    assert_eq!(execution.step_executions[0].commit_count, 3);
    Ok(())
}
```
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of items readers / writers
pub mod item;

/// Durable records of job and step executions
pub mod repository;

/// Ready-made tasklets
pub mod tasklet;
