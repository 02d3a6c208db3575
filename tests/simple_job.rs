mod common;

use anyhow::Result;
use chrono::NaiveDate;

use batch_engine::{
    BatchError,
    core::{
        event::{BatchEvent, LoggingListener},
        execution::{BatchStatus, ExitStatus, StepExecution},
        job::JobBuilder,
        launcher::JobLauncherBuilder,
        parameters::{JobParameters, JobParametersBuilder, RunIdIncrementer},
        step::{RepeatStatus, StepBuilder},
    },
    tasklet::logging::LoggingTaskletBuilder,
};

use common::{RecordingListener, finished, init_logger, step_names};

#[test]
fn simple_job_runs_both_steps() -> Result<()> {
    init_logger();

    let tasklet1 = LoggingTaskletBuilder::new()
        .message("This is Step1")
        .parameter("requestDate")
        .build()?;
    let tasklet2 = LoggingTaskletBuilder::new()
        .message("This is Step2")
        .parameter("requestDate")
        .build()?;
    let step1 = StepBuilder::new("simpleStep1").tasklet(&tasklet1).build();
    let step2 = StepBuilder::new("simpleStep2").tasklet(&tasklet2).build();
    let job = JobBuilder::new("simpleJob").start(&step1).next(&step2).build()?;

    let listener = RecordingListener::default();
    let launcher = JobLauncherBuilder::new()
        .listener(LoggingListener)
        .listener(listener.clone())
        .build()?;

    let parameters = JobParametersBuilder::new()
        .add_date("requestDate", NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        .build();
    let execution = launcher.run(&job, parameters)?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_names(&execution), vec!["simpleStep1", "simpleStep2"]);
    assert!(
        execution
            .step_executions
            .iter()
            .all(|step_execution| step_execution.status == BatchStatus::Completed)
    );

    let started: Vec<String> = listener
        .events()
        .into_iter()
        .filter_map(|event| match event {
            BatchEvent::StepStarted {
                step_name,
                parameters,
                ..
            } => Some(format!("{} {}", step_name, parameters)),
            _ => None,
        })
        .collect();
    assert_eq!(
        started,
        vec![
            "simpleStep1 {requestDate=2024-01-31}",
            "simpleStep2 {requestDate=2024-01-31}"
        ]
    );
    Ok(())
}

#[test]
fn sequential_job_produces_one_completed_execution_per_step() -> Result<()> {
    init_logger();

    let steps: Vec<_> = (1..=5)
        .map(|index| StepBuilder::new(&format!("step{}", index)).tasklet(&finished).build())
        .collect();

    let mut builder = JobBuilder::new("sequential").start(&steps[0]);
    for step in &steps[1..] {
        builder = builder.next(step);
    }
    let job = builder.build()?;

    let launcher = JobLauncherBuilder::new().build()?;
    let execution = launcher.run(&job, JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(
        step_names(&execution),
        vec!["step1", "step2", "step3", "step4", "step5"]
    );
    for step_execution in &execution.step_executions {
        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.commit_count, 1);
    }
    Ok(())
}

#[test]
fn launch_by_name_with_command_line_parameters() -> Result<()> {
    init_logger();

    let tasklet = LoggingTaskletBuilder::new()
        .message("This is Step1")
        .parameter("requestDate")
        .build()?;
    let step = StepBuilder::new("simpleStep1")
        .tasklet(&tasklet)
        .required_parameter("requestDate")
        .build();
    let job = JobBuilder::new("simpleJob").start(&step).build()?;

    let launcher = JobLauncherBuilder::new().register(&job).build()?;

    let parameters = JobParameters::from_args(["requestDate(date)=2024-01-31", "-verbose=true"])?;
    let summary = launcher.launch("simpleJob", parameters)?;

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.exit_code, "COMPLETED");
    assert_eq!(summary.step_summaries.len(), 1);

    // Non-identifying parameters do not make a new instance.
    let again = JobParameters::from_args(["requestDate(date)=2024-01-31", "-verbose=false"])?;
    let result = launcher.launch("simpleJob", again);
    assert!(matches!(result, Err(BatchError::DuplicateExecution { .. })));
    Ok(())
}

#[test]
fn completed_instance_cannot_be_launched_again() -> Result<()> {
    init_logger();

    let step = StepBuilder::new("step").tasklet(&finished).build();
    let job = JobBuilder::new("job").start(&step).build()?;
    let launcher = JobLauncherBuilder::new().build()?;

    let parameters = JobParametersBuilder::new()
        .add_string("file", "input.csv")
        .build();
    launcher.run(&job, parameters.clone())?;

    let result = launcher.run(&job, parameters);
    assert!(matches!(result, Err(BatchError::DuplicateExecution { .. })));

    let other = JobParametersBuilder::new()
        .add_string("file", "other.csv")
        .build();
    assert_eq!(launcher.run(&job, other)?.status, BatchStatus::Completed);
    Ok(())
}

#[test]
fn delimiters_in_values_do_not_merge_instances() -> Result<()> {
    init_logger();

    let step = StepBuilder::new("step").tasklet(&finished).build();
    let job = JobBuilder::new("job").start(&step).build()?;
    let launcher = JobLauncherBuilder::new().build()?;

    let packed = JobParametersBuilder::new()
        .add_string("a", "1(string),b=2")
        .build();
    let split = JobParametersBuilder::new()
        .add_string("a", "1")
        .add_string("b", "2")
        .build();

    let first = launcher.run(&job, packed.clone())?;
    let second = launcher.run(&job, split.clone())?;

    assert_eq!(second.status, BatchStatus::Completed);
    assert_ne!(first.instance_id, second.instance_id);
    assert_eq!(launcher.repository().find_job_executions("job", &packed)?.len(), 1);
    assert_eq!(launcher.repository().find_job_executions("job", &split)?.len(), 1);
    Ok(())
}

#[test]
fn incrementer_starts_a_new_instance_on_every_launch() -> Result<()> {
    init_logger();

    let step = StepBuilder::new("step").tasklet(&finished).build();
    let job = JobBuilder::new("job")
        .start(&step)
        .incrementer(RunIdIncrementer::new())
        .build()?;
    let launcher = JobLauncherBuilder::new().register(&job).build()?;

    let first = launcher.launch("job", JobParameters::new())?;
    let second = launcher.launch("job", JobParameters::new())?;

    assert_eq!(first.status, BatchStatus::Completed);
    assert_eq!(second.status, BatchStatus::Completed);

    let first = launcher.repository().find_job_execution(first.id)?.unwrap();
    let second = launcher.repository().find_job_execution(second.id)?.unwrap();
    assert_eq!(first.parameters.get_long("run.id"), Some(1));
    assert_eq!(second.parameters.get_long("run.id"), Some(2));
    assert_ne!(first.instance_id, second.instance_id);
    Ok(())
}

#[test]
fn custom_exit_code_drives_transitions() -> Result<()> {
    init_logger();

    let decide = |step_execution: &mut StepExecution| -> Result<RepeatStatus, BatchError> {
        let exit_code = match step_execution.parameter("mode").map(|mode| mode.to_string()) {
            Some(mode) if mode == "full" => "FULL_LOAD",
            _ => "DELTA_LOAD",
        };
        step_execution.exit_status = ExitStatus::new(exit_code);
        Ok(RepeatStatus::Finished)
    };

    let decision = StepBuilder::new("decision").tasklet(&decide).build();
    let full = StepBuilder::new("full").tasklet(&finished).build();
    let delta = StepBuilder::new("delta").tasklet(&finished).build();

    let job = JobBuilder::new("load")
        .start(&decision)
        .on("FULL_*")
        .to("full")
        .on("*")
        .to("delta")
        .step(&full)
        .step(&delta)
        .build()?;
    let launcher = JobLauncherBuilder::new().build()?;

    let full_run = launcher.run(
        &job,
        JobParametersBuilder::new().add_string("mode", "full").build(),
    )?;
    assert_eq!(step_names(&full_run), vec!["decision", "full"]);

    let delta_run = launcher.run(
        &job,
        JobParametersBuilder::new().add_string("mode", "delta").build(),
    )?;
    assert_eq!(step_names(&delta_run), vec!["decision", "delta"]);
    assert_eq!(delta_run.status, BatchStatus::Completed);
    Ok(())
}
