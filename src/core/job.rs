use std::collections::{HashSet, VecDeque};

use crate::BatchError;

use super::{build_name, execution::BatchStatus, parameters::JobParametersIncrementer, step::Step};

/// A unit of the job flow: one step, or several steps run in parallel.
pub enum FlowElement<'a> {
    Step(&'a dyn Step),
    /// Steps run on separate threads; the flow goes on once all of them returned.
    Split {
        name: String,
        steps: Vec<&'a dyn Step>,
    },
}

impl FlowElement<'_> {
    pub fn name(&self) -> &str {
        match self {
            FlowElement::Step(step) => step.name(),
            FlowElement::Split { name, .. } => name,
        }
    }
}

/// Where the flow goes when a transition matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Continue with the named step or split.
    Step(String),
    /// End the job as completed.
    End,
    /// End the job as failed.
    Fail,
    /// End the job as stopped.
    ///
    /// A restart replays the flow from its first node: completed steps are skipped
    /// but their recorded exit codes are matched again, so the same transition
    /// stops the job again. Use [`Destination::StopAndRestart`] to resume elsewhere.
    Stop,
    /// End the job as stopped; a restart resumes the flow at the named node.
    StopAndRestart(String),
}

/// Transition taken when the exit code of a step matches `pattern`.
///
/// Patterns accept `*` (any sequence) and `?` (any single character).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub pattern: String,
    pub destination: Destination,
}

impl Transition {
    pub fn matches(&self, exit_code: &str) -> bool {
        matches_pattern(self.pattern.as_bytes(), exit_code.as_bytes())
    }

    fn is_exact(&self) -> bool {
        !self.pattern.contains(['*', '?'])
    }
}

fn matches_pattern(pattern: &[u8], value: &[u8]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some((b'*', rest)) => (0..=value.len()).any(|skip| matches_pattern(rest, &value[skip..])),
        Some((b'?', rest)) => !value.is_empty() && matches_pattern(rest, &value[1..]),
        Some((expected, rest)) => {
            value.first() == Some(expected) && matches_pattern(rest, &value[1..])
        }
    }
}

pub(crate) struct FlowNode<'a> {
    pub(crate) element: FlowElement<'a>,
    transitions: Vec<Transition>,
    /// Node following on completion when no transition matches
    next: Option<String>,
}

impl FlowNode<'_> {
    pub(crate) fn name(&self) -> &str {
        self.element.name()
    }

    /// Exact patterns win over wildcard ones, then declaration order applies.
    fn matching_transition(&self, exit_code: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .filter(|transition| transition.is_exact())
            .chain(self.transitions.iter().filter(|transition| !transition.is_exact()))
            .find(|transition| transition.matches(exit_code))
    }
}

/// Outcome of resolving the flow after a node finished.
pub(crate) enum FlowDecision<'j, 'a> {
    Continue(&'j FlowNode<'a>),
    Finish(BatchStatus),
    /// Stop, recording where a restart picks up.
    StopAndRestart(&'j FlowNode<'a>),
}

/// Immutable job definition: named nodes, linked by `next` and by conditional transitions.
pub struct Job<'a> {
    name: String,
    nodes: Vec<FlowNode<'a>>,
    incrementer: Option<Box<dyn JobParametersIncrementer>>,
    restartable: bool,
}

impl<'a> Job<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer.as_deref()
    }

    /// Names of every step of the job, split members included.
    pub fn step_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .flat_map(|node| match &node.element {
                FlowElement::Step(step) => vec![step.name()],
                FlowElement::Split { steps, .. } => steps.iter().map(|step| step.name()).collect(),
            })
            .collect()
    }

    pub(crate) fn first_node(&self) -> &FlowNode<'a> {
        &self.nodes[0]
    }

    pub(crate) fn node(&self, name: &str) -> Option<&FlowNode<'a>> {
        self.nodes.iter().find(|node| node.name() == name)
    }

    /// Decides what follows `node`, given the status and exit code it ended with.
    pub(crate) fn decide(
        &self,
        node: &FlowNode<'a>,
        status: BatchStatus,
        exit_code: &str,
    ) -> FlowDecision<'_, 'a> {
        if status == BatchStatus::Stopped {
            return FlowDecision::Finish(BatchStatus::Stopped);
        }

        if let Some(transition) = node.matching_transition(exit_code) {
            return match &transition.destination {
                // Targets were validated when the job was built.
                Destination::Step(name) => match self.node(name) {
                    Some(next) => FlowDecision::Continue(next),
                    None => FlowDecision::Finish(BatchStatus::Failed),
                },
                Destination::End => FlowDecision::Finish(BatchStatus::Completed),
                Destination::Fail => FlowDecision::Finish(BatchStatus::Failed),
                Destination::Stop => FlowDecision::Finish(BatchStatus::Stopped),
                Destination::StopAndRestart(name) => match self.node(name) {
                    Some(restart) => FlowDecision::StopAndRestart(restart),
                    None => FlowDecision::Finish(BatchStatus::Stopped),
                },
            };
        }

        match status {
            BatchStatus::Completed => match node.next.as_deref().and_then(|name| self.node(name)) {
                Some(next) => FlowDecision::Continue(next),
                None => FlowDecision::Finish(BatchStatus::Completed),
            },
            _ => FlowDecision::Finish(BatchStatus::Failed),
        }
    }
}

/// Builder for [`Job`].
///
/// ```
/// use batch_engine::core::{execution::StepExecution, job::JobBuilder, step::{RepeatStatus, StepBuilder}};
/// use batch_engine::BatchError;
///
/// # fn main() -> Result<(), BatchError> {
/// let tasklet = |_: &mut StepExecution| -> Result<RepeatStatus, BatchError> { Ok(RepeatStatus::Finished) };
/// let load = StepBuilder::new("load").tasklet(&tasklet).build();
/// let report = StepBuilder::new("report").tasklet(&tasklet).build();
/// let cleanup = StepBuilder::new("cleanup").tasklet(&tasklet).build();
///
/// let job = JobBuilder::new("import")
///     .start(&load)
///     .on("FAILED").to("cleanup")
///     .next(&report)
///     .step(&cleanup)
///     .on("*").fail()
///     .build()?;
/// assert_eq!(job.step_names(), vec!["load", "report", "cleanup"]);
/// # Ok(())
/// # }
/// ```
pub struct JobBuilder<'a> {
    name: String,
    nodes: Vec<FlowNode<'a>>,
    incrementer: Option<Box<dyn JobParametersIncrementer>>,
    restartable: bool,
    errors: Vec<String>,
}

impl<'a> JobBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            incrementer: None,
            restartable: true,
            errors: Vec::new(),
        }
    }

    /// Sets the first step of the job.
    pub fn start(self, step: &'a dyn Step) -> Self {
        self.push(FlowElement::Step(step), false)
    }

    /// Adds a step run once the previous node completed.
    pub fn next(self, step: &'a dyn Step) -> Self {
        self.push(FlowElement::Step(step), true)
    }

    /// Adds a step reachable only through a transition.
    pub fn step(self, step: &'a dyn Step) -> Self {
        self.push(FlowElement::Step(step), false)
    }

    /// Adds steps run in parallel once the previous node completed.
    pub fn split(self, name: &str, steps: &[&'a dyn Step]) -> Self {
        let name = if name.is_empty() {
            format!("split-{}", build_name())
        } else {
            name.to_string()
        };

        let element = FlowElement::Split {
            name,
            steps: steps.to_vec(),
        };
        self.push(element, true)
    }

    /// Starts a transition of the last added node for exit codes matching `pattern`.
    pub fn on(self, pattern: &str) -> TransitionBuilder<'a> {
        TransitionBuilder {
            builder: self,
            pattern: pattern.to_string(),
        }
    }

    /// Derives fresh parameters on every launch so each launch starts a new instance.
    pub fn incrementer(mut self, incrementer: impl JobParametersIncrementer + 'static) -> Self {
        self.incrementer = Some(Box::new(incrementer));
        self
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    fn push(mut self, element: FlowElement<'a>, linked: bool) -> Self {
        let name = element.name().to_string();
        if linked {
            if let Some(previous) = self.nodes.last_mut() {
                previous.next = Some(name);
            }
        }

        self.nodes.push(FlowNode {
            element,
            transitions: Vec::new(),
            next: None,
        });
        self
    }

    fn add_transition(mut self, pattern: String, destination: Destination) -> Self {
        match self.nodes.last_mut() {
            Some(node) => node.transitions.push(Transition {
                pattern,
                destination,
            }),
            None => self
                .errors
                .push(format!("Transition on '{}' declared before any step", pattern)),
        }
        self
    }

    /// Builds the job after validating the flow.
    ///
    /// Fails when the job has no step, when two nodes or steps share a name, when a
    /// transition targets an unknown node or when a node cannot be reached from
    /// the first one.
    pub fn build(self) -> Result<Job<'a>, BatchError> {
        let invalid = |message: String| {
            Err(BatchError::Configuration(format!("Job {}: {}", self.name, message)))
        };

        if self.name.is_empty() {
            return Err(BatchError::Configuration("Job name must not be empty".to_string()));
        }

        if let Some(error) = self.errors.first() {
            return invalid(error.clone());
        }

        if self.nodes.is_empty() {
            return invalid("a job needs at least one step".to_string());
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            let mut node_names = vec![node.name()];
            if let FlowElement::Split { steps, .. } = &node.element {
                if steps.is_empty() {
                    return invalid(format!("split {} has no step", node.name()));
                }
                node_names.extend(steps.iter().map(|step| step.name()));
            }

            for name in node_names {
                if name.is_empty() {
                    return invalid("step names must not be empty".to_string());
                }
                if !names.insert(name) {
                    return invalid(format!("duplicate step name {}", name));
                }
            }
        }

        let node_names: HashSet<&str> = self.nodes.iter().map(|node| node.name()).collect();
        for node in &self.nodes {
            for transition in &node.transitions {
                if let Destination::Step(target) | Destination::StopAndRestart(target) =
                    &transition.destination
                {
                    if !node_names.contains(target.as_str()) {
                        return invalid(format!(
                            "transition on '{}' from {} targets unknown step {}",
                            transition.pattern,
                            node.name(),
                            target
                        ));
                    }
                }
            }
        }

        let reachable = self.reachable_from_start();
        if let Some(node) = self.nodes.iter().find(|node| !reachable.contains(node.name())) {
            return invalid(format!("step {} is unreachable", node.name()));
        }

        Ok(Job {
            name: self.name,
            nodes: self.nodes,
            incrementer: self.incrementer,
            restartable: self.restartable,
        })
    }

    fn reachable_from_start(&self) -> HashSet<&str> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([self.nodes[0].name()]);

        while let Some(name) = queue.pop_front() {
            if !reachable.insert(name) {
                continue;
            }

            if let Some(node) = self.nodes.iter().find(|node| node.name() == name) {
                queue.extend(node.next.as_deref());
                queue.extend(node.transitions.iter().filter_map(
                    |transition| match &transition.destination {
                        Destination::Step(target) | Destination::StopAndRestart(target) => {
                            Some(target.as_str())
                        }
                        _ => None,
                    },
                ));
            }
        }

        reachable
    }
}

/// Completes a transition started with [`JobBuilder::on`].
pub struct TransitionBuilder<'a> {
    builder: JobBuilder<'a>,
    pattern: String,
}

impl<'a> TransitionBuilder<'a> {
    pub fn to(self, step_name: &str) -> JobBuilder<'a> {
        self.builder
            .add_transition(self.pattern, Destination::Step(step_name.to_string()))
    }

    pub fn end(self) -> JobBuilder<'a> {
        self.builder.add_transition(self.pattern, Destination::End)
    }

    pub fn fail(self) -> JobBuilder<'a> {
        self.builder.add_transition(self.pattern, Destination::Fail)
    }

    pub fn stop(self) -> JobBuilder<'a> {
        self.builder.add_transition(self.pattern, Destination::Stop)
    }

    /// Stops the job; a restart of the instance resumes at `step_name`.
    pub fn stop_and_restart(self, step_name: &str) -> JobBuilder<'a> {
        self.builder.add_transition(
            self.pattern,
            Destination::StopAndRestart(step_name.to_string()),
        )
    }
}
