//! Linear step pipelines
//!
//! A [`Workflow`] is a fixed chain of steps built once with
//! [`Workflow::builder`]. Each run validates the input, executes the steps
//! strictly in order and feeds each step's output object to the next step.
//! The first failure stops the run.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use quill_agent::cancel::{cancellable, CancellationToken};
use quill_agent::events::{EventSink, EventSender};
use quill_agent::{AgentError, Capability, Fields, Schema};

/// A stage in a workflow
///
/// Steps are capabilities: they validate their input, run, and validate
/// their output against their own schema.
pub type Step = Capability;

/// Where a run currently is
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    Running { step_index: usize },
    Completed { output: Fields },
    Failed { step_index: usize, error: String },
}

impl WorkflowStatus {
    /// Short name for events and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Result of executing a workflow step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_id: String,
    pub duration_ms: u64,
}

/// A completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub output: Fields,
    pub steps: Vec<StepResult>,
}

impl WorkflowRun {
    /// String value of an output field
    pub fn text(&self, field: &str) -> Option<&str> {
        self.output.get(field).and_then(Value::as_str)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }

    pub fn status(&self) -> WorkflowStatus {
        WorkflowStatus::Completed {
            output: self.output.clone(),
        }
    }
}

/// Errors that can occur with workflows
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    /// Input rejected before any step ran
    #[error("Invalid workflow input: {0}")]
    InvalidInput(AgentError),

    #[error("Step {step_index} ({step_id}) failed: {source}")]
    StepFailed {
        step_index: usize,
        step_id: String,
        source: AgentError,
    },

    /// Final output does not match the workflow's output schema
    #[error("Invalid workflow output: {0}")]
    InvalidOutput(AgentError),

    #[error("Workflow '{0}' has no steps")]
    NoSteps(String),
}

impl WorkflowError {
    /// The underlying agent error, if any
    pub fn agent_error(&self) -> Option<&AgentError> {
        match self {
            Self::InvalidInput(e) | Self::InvalidOutput(e) => Some(e),
            Self::StepFailed { source, .. } => Some(source),
            Self::NoSteps(_) => None,
        }
    }

    /// Index of the failing step
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::StepFailed { step_index, .. } => Some(*step_index),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.agent_error().is_some_and(AgentError::is_validation)
    }

    pub fn is_guard(&self) -> bool {
        self.agent_error().is_some_and(AgentError::is_guard)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.agent_error(), Some(AgentError::Cancelled))
    }
}

/// Builder returned by [`Workflow::builder`]
pub struct WorkflowBuilder {
    id: String,
    description: String,
    input_schema: Option<Schema>,
    output_schema: Option<Schema>,
    steps: Vec<Step>,
}

impl WorkflowBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Schema for run input (defaults to the first step's input schema)
    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Schema for run output (defaults to the last step's output schema)
    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Append a step
    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Finish the workflow
    ///
    /// Adjacent steps whose schemas don't line up are logged, not rejected:
    /// the output of one step is passed to the next as-is.
    pub fn commit(self) -> Result<Workflow, WorkflowError> {
        let (Some(first), Some(last)) = (self.steps.first(), self.steps.last()) else {
            return Err(WorkflowError::NoSteps(self.id));
        };

        let input_schema = self.input_schema.unwrap_or_else(|| first.input_schema().clone());
        let output_schema = self.output_schema.unwrap_or_else(|| last.output_schema().clone());

        for pair in self.steps.windows(2) {
            let missing = pair[0].output_schema().missing_for(pair[1].input_schema());
            if !missing.is_empty() {
                tracing::warn!(
                    workflow = %self.id,
                    from = %pair[0].id(),
                    to = %pair[1].id(),
                    "Step output does not provide required input fields: {}",
                    missing.join(", ")
                );
            }
        }

        Ok(Workflow {
            id: self.id,
            description: self.description,
            input_schema,
            output_schema,
            steps: self.steps,
        })
    }
}

/// A committed, immutable workflow
#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    description: String,
    input_schema: Schema,
    output_schema: Schema,
    steps: Vec<Step>,
}

impl Workflow {
    pub fn builder(id: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            id: id.into(),
            description: String::new(),
            input_schema: None,
            output_schema: None,
            steps: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run the workflow
    pub async fn run(
        &self,
        input: Fields,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        self.run_with_events(input, cancel, &EventSink::none()).await
    }

    /// Run the workflow, reporting progress on `events`
    pub async fn run_observed(
        &self,
        input: Fields,
        cancel: &CancellationToken,
        events: EventSender,
    ) -> Result<WorkflowRun, WorkflowError> {
        self.run_with_events(input, cancel, &EventSink::new(events)).await
    }

    async fn run_with_events(
        &self,
        input: Fields,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<WorkflowRun, WorkflowError> {
        self.execute(input, cancel, events)
            .instrument(tracing::info_span!("workflow", id = %self.id))
            .await
    }

    async fn execute(
        &self,
        input: Fields,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<WorkflowRun, WorkflowError> {
        self.input_schema
            .validate(&format!("{} input", self.id), &input)
            .map_err(WorkflowError::InvalidInput)?;

        let mut data = input;
        let mut results = Vec::with_capacity(self.steps.len());

        for (step_index, step) in self.steps.iter().enumerate() {
            let running = WorkflowStatus::Running { step_index };
            events.workflow_status(&self.id, running.label(), Some(step_index));
            events.step_start(step_index, step.id());
            tracing::info!(step = %step.id(), "[Step {}/{}]", step_index + 1, self.steps.len());

            let started = Instant::now();
            match cancellable(cancel, step.invoke(data, cancel)).await {
                Ok(output) => {
                    let elapsed = started.elapsed();
                    events.step_complete(step_index, step.id(), elapsed);
                    tracing::info!(step = %step.id(), "Completed in {}ms", elapsed.as_millis());

                    results.push(StepResult {
                        step_index,
                        step_id: step.id().to_string(),
                        duration_ms: elapsed.as_millis() as u64,
                    });
                    data = output;
                }
                Err(source) => {
                    let failed = WorkflowStatus::Failed {
                        step_index,
                        error: source.to_string(),
                    };
                    events.workflow_status(&self.id, failed.label(), Some(step_index));
                    events.error(&source.to_string());
                    tracing::warn!(step = %step.id(), status = ?failed, "Workflow failed");

                    return Err(WorkflowError::StepFailed {
                        step_index,
                        step_id: step.id().to_string(),
                        source,
                    });
                }
            }
        }

        if let Err(e) = self.output_schema.validate(&format!("{} output", self.id), &data) {
            let last = self.steps.len().saturating_sub(1);
            let failed = WorkflowStatus::Failed {
                step_index: last,
                error: e.to_string(),
            };
            events.workflow_status(&self.id, failed.label(), Some(last));
            events.error(&e.to_string());
            tracing::warn!(status = ?failed, "Workflow output rejected");
            return Err(WorkflowError::InvalidOutput(e));
        }

        let run = WorkflowRun {
            workflow_id: self.id.clone(),
            output: data,
            steps: results,
        };
        events.workflow_status(&self.id, run.status().label(), None);
        tracing::info!("Workflow completed in {}ms", run.total_duration_ms());

        Ok(run)
    }
}
