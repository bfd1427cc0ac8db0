use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use weft_core::config::{EngineConfig, ReplyConfig};
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::traits::{ActionSink, GenerativeGateway, MemoryGateway};
use weft_core::types::{RunStatus, WorkflowEvent};

use crate::context::{Context, LogEntry, LogStatus, NodeOutput};
use crate::definition::WorkflowDefinition;
use crate::executor::{Collaborators, NodeExecutor, StepOutcome};
use crate::transform::TransformRegistry;

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// About to execute the node at this index.
    Running(usize),
    /// A node failed; no further nodes run.
    Aborted { at: usize, cause: String },
    Completed,
}

/// Compute the state after the node at `index` produced `outcome`.
///
/// Output advances by one, or completes if the node is terminal. A jump to
/// an existing node moves there; a jump to an unknown id or no jump at all
/// advances. Running off the end completes.
pub fn transition(
    definition: &WorkflowDefinition,
    index: usize,
    outcome: &Result<StepOutcome>,
) -> RunState {
    let advance = || {
        if index + 1 < definition.len() {
            RunState::Running(index + 1)
        } else {
            RunState::Completed
        }
    };

    match outcome {
        Err(e) => RunState::Aborted {
            at: index,
            cause: e.to_string(),
        },
        Ok(StepOutcome::Output(_)) => {
            if definition.node(index).is_some_and(|n| n.terminal) {
                RunState::Completed
            } else {
                advance()
            }
        }
        Ok(StepOutcome::Jump(Some(target))) => match definition.index_of(target) {
            Some(next) => RunState::Running(next),
            None => advance(),
        },
        Ok(StepOutcome::Jump(None)) => advance(),
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// Nodes executed, routers included.
    pub steps: usize,
    /// Why the run aborted, if it did.
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub context: Context,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// The human-facing reply: the latest generated text, else the
    /// escalation acknowledgment if an action ran, else the generic receipt.
    /// Aborted runs get the failure acknowledgment.
    pub fn reply(&self, replies: &ReplyConfig) -> String {
        if !self.succeeded() {
            return replies.failure.clone();
        }

        let results: Vec<&NodeOutput> = self.context.results().map(|(_, out)| out).collect();
        if let Some(text) = results.iter().rev().find_map(|out| match out {
            NodeOutput::Generation(text) => Some(text.clone()),
            _ => None,
        }) {
            return text;
        }
        if results.iter().any(|out| matches!(out, NodeOutput::Action(_))) {
            return replies.escalation.clone();
        }
        replies.received.clone()
    }
}

/// Runs a workflow definition against inbound records.
///
/// The engine holds no per-run state, so one instance serves any number of
/// concurrent runs.
pub struct WorkflowEngine {
    definition: Arc<WorkflowDefinition>,
    executor: NodeExecutor,
    memory: Option<Arc<dyn MemoryGateway>>,
    event_bus: Arc<EventBus>,
    max_steps: usize,
    gateway_timeout: Duration,
}

impl WorkflowEngine {
    pub fn builder(definition: WorkflowDefinition) -> EngineBuilder {
        EngineBuilder::new(definition)
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run the workflow on an inbound record with a fresh trace id.
    pub async fn run(&self, input: Value) -> RunReport {
        self.run_with_context(Context::new(input)).await
    }

    /// Run the workflow on a pre-seeded context.
    pub async fn run_with_context(&self, ctx: Context) -> RunReport {
        let span = info_span!(
            "workflow_run",
            trace_id = %ctx.trace_id(),
            workflow = %self.definition.name
        );
        self.drive(ctx).instrument(span).await
    }

    async fn drive(&self, mut ctx: Context) -> RunReport {
        let started = Instant::now();
        let trace_id = ctx.trace_id().clone();
        info!(content_len = ctx.content().len(), "Workflow run started");
        self.event_bus.publish(WorkflowEvent::RunStarted {
            trace_id: trace_id.clone(),
            workflow: self.definition.name.clone(),
        });

        let mut state = if self.definition.is_empty() {
            RunState::Completed
        } else {
            RunState::Running(0)
        };
        let mut steps = 0;

        while let RunState::Running(index) = state {
            if steps >= self.max_steps {
                let cause = WeftError::StepLimitExceeded(self.max_steps).to_string();
                warn!(node_index = index, max_steps = self.max_steps, "Step limit reached, aborting run");
                state = RunState::Aborted { at: index, cause };
                break;
            }
            let Some(node) = self.definition.node(index) else {
                state = RunState::Completed;
                break;
            };

            debug!(node_id = %node.id, kind = node.kind.label(), "Executing node");
            let node_started = Instant::now();
            let outcome = self.executor.execute(node, &ctx, &self.definition).await;
            let elapsed_ms = node_started.elapsed().as_millis() as u64;
            steps += 1;

            let (status, output) = match &outcome {
                Ok(StepOutcome::Output(out)) => {
                    ctx.record(&node.id, out.clone());
                    self.event_bus.publish(WorkflowEvent::NodeCompleted {
                        trace_id: trace_id.clone(),
                        node_id: node.id.clone(),
                        elapsed_ms,
                    });
                    (LogStatus::Success, out.to_value())
                }
                Ok(StepOutcome::Jump(target)) => {
                    let output = match target {
                        Some(target) => {
                            info!(node_id = %node.id, target = %target, "Route taken");
                            self.event_bus.publish(WorkflowEvent::RouteTaken {
                                trace_id: trace_id.clone(),
                                node_id: node.id.clone(),
                                target: target.clone(),
                            });
                            json!({ "target": target })
                        }
                        None => {
                            debug!(node_id = %node.id, "No route matched, falling through");
                            Value::Null
                        }
                    };
                    (LogStatus::Success, output)
                }
                Err(e) => {
                    error!(node_id = %node.id, error = %e, "Node failed, aborting run");
                    self.event_bus.publish(WorkflowEvent::NodeFailed {
                        trace_id: trace_id.clone(),
                        node_id: node.id.clone(),
                        error: e.to_string(),
                    });
                    (LogStatus::Failed, json!({ "error": e.to_string() }))
                }
            };

            ctx.push_log(LogEntry {
                trace_id: trace_id.clone(),
                node_id: node.id.clone(),
                status,
                output,
                elapsed_ms,
                at: Utc::now(),
            });

            state = transition(&self.definition, index, &outcome);
        }

        let (status, error) = match state {
            RunState::Aborted { cause, .. } => (RunStatus::Aborted, Some(cause)),
            _ => (RunStatus::Completed, None),
        };

        self.persist(&ctx, status).await;

        info!(status = %status, steps, "Workflow run finished");
        self.event_bus.publish(WorkflowEvent::RunFinished {
            trace_id,
            status,
            steps,
        });

        RunReport {
            status,
            steps,
            error,
            elapsed_ms: started.elapsed().as_millis() as u64,
            context: ctx,
        }
    }

    /// Best-effort save of the run's content; failures are logged only.
    async fn persist(&self, ctx: &Context, status: RunStatus) {
        let Some(memory) = &self.memory else {
            debug!("Memory not configured, skipping save");
            return;
        };

        let metadata = json!({
            "trace_id": ctx.trace_id(),
            "workflow": self.definition.name,
            "status": status,
        });
        let saved = tokio::time::timeout(self.gateway_timeout, memory.save(ctx.content(), metadata)).await;
        let failure = match saved {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(
                WeftError::GatewayTimeout {
                    service: "memory".into(),
                    timeout_secs: self.gateway_timeout.as_secs(),
                }
                .to_string(),
            ),
        };

        match failure {
            None => {
                debug!("Run content saved to memory");
                self.event_bus.publish(WorkflowEvent::MemorySaved {
                    trace_id: ctx.trace_id().clone(),
                });
            }
            Some(error) => {
                warn!(error = %error, "Memory save failed");
                self.event_bus.publish(WorkflowEvent::MemorySaveFailed {
                    trace_id: ctx.trace_id().clone(),
                    error,
                });
            }
        }
    }
}

/// Builder for a `WorkflowEngine`.
pub struct EngineBuilder {
    definition: WorkflowDefinition,
    collaborators: Collaborators,
    transforms: TransformRegistry,
    replies: ReplyConfig,
    event_bus: Option<Arc<EventBus>>,
    max_steps: usize,
    gateway_timeout: Duration,
}

impl EngineBuilder {
    pub fn new(definition: WorkflowDefinition) -> Self {
        let defaults = EngineConfig::default();
        Self {
            definition,
            collaborators: Collaborators::default(),
            transforms: TransformRegistry::with_builtins(),
            replies: ReplyConfig::default(),
            event_bus: None,
            max_steps: defaults.max_steps,
            gateway_timeout: Duration::from_secs(defaults.gateway_timeout_secs),
        }
    }

    pub fn generative(mut self, gateway: Arc<dyn GenerativeGateway>) -> Self {
        self.collaborators.generative = Some(gateway);
        self
    }

    pub fn memory(mut self, gateway: Arc<dyn MemoryGateway>) -> Self {
        self.collaborators.memory = Some(gateway);
        self
    }

    pub fn actions(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.collaborators.actions = Some(sink);
        self
    }

    pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn replies(mut self, replies: ReplyConfig) -> Self {
        self.replies = replies;
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Apply the `[engine]` config section.
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.max_steps = config.max_steps;
        self.gateway_timeout = Duration::from_secs(config.gateway_timeout_secs);
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Validate the definition and assemble the engine.
    pub fn build(self) -> Result<WorkflowEngine> {
        for warning in self.definition.validate(&self.transforms)? {
            warn!(workflow = %self.definition.name, "{}", warning);
        }

        let event_bus = self.event_bus.unwrap_or_default();
        let memory = self.collaborators.memory.clone();
        let executor = NodeExecutor::new(
            self.collaborators,
            Arc::new(self.transforms),
            self.replies,
            self.gateway_timeout,
            event_bus.clone(),
        );

        Ok(WorkflowEngine {
            definition: Arc::new(self.definition),
            executor,
            memory,
            event_bus,
            max_steps: self.max_steps,
            gateway_timeout: self.gateway_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Analysis;
    use crate::definition::NodeSpec;
    use crate::rules::RouteRule;

    fn linear() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "t",
            vec![
                NodeSpec::memory_recall("a"),
                NodeSpec::route("r", vec![RouteRule::new("true", "c")]),
                NodeSpec::generate("b", "x").terminal(),
                NodeSpec::action("c", "page", Value::Null),
            ],
        )
    }

    fn output() -> Result<StepOutcome> {
        Ok(StepOutcome::Output(NodeOutput::Analysis(Analysis::default())))
    }

    #[test]
    fn test_output_advances() {
        assert_eq!(transition(&linear(), 0, &output()), RunState::Running(1));
    }

    #[test]
    fn test_terminal_output_completes() {
        assert_eq!(transition(&linear(), 2, &output()), RunState::Completed);
    }

    #[test]
    fn test_last_node_completes() {
        assert_eq!(transition(&linear(), 3, &output()), RunState::Completed);
    }

    #[test]
    fn test_jump_moves_counter() {
        let jump = Ok(StepOutcome::Jump(Some("c".into())));
        assert_eq!(transition(&linear(), 1, &jump), RunState::Running(3));
    }

    #[test]
    fn test_unknown_jump_and_no_match_fall_through() {
        let dangling = Ok(StepOutcome::Jump(Some("booking".into())));
        assert_eq!(transition(&linear(), 1, &dangling), RunState::Running(2));
        assert_eq!(transition(&linear(), 1, &Ok(StepOutcome::Jump(None))), RunState::Running(2));
    }

    #[test]
    fn test_error_aborts() {
        let failed = Err(WeftError::UnknownTransform("x".into()));
        assert_eq!(
            transition(&linear(), 0, &failed),
            RunState::Aborted {
                at: 0,
                cause: "Transform not registered: x".into()
            }
        );
    }
}
