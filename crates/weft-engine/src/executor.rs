use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use weft_core::config::ReplyConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::traits::{ActionSink, GenerativeGateway, MemoryGateway};
use weft_core::types::{ActionRequest, Completion, CompletionMode, WorkflowEvent};

use crate::context::{ActionReceipt, Analysis, Context, NodeOutput};
use crate::definition::{NodeKind, NodeSpec, WorkflowDefinition};
use crate::rules::{select_route, RouteRule, RuleDiagnostic};
use crate::template::interpolate;
use crate::transform::TransformRegistry;

/// Recall result when no memory gateway is configured.
pub const RECALL_UNCONFIGURED: &str = "No memory";
/// Recall result when nothing similar was found.
pub const RECALL_EMPTY: &str = "Nothing found";
/// Recall result when the memory gateway failed.
pub const RECALL_FAILED: &str = "Memory error";

const RECALL_SEPARATOR: &str = " | ";

/// What a node produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A value to store under the node's id.
    Output(NodeOutput),
    /// A router decision; `None` means fall through.
    Jump(Option<String>),
}

/// The optional external collaborators a run can reach.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub generative: Option<Arc<dyn GenerativeGateway>>,
    pub memory: Option<Arc<dyn MemoryGateway>>,
    pub actions: Option<Arc<dyn ActionSink>>,
}

/// Dispatches a node to its kind-specific handler.
///
/// Collaborator failures are turned into sentinel outputs here; only
/// transform failures come back as errors.
pub struct NodeExecutor {
    collaborators: Collaborators,
    transforms: Arc<TransformRegistry>,
    replies: ReplyConfig,
    gateway_timeout: Duration,
    event_bus: Arc<EventBus>,
}

impl NodeExecutor {
    pub fn new(
        collaborators: Collaborators,
        transforms: Arc<TransformRegistry>,
        replies: ReplyConfig,
        gateway_timeout: Duration,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            collaborators,
            transforms,
            replies,
            gateway_timeout,
            event_bus,
        }
    }

    pub async fn execute(
        &self,
        node: &NodeSpec,
        ctx: &Context,
        definition: &WorkflowDefinition,
    ) -> Result<StepOutcome> {
        match &node.kind {
            NodeKind::Transform { transform } => self
                .transforms
                .apply(&node.id, transform, ctx)
                .map(|value| StepOutcome::Output(NodeOutput::Transform(value))),
            NodeKind::MemoryRecall { query } => {
                let text = self.recall(node, query, ctx).await;
                Ok(StepOutcome::Output(NodeOutput::Recall(text)))
            }
            NodeKind::Analyze { prompt } => {
                let analysis = self.analyze(node, prompt, ctx).await;
                Ok(StepOutcome::Output(NodeOutput::Analysis(analysis)))
            }
            NodeKind::Generate { prompt } => {
                let text = self.generate(node, prompt, ctx).await;
                Ok(StepOutcome::Output(NodeOutput::Generation(text)))
            }
            NodeKind::Route { routes } => Ok(StepOutcome::Jump(self.route(node, routes, ctx, definition))),
            NodeKind::Action { action, payload } => {
                self.submit_action(action, payload, ctx);
                Ok(StepOutcome::Output(NodeOutput::Action(ActionReceipt::executed(
                    action.as_str(),
                ))))
            }
        }
    }

    async fn recall(&self, node: &NodeSpec, query: &str, ctx: &Context) -> String {
        let Some(memory) = &self.collaborators.memory else {
            self.degraded(node, ctx, "memory", &WeftError::ConfigurationMissing("memory".into()));
            return RECALL_UNCONFIGURED.to_string();
        };

        let query = interpolate(query, ctx);
        match self.guarded("memory", memory.recall(&query)).await {
            Ok(hits) if hits.is_empty() => RECALL_EMPTY.to_string(),
            Ok(hits) => hits
                .into_iter()
                .map(|hit| hit.content)
                .collect::<Vec<_>>()
                .join(RECALL_SEPARATOR),
            Err(e) => {
                self.degraded(node, ctx, "memory", &e);
                RECALL_FAILED.to_string()
            }
        }
    }

    async fn analyze(&self, node: &NodeSpec, template: &str, ctx: &Context) -> Analysis {
        let Some(generative) = &self.collaborators.generative else {
            self.degraded(node, ctx, "generative", &WeftError::ConfigurationMissing("generative".into()));
            return Analysis::default();
        };

        let prompt = interpolate(template, ctx);
        let parsed = match self
            .guarded("generative", generative.complete(&prompt, CompletionMode::Json))
            .await
        {
            Ok(Completion::Json(value)) => Analysis::from_value(value),
            Ok(Completion::Text(text)) => {
                weft_core::types::parse_json_output(&text).and_then(Analysis::from_value)
            }
            Err(e @ WeftError::MalformedOutput(_)) => Err(e),
            Err(e) => {
                self.degraded(node, ctx, generative.name(), &e);
                return Analysis::degraded();
            }
        };

        parsed.unwrap_or_else(|e| {
            warn!(trace_id = %ctx.trace_id(), node_id = %node.id, error = %e, "Malformed analysis, using default");
            Analysis::default()
        })
    }

    async fn generate(&self, node: &NodeSpec, template: &str, ctx: &Context) -> String {
        let Some(generative) = &self.collaborators.generative else {
            self.degraded(node, ctx, "generative", &WeftError::ConfigurationMissing("generative".into()));
            return self.replies.not_configured.clone();
        };

        let prompt = interpolate(template, ctx);
        match self
            .guarded("generative", generative.complete(&prompt, CompletionMode::Text))
            .await
        {
            Ok(completion) => completion.into_text(),
            Err(e) => {
                self.degraded(node, ctx, generative.name(), &e);
                self.replies.generation_failed.clone()
            }
        }
    }

    fn route(
        &self,
        node: &NodeSpec,
        routes: &[RouteRule],
        ctx: &Context,
        definition: &WorkflowDefinition,
    ) -> Option<String> {
        let decision = select_route(routes, ctx, |target| definition.index_of(target).is_some());

        for diagnostic in decision.diagnostics {
            let event = match diagnostic {
                RuleDiagnostic::Failed { rule_index, error } => {
                    warn!(trace_id = %ctx.trace_id(), node_id = %node.id, rule_index, error = %error, "Route rule failed, treating as false");
                    WorkflowEvent::RuleEvaluationFailed {
                        trace_id: ctx.trace_id().clone(),
                        node_id: node.id.clone(),
                        rule_index,
                        error,
                    }
                }
                RuleDiagnostic::Dangling { rule_index, target } => {
                    warn!(trace_id = %ctx.trace_id(), node_id = %node.id, rule_index, target = %target, "Route target does not exist, skipping");
                    WorkflowEvent::DanglingRouteTarget {
                        trace_id: ctx.trace_id().clone(),
                        node_id: node.id.clone(),
                        target,
                    }
                }
            };
            self.event_bus.publish(event);
        }

        decision.target
    }

    fn submit_action(&self, action: &str, payload: &Value, ctx: &Context) {
        let payload = match payload {
            Value::String(template) => Value::String(interpolate(template, ctx)),
            other => other.clone(),
        };
        match &self.collaborators.actions {
            Some(sink) => sink.submit(ActionRequest::new(action, payload, ctx.trace_id().clone())),
            None => debug!(trace_id = %ctx.trace_id(), action, "No action sink, recording only"),
        }
    }

    /// Bound a collaborator call by the gateway timeout.
    async fn guarded<T>(&self, service: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::GatewayTimeout {
                service: service.to_string(),
                timeout_secs: self.gateway_timeout.as_secs(),
            }),
        }
    }

    fn degraded(&self, node: &NodeSpec, ctx: &Context, service: &str, reason: &WeftError) {
        match reason {
            WeftError::ConfigurationMissing(_) => {
                debug!(trace_id = %ctx.trace_id(), node_id = %node.id, service, "Collaborator not configured, using sentinel")
            }
            _ => {
                warn!(trace_id = %ctx.trace_id(), node_id = %node.id, service, error = %reason, "Collaborator failed, using sentinel")
            }
        }
        self.event_bus.publish(WorkflowEvent::GatewayDegraded {
            trace_id: ctx.trace_id().clone(),
            node_id: node.id.clone(),
            service: service.to_string(),
            reason: reason.to_string(),
        });
    }
}
