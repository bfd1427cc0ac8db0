//! The workflow interpreter: context and path resolution, template
//! interpolation, route rules, node execution, and the run loop.

pub mod context;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod rules;
pub mod template;
pub mod transform;

pub use context::{Analysis, Context, LogEntry, LogStatus, NodeOutput, Path};
pub use definition::{DefinitionWarning, NodeKind, NodeSpec, WorkflowDefinition};
pub use engine::{transition, EngineBuilder, RunReport, RunState, WorkflowEngine};
pub use executor::{Collaborators, NodeExecutor, StepOutcome};
pub use rules::{select_route, Condition, Predicate, RouteDecision, RouteRule};
pub use template::interpolate;
pub use transform::{Transform, TransformRegistry};
