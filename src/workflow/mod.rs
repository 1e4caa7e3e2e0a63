//! The workflow engine: typed nodes, graph construction, execution, and
//! lifecycle management of standalone workflow runs.

pub mod definition;
pub mod executor;
pub mod graph;
pub mod manager;
pub mod node;
pub mod nodes;
pub mod port;

pub use definition::{ConnectionSpec, GraphDefinition, NodeSpec};
pub use executor::{NodeResults, WorkflowExecutor};
pub use graph::WorkflowGraph;
pub use manager::{TaskReport, WorkflowManager};
pub use node::{ExecutionEnv, JsonMap, NodeBehavior, NodeContext, NodeInstance, NodeSchema};
pub use port::{Port, ports_compatible};
