//! switchyard: an agent orchestration service executing graph-structured
//! generation workflows.
//!
//! Jobs arrive over HTTP, are preprocessed into a model's workflow
//! template, and run as DAGs of typed nodes. Nodes that call asynchronous
//! remote services suspend on the callback coordinator until the service
//! delivers its webhook; job completion is reported to the caller's
//! webhook URL.

pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod limits;
pub mod registry;
pub mod server;
pub mod storage;
pub mod workflow;

pub use callback::CallbackCoordinator;
pub use client::ServiceClient;
pub use config::Settings;
pub use jobs::{JobManager, ModelCatalog};
pub use registry::NodeRegistry;
pub use storage::FileStore;
pub use workflow::{WorkflowExecutor, WorkflowGraph, WorkflowManager};
