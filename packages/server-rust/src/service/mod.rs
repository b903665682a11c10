//! Request classification and execution.
//!
//! This module implements the relay's operation pipeline:
//!
//! 1. **Classification** (`classify`): request body -> `Result<Operation, ClassifyError>`
//! 2. **Middleware** (`middleware`): Tower layers (metrics, timeout)
//! 3. **Execution** (`dispatch`): `ToolService` answers from the registry snapshot
//! 4. **Aggregation** (`aggregate`): flat-mode catalog merge and tool routing
//! 5. **Catalog cache** (`cache`): per-backend tool lists with a TTL
//! 6. **Registry** (`registry`): the installed, read-only set of backends

pub mod aggregate;
pub mod cache;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod middleware;
pub mod operation;
pub mod registry;

// Re-export key types for convenient access.
pub use aggregate::{aggregate_tools, resolve_tool, Aggregation};
pub use cache::ToolCache;
pub use classify::OperationClassifier;
pub use config::{AddressingMode, ServiceConfig};
pub use dispatch::{ToolService, SERVER_NAME};
pub use middleware::{build_operation_pipeline, OperationPipeline};
pub use operation::{
    ClassifyError, Operation, OperationContext, OperationError, OperationResponse, Target,
};
pub use registry::{BackendRegistry, RegistryInstaller, RegistrySnapshot};
