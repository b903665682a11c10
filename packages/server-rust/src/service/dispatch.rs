//! Operation execution: the innermost service of the dispatch pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use relay_core::{Implementation, InitializeResult, ListToolsResult};
use serde_json::{Map, Value};
use tower::Service;
use tracing::{debug, error, info};

use super::aggregate::{aggregate_tools, report_shadowed, resolve_tool};
use super::cache::ToolCache;
use super::operation::{Operation, OperationContext, OperationError, OperationResponse, Target};
use crate::backend::BackendHandle;

/// Name the relay reports in `serverInfo`.
pub const SERVER_NAME: &str = "mcp-relay";

// ---------------------------------------------------------------------------
// ToolService
// ---------------------------------------------------------------------------

/// Executes classified operations against the request's registry snapshot.
///
/// Cheap to clone; every clone shares the same catalog cache.
#[derive(Debug, Clone)]
pub struct ToolService {
    cache: Arc<ToolCache>,
}

impl ToolService {
    #[must_use]
    pub fn new(cache: Arc<ToolCache>) -> Self {
        Self { cache }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// Runs one operation to completion.
    ///
    /// # Errors
    ///
    /// Returns `OperationError` for unknown backends or tools, denied tools,
    /// and backend failures.
    pub async fn execute(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        match op {
            Operation::Initialize { .. } => Ok(OperationResponse::Initialized(
                InitializeResult::for_relay(Implementation {
                    name: SERVER_NAME.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }),
            )),
            Operation::Initialized { .. } => Ok(OperationResponse::Ack),
            Operation::ListTools { ctx } => self.list_tools(&ctx).await,
            Operation::CallTool {
                ctx,
                name,
                arguments,
            } => self.call_tool(&ctx, &name, arguments).await,
        }
    }

    async fn list_tools(&self, ctx: &OperationContext) -> Result<OperationResponse, OperationError> {
        let tools = match &ctx.target {
            Target::Backend(name) => {
                let backend = named_backend(ctx, name)?;
                self.cache
                    .get(backend)
                    .await
                    .map_err(|source| backend_error(backend, source))?
                    .to_vec()
            }
            Target::Aggregate => aggregate_tools(&ctx.snapshot, &self.cache).await.tools,
        };
        Ok(OperationResponse::Tools(ListToolsResult {
            tools,
            next_cursor: None,
        }))
    }

    async fn call_tool(
        &self,
        ctx: &OperationContext,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<OperationResponse, OperationError> {
        let backend = match &ctx.target {
            Target::Backend(name) => Arc::clone(named_backend(ctx, name)?),
            Target::Aggregate => resolve_tool(&ctx.snapshot, &self.cache, tool)
                .await
                .ok_or_else(|| OperationError::ToolNotFound {
                    name: tool.to_string(),
                })?,
        };

        if !backend.is_allowed(tool) {
            return Err(OperationError::ToolDenied {
                backend: backend.name().to_string(),
                name: tool.to_string(),
            });
        }

        info!(call_id = ctx.call_id, backend = backend.name(), tool, "calling tool");
        let result = backend
            .call_tool(tool, arguments)
            .await
            .map_err(|source| backend_error(&backend, source))?;

        if ctx.target == Target::Aggregate {
            report_shadowed(&ctx.snapshot, &self.cache, backend.name(), tool);
        }
        debug!(call_id = ctx.call_id, backend = backend.name(), tool, "tool call complete");
        Ok(OperationResponse::ToolResult(result))
    }
}

fn named_backend<'a>(ctx: &'a OperationContext, name: &str) -> Result<&'a Arc<BackendHandle>, OperationError> {
    ctx.snapshot
        .get(name)
        .ok_or_else(|| OperationError::UnknownBackend {
            name: name.to_string(),
        })
}

fn backend_error(backend: &BackendHandle, source: anyhow::Error) -> OperationError {
    error!(backend = backend.name(), error = %format!("{source:#}"), "backend call failed");
    OperationError::Backend {
        backend: backend.name().to_string(),
        source,
    }
}

impl Service<Operation> for ToolService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let svc = self.clone();
        Box::pin(async move { svc.execute(op).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::backend::ToolPolicy;
    use crate::service::registry::RegistrySnapshot;
    use crate::test_support::{snapshot_of, MockBackend};

    fn service() -> ToolService {
        ToolService::new(Arc::new(ToolCache::new(Duration::from_secs(60))))
    }

    fn ctx(target: Target, snapshot: &Arc<RegistrySnapshot>) -> OperationContext {
        OperationContext::new(1, json!(1), target, Arc::clone(snapshot), 5_000)
    }

    fn call(target: Target, snapshot: &Arc<RegistrySnapshot>, tool: &str) -> Operation {
        Operation::CallTool {
            ctx: ctx(target, snapshot),
            name: tool.to_string(),
            arguments: Map::new(),
        }
    }

    fn tool_names(resp: OperationResponse) -> Vec<String> {
        match resp {
            OperationResponse::Tools(list) => list.tools.into_iter().map(|t| t.name).collect(),
            other => panic!("expected tools, got {other:?}"),
        }
    }

    fn served_by(resp: OperationResponse) -> String {
        match resp {
            OperationResponse::ToolResult(value) => value["backend"].as_str().unwrap().to_string(),
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn initialize_and_initialized_need_no_backend() {
        let snapshot = Arc::new(RegistrySnapshot::empty());
        let svc = service();

        let init = svc
            .clone()
            .oneshot(Operation::Initialize {
                ctx: ctx(Target::Aggregate, &snapshot),
            })
            .await
            .unwrap()
            .into_value();
        assert_eq!(init["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(init["capabilities"], json!({"tools": {}}));

        let ack = svc
            .oneshot(Operation::Initialized {
                ctx: ctx(Target::Aggregate, &snapshot),
            })
            .await
            .unwrap();
        assert_eq!(ack.into_value(), json!({}));
    }

    #[tokio::test]
    async fn flat_scenario_list_and_route() {
        let (snapshot, mocks) = snapshot_of(&[("A", &["x"]), ("B", &["x", "y"])]);
        let snapshot = Arc::new(snapshot);
        let svc = service();

        let list = svc
            .clone()
            .oneshot(Operation::ListTools {
                ctx: ctx(Target::Aggregate, &snapshot),
            })
            .await
            .unwrap();
        assert_eq!(tool_names(list), vec!["x", "y"]);

        let x = svc.clone().oneshot(call(Target::Aggregate, &snapshot, "x")).await.unwrap();
        assert_eq!(served_by(x), "A");
        let y = svc.clone().oneshot(call(Target::Aggregate, &snapshot, "y")).await.unwrap();
        assert_eq!(served_by(y), "B");

        let z = svc.oneshot(call(Target::Aggregate, &snapshot, "z")).await.unwrap_err();
        assert!(matches!(z, OperationError::ToolNotFound { ref name } if name == "z"));

        assert_eq!(mocks[0].calls().len(), 1);
        assert_eq!(mocks[1].calls().len(), 1);
    }

    #[tokio::test]
    async fn split_mode_uses_only_the_named_backend() {
        let (snapshot, mocks) = snapshot_of(&[("A", &["x"]), ("B", &["x", "y"])]);
        let snapshot = Arc::new(snapshot);
        let svc = service();

        let list = svc
            .clone()
            .oneshot(Operation::ListTools {
                ctx: ctx(Target::Backend("B".to_string()), &snapshot),
            })
            .await
            .unwrap();
        assert_eq!(tool_names(list), vec!["x", "y"]);

        let resp = svc
            .oneshot(call(Target::Backend("B".to_string()), &snapshot, "y"))
            .await
            .unwrap();
        assert_eq!(served_by(resp), "B");
        assert_eq!(mocks[0].list_calls(), 0);
        assert!(mocks[0].calls().is_empty());
    }

    #[tokio::test]
    async fn split_mode_unknown_backend() {
        let (snapshot, _mocks) = snapshot_of(&[("A", &["x"])]);
        let snapshot = Arc::new(snapshot);
        let err = service()
            .oneshot(call(Target::Backend("nope".to_string()), &snapshot, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::UnknownBackend { .. }));
    }

    #[tokio::test]
    async fn denied_tool_is_rejected_before_invocation() {
        let mock = Arc::new(MockBackend::named("files", &["read", "rm"]));
        let handle = BackendHandle::new(
            "files",
            Arc::clone(&mock) as _,
            ToolPolicy {
                allow: vec![],
                deny: vec!["rm".to_string()],
            },
        );
        let snapshot = Arc::new(RegistrySnapshot::from_handles(vec![handle]));

        let err = service()
            .oneshot(call(Target::Backend("files".to_string()), &snapshot, "rm"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::ToolDenied { .. }));
        assert!(mock.calls().is_empty());

        // In flat mode the filtered catalog hides the tool entirely.
        let err = service()
            .oneshot(call(Target::Aggregate, &snapshot, "rm"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn backend_failure_becomes_backend_error() {
        let (snapshot, mocks) = snapshot_of(&[("A", &["x"])]);
        let snapshot = Arc::new(snapshot);
        let svc = service();
        // Prime the cache, then make the call itself fail.
        svc.clone()
            .oneshot(Operation::ListTools {
                ctx: ctx(Target::Aggregate, &snapshot),
            })
            .await
            .unwrap();
        mocks[0].set_failing(true);

        let err = svc.oneshot(call(Target::Aggregate, &snapshot, "x")).await.unwrap_err();
        match err {
            OperationError::Backend { backend, source } => {
                assert_eq!(backend, "A");
                assert!(source.to_string().contains("unavailable"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn split_list_failure_is_reported() {
        let (snapshot, mocks) = snapshot_of(&[("A", &["x"])]);
        mocks[0].set_failing(true);
        let snapshot = Arc::new(snapshot);
        let err = service()
            .oneshot(Operation::ListTools {
                ctx: ctx(Target::Backend("A".to_string()), &snapshot),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Backend { .. }));
    }

    #[tokio::test]
    async fn flat_list_with_all_backends_failing_is_empty_not_error() {
        let (snapshot, mocks) = snapshot_of(&[("A", &["x"])]);
        mocks[0].set_failing(true);
        let snapshot = Arc::new(snapshot);
        let list = service()
            .oneshot(Operation::ListTools {
                ctx: ctx(Target::Aggregate, &snapshot),
            })
            .await
            .unwrap();
        assert!(tool_names(list).is_empty());
    }
}
