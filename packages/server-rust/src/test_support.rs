//! Scriptable in-memory backend for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::Tool;
use serde_json::{json, Map, Value};

use crate::backend::{BackendHandle, ToolPolicy};
use crate::network::{AppState, ShutdownController};
use crate::service::{
    build_operation_pipeline, BackendRegistry, OperationClassifier, RegistryInstaller,
    RegistrySnapshot, ServiceConfig, ToolCache, ToolService,
};
use crate::traits::BackendClient;

pub(crate) struct MockBackend {
    label: String,
    tools: Mutex<Vec<Tool>>,
    failing: AtomicBool,
    list_calls: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
    call_delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    pub(crate) fn with_tools(names: &[&str]) -> Self {
        Self::named("mock", names)
    }

    /// `label` is echoed in every call result so tests can tell which
    /// backend served a call.
    pub(crate) fn named(label: &str, names: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            tools: Mutex::new(tools(names)),
            failing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            call_delay: Mutex::new(None),
        }
    }

    pub(crate) fn set_tools(&self, names: &[&str]) {
        *self.tools.lock() = tools(names);
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock() = Some(delay);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

fn tools(names: &[&str]) -> Vec<Tool> {
    names
        .iter()
        .map(|name| Tool::new(*name).with_description(format!("{name} tool")))
        .collect()
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn list_tools(&self) -> anyhow::Result<Vec<Tool>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("{} is unavailable", self.label));
        }
        Ok(self.tools.lock().clone())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<Value> {
        let delay = *self.call_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("{} is unavailable", self.label));
        }
        let arguments = Value::Object(arguments);
        self.calls.lock().push((name.to_string(), arguments.clone()));
        Ok(json!({
            "backend": self.label,
            "tool": name,
            "arguments": arguments,
        }))
    }
}

/// Builds a snapshot from `(backend name, tool names)` pairs. Each mock is
/// labelled with its backend name.
pub(crate) fn snapshot_of(
    backends: &[(&str, &[&str])],
) -> (RegistrySnapshot, Vec<Arc<MockBackend>>) {
    let mut mocks = Vec::new();
    let handles = backends
        .iter()
        .map(|(name, tool_names)| {
            let mock = Arc::new(MockBackend::named(name, tool_names));
            mocks.push(Arc::clone(&mock));
            BackendHandle::new(*name, mock, ToolPolicy::default())
        })
        .collect();
    (RegistrySnapshot::from_handles(handles), mocks)
}

/// App state over a registry that has not been installed yet, with the
/// front-end still `Starting`.
pub(crate) fn test_state() -> (AppState, RegistryInstaller) {
    let (registry, installer) = BackendRegistry::new();
    let config = ServiceConfig::default();
    let state = AppState {
        registry,
        classifier: Arc::new(OperationClassifier::new(&config)),
        pipeline: build_operation_pipeline(ToolService::new(Arc::new(ToolCache::new(
            Duration::from_millis(config.cache_ttl_ms),
        )))),
        shutdown: Arc::new(ShutdownController::new()),
        start_time: Instant::now(),
    };
    (state, installer)
}

/// App state serving the given mock backends.
pub(crate) fn state_with(backends: &[(&str, &[&str])]) -> (AppState, Vec<Arc<MockBackend>>) {
    let (state, installer) = test_state();
    let (snapshot, mocks) = snapshot_of(backends);
    installer.install(snapshot);
    state.shutdown.set_ready();
    (state, mocks)
}
