//! Outstanding JSON-RPC requests awaiting a response from a backend.
//!
//! Transports that deliver responses asynchronously (a stdout reader task, an
//! SSE event stream) register each outgoing request here and complete it when
//! a response with the matching id arrives.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use relay_core::JsonRpcResponse;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    waiting: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

/// Id allocator and completion table for one backend connection.
#[derive(Debug, Default)]
pub struct PendingRequests {
    state: Mutex<State>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocates the next request id and starts waiting for its response.
    ///
    /// # Errors
    ///
    /// Fails once the connection has been closed.
    pub fn register(self: &Arc<Self>) -> anyhow::Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            return Err(anyhow!("backend connection is closed"));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.waiting.insert(id, tx);
        drop(state);

        Ok(PendingCall {
            id,
            rx,
            owner: Arc::clone(self),
        })
    }

    /// Hands a response to whoever is waiting on its id.
    ///
    /// Returns `false` when nobody is waiting (unknown id, or the caller gave up).
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response_id(&response.id) else {
            return false;
        };
        let sender = self.state.lock().waiting.remove(&id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Marks the connection closed and wakes every waiter with an error.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiting.clear();
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ids are allocated as integers; some servers echo them back as strings.
fn response_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A registered request. Dropping it without a response deregisters the id.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<JsonRpcResponse>,
    owner: Arc<PendingRequests>,
}

impl PendingCall {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the matching response.
    ///
    /// # Errors
    ///
    /// Fails if the connection closes before the response arrives.
    pub async fn wait(mut self) -> anyhow::Result<JsonRpcResponse> {
        (&mut self.rx)
            .await
            .map_err(|_| anyhow!("backend connection closed before responding"))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.owner.state.lock().waiting.remove(&self.id);
    }
}
