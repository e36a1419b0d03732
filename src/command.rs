//! Command grammar and dispatch.
//!
//! Request bodies are `OP=...`:
//!
//! - `QUERY=` lists every known tag name, comma-joined;
//! - `READ=<tag>` returns one tag's value;
//! - `WRITE=<tag>:<value>[,<tag>:<value>,...]` applies pairs left-to-right
//!   (trailing comma tolerated).
//!
//! Anything else, or a body without `=`, is an `ERR`. Callers only ever see
//! `ACK=`/`ERR=` replies; connection churn behind the store is observable
//! only as stale values.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::tag::TagValue;
use crate::store::TagStore;
use crate::transport::request::RequestHandler;
use crate::writeback::WriteBackRoute;

/// Dispatches command requests against the tag store and fans applied
/// writes out to the write-back encoder and the device write queue.
pub struct CommandDispatcher {
    store: Arc<TagStore>,
    writeback: Option<WriteBackRoute>,
    device_writes: Option<mpsc::Sender<Vec<(String, TagValue)>>>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<TagStore>) -> Self {
        Self {
            store,
            writeback: None,
            device_writes: None,
        }
    }

    /// Route applied writes to the write-back encoder.
    #[must_use]
    pub fn with_write_back(mut self, route: WriteBackRoute) -> Self {
        self.writeback = Some(route);
        self
    }

    /// Route applied writes to a device writer (Modbus poller).
    #[must_use]
    pub fn with_device_writes(mut self, tx: mpsc::Sender<Vec<(String, TagValue)>>) -> Self {
        self.device_writes = Some(tx);
        self
    }

    /// Dispatch one request body to a reply.
    pub async fn dispatch(&self, request: &str) -> String {
        let Some((op, body)) = request.split_once('=') else {
            return "ERR=Malformed request".to_string();
        };

        match op {
            "QUERY" => format!("ACK={}", self.store.names().join(",")),
            "READ" => match self.store.get(body.trim()) {
                Some(value) => format!("ACK={}", value),
                None => "ERR=Tag not found".to_string(),
            },
            "WRITE" => self.write(body).await,
            other => format!("ERR=Unknown operation: {}", other),
        }
    }

    async fn write(&self, body: &str) -> String {
        let mut pairs = Vec::new();
        for token in body.split(',').filter(|t| !t.is_empty()) {
            let Some((name, value)) = token.split_once(':') else {
                return format!("ERR=Malformed pair: {}", token);
            };
            pairs.push((name.trim().to_string(), value.trim().to_string()));
        }
        if pairs.is_empty() {
            return "ERR=Empty write".to_string();
        }

        let outcome = self.store.write_raw(&pairs);

        // Pairs applied before a failure have changed node state and must
        // still reach the devices.
        if !outcome.applied.is_empty() {
            self.fan_out(&outcome.applied).await;
        }

        match outcome.error {
            None => "ACK=".to_string(),
            Some(err) => format!("ERR={}", err),
        }
    }

    async fn fan_out(&self, applied: &[(String, TagValue)]) {
        if let Some(route) = &self.writeback {
            route.apply(applied).await;
        }
        if let Some(tx) = &self.device_writes {
            if tx.try_send(applied.to_vec()).is_err() {
                warn!(count = applied.len(), "device write queue full, dropping writes");
            }
        }
    }
}

#[async_trait]
impl RequestHandler for CommandDispatcher {
    async fn handle(&self, request: &str) -> String {
        self.dispatch(request).await
    }
}
