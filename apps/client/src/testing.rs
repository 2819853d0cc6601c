//! In-process transports for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::ClientError;
use crate::service::{check_body, Endpoint, Payload, PredictionTransport, ServiceRequest};

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub endpoint: Endpoint,
    pub json: Option<Value>,
    pub slots: Vec<String>,
}

/// Answers each call with the next scripted body, run through the same
/// success rules the HTTP transport applies.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<Value, ClientError>>>,
    pub seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<Value, ClientError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PredictionTransport for ScriptedTransport {
    async fn send(&self, request: &ServiceRequest) -> Result<Value, ClientError> {
        self.seen.lock().unwrap().push(describe(request));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Transport("script exhausted".to_string())));
        check_body(request.endpoint, reply?)
    }
}

/// Each call parks until the test releases it, so arrival order is under test control.
#[derive(Default)]
pub struct GatedTransport {
    gates: Mutex<VecDeque<oneshot::Receiver<Value>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl GatedTransport {
    /// Returns the transport and one release handle per expected call, in call order.
    pub fn new(calls: usize) -> (Arc<Self>, Vec<oneshot::Sender<Value>>) {
        let (senders, receivers): (Vec<_>, VecDeque<_>) =
            (0..calls).map(|_| oneshot::channel()).unzip();
        (
            Arc::new(Self {
                gates: Mutex::new(receivers),
                seen: Mutex::new(Vec::new()),
            }),
            senders,
        )
    }

    pub fn calls(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PredictionTransport for GatedTransport {
    async fn send(&self, request: &ServiceRequest) -> Result<Value, ClientError> {
        self.seen.lock().unwrap().push(describe(request));
        let gate = self.gates.lock().unwrap().pop_front();
        let Some(gate) = gate else {
            return Err(ClientError::Transport("no gate left".to_string()));
        };
        let body = gate
            .await
            .map_err(|_| ClientError::Transport("gate dropped".to_string()))?;
        check_body(request.endpoint, body)
    }
}

fn describe(request: &ServiceRequest) -> SeenRequest {
    let (json, slots) = match &request.payload {
        Payload::Empty => (None, Vec::new()),
        Payload::Json(body) => (Some(body.clone()), Vec::new()),
        Payload::Multipart(form) => (
            None,
            form.slot_names().into_iter().map(String::from).collect(),
        ),
    };
    SeenRequest {
        endpoint: request.endpoint,
        json,
        slots,
    }
}
