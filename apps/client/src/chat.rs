//! Career-advice chat: an append-only transcript plus a context snapshot
//! derived from the latest individual prediction.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{ClientError, ValidationError};
use crate::lifecycle::RequestSlot;
use crate::prediction::IndividualPrediction;
use crate::service::{Endpoint, PredictionTransport, ServiceRequest};

pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble connecting right now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    #[serde(rename = "role")]
    pub speaker: Speaker,
    #[serde(rename = "content")]
    pub text: String,
}

/// Ordered turns. Turns are only ever appended.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append_user_turn(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn {
            speaker: Speaker::User,
            text: text.into(),
        });
    }

    pub fn append_assistant_turn(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn {
            speaker: Speaker::Assistant,
            text: text.into(),
        });
    }
}

/// Small snapshot of the latest prediction, sent with every message.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DerivedContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl DerivedContext {
    pub fn from_prediction(prediction: &IndividualPrediction) -> Self {
        Self {
            profile_name: prediction.headline().map(String::from),
            roles: prediction
                .suggested_roles
                .as_ref()
                .filter(|roles| !roles.is_empty())
                .map(|roles| roles.join(", ")),
            confidence: prediction.confidence,
        }
    }
}

/// Body of one chat call: the new message, the full prior history, and the context.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundContext {
    pub message: String,
    pub history: Vec<ChatTurn>,
    pub context: DerivedContext,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    response: String,
}

#[derive(Default)]
struct ChatState {
    transcript: Transcript,
    context: DerivedContext,
}

impl ChatState {
    fn outbound(&self, message: &str) -> OutboundContext {
        OutboundContext {
            message: message.to_string(),
            history: self.transcript.turns().to_vec(),
            context: self.context.clone(),
        }
    }
}

/// Drives the chat. Every user turn gets exactly one assistant turn, real or fallback.
pub struct ChatSession {
    transport: Arc<dyn PredictionTransport>,
    state: Mutex<ChatState>,
    /// Held for a whole exchange so a reply always directly follows its user turn.
    exchange: tokio::sync::Mutex<()>,
    /// Lifecycle of the latest reply. A failed call settles here as `Failed`
    /// while the transcript records the fallback reply.
    pub reply: RequestSlot<String>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn PredictionTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ChatState::default()),
            exchange: tokio::sync::Mutex::new(()),
            reply: RequestSlot::new("chat"),
        }
    }

    pub fn transcript(&self) -> Vec<ChatTurn> {
        self.lock().transcript.turns().to_vec()
    }

    pub fn context(&self) -> DerivedContext {
        self.lock().context.clone()
    }

    /// Refreshes the context snapshot from a newly settled prediction.
    pub fn observe_prediction(&self, prediction: &IndividualPrediction) {
        self.lock().context = DerivedContext::from_prediction(prediction);
    }

    /// Builds the body for `message` against the history before it.
    pub fn build_outbound_context(&self, message: &str) -> OutboundContext {
        self.lock().outbound(message)
    }

    /// Sends one user message and returns the assistant's reply as recorded.
    ///
    /// Concurrent sends are taken one at a time, in call order.
    pub async fn send(&self, message: &str) -> Result<String, ClientError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let _exchange = self.exchange.lock().await;
        let body = {
            let mut state = self.lock();
            let body = serde_json::to_value(state.outbound(message))
                .map_err(|e| ClientError::Decode(format!("chat request: {e}")))?;
            state.transcript.append_user_turn(message);
            body
        };

        let ticket = self.reply.begin();
        let outcome = self
            .transport
            .send(&ServiceRequest::json(Endpoint::Chat, body))
            .await
            .and_then(parse_reply);
        let reply = match &outcome {
            Ok(reply) => {
                info!("Chat reply received ({} chars)", reply.len());
                reply.clone()
            }
            Err(e) => {
                warn!("Chat call failed: {e}");
                FALLBACK_REPLY.to_string()
            }
        };

        self.lock().transcript.append_assistant_turn(reply.clone());
        self.reply.settle(ticket, outcome);
        Ok(reply)
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_reply(body: Value) -> Result<String, ClientError> {
    serde_json::from_value::<ChatReply>(body)
        .map(|r| r.response)
        .map_err(|e| ClientError::Decode(format!("chat response: {e}")))
}
