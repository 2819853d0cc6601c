//! Service transport, the single point of contact with the remote prediction service.
//!
//! Every section reaches the network through a `PredictionTransport`; nothing
//! else builds URLs or talks HTTP. There is no automatic retry: a failed call
//! settles as failed and the caller re-submits.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::UploadForm;
use crate::config::Config;
use crate::errors::{ClientError, GENERIC_FAILURE_MESSAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Health,
    ComputeScore,
    BatchPredict,
    BatchCompare,
    MultiYear,
    IndividualPredict,
    Chat,
}

/// How a 2xx body proves the call actually succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessIndicator {
    /// A truthy boolean field, e.g. `success: true`.
    Flag(&'static str),
    /// Any one of these fields present and non-null.
    AnyField(&'static [&'static str]),
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Health => "/health",
            Endpoint::ComputeScore => "/calculate/api",
            Endpoint::BatchPredict => "/predict/batch",
            Endpoint::BatchCompare => "/predict/batch-compare",
            Endpoint::MultiYear => "/predict/multi-year",
            Endpoint::IndividualPredict => "/predict/individual",
            Endpoint::Chat => "/chat",
        }
    }

    pub fn success_indicator(&self) -> SuccessIndicator {
        match self {
            Endpoint::Health => SuccessIndicator::AnyField(&["status"]),
            Endpoint::ComputeScore => SuccessIndicator::AnyField(&["total_score"]),
            Endpoint::BatchPredict | Endpoint::BatchCompare | Endpoint::MultiYear => {
                SuccessIndicator::Flag("success")
            }
            Endpoint::IndividualPredict => {
                SuccessIndicator::AnyField(&["prediction", "profile_name"])
            }
            Endpoint::Chat => SuccessIndicator::AnyField(&["response"]),
        }
    }

    fn is_chat(&self) -> bool {
        matches!(self, Endpoint::Chat)
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Json(Value),
    Multipart(UploadForm),
}

/// A fully-formed call: where it goes and what it carries.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub endpoint: Endpoint,
    pub payload: Payload,
}

impl ServiceRequest {
    pub fn get(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            payload: Payload::Empty,
        }
    }

    pub fn json(endpoint: Endpoint, body: Value) -> Self {
        Self {
            endpoint,
            payload: Payload::Json(body),
        }
    }

    pub fn multipart(endpoint: Endpoint, form: UploadForm) -> Self {
        Self {
            endpoint,
            payload: Payload::Multipart(form),
        }
    }
}

/// The transport seam. Sections hold an `Arc<dyn PredictionTransport>`.
#[async_trait]
pub trait PredictionTransport: Send + Sync {
    /// Sends one request and returns the body of a successful response.
    /// Transport failures and application-level failures both come back as `Err`.
    async fn send(&self, request: &ServiceRequest) -> Result<Value, ClientError>;
}

/// reqwest-backed transport talking to the configured base URLs.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    api_url: String,
    chat_url: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Ok(Self {
            client: Client::builder().timeout(config.timeout).build()?,
            api_url: config.api_url.clone(),
            chat_url: config.chat_url.clone(),
        })
    }

    fn url_for(&self, endpoint: Endpoint) -> String {
        let base = if endpoint.is_chat() {
            &self.chat_url
        } else {
            &self.api_url
        };
        format!("{}{}", base, endpoint.path())
    }
}

#[async_trait]
impl PredictionTransport for HttpTransport {
    async fn send(&self, request: &ServiceRequest) -> Result<Value, ClientError> {
        let url = self.url_for(request.endpoint);
        let builder = match &request.payload {
            Payload::Empty => self.client.get(&url),
            Payload::Json(body) => self.client.post(&url).json(body),
            Payload::Multipart(form) => {
                debug!("Uploading slots {:?} to {url}", form.slot_names());
                self.client.post(&url).multipart(form.to_multipart()?)
            }
        };

        info!("Calling {url}");
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let body = serde_json::from_str::<Value>(&text).ok();
        if !status.is_success() {
            warn!("{url} returned {status}");
            return Err(match body.as_ref().and_then(error_message) {
                Some(message) => ClientError::Application(message),
                None => ClientError::Transport(format!("{url} returned {status}")),
            });
        }

        let body = body.ok_or_else(|| {
            ClientError::Transport(format!("{url} returned a body that is not JSON"))
        })?;
        debug!("{url} answered with {} bytes", text.len());
        check_body(request.endpoint, body)
    }
}

/// Applies the application-level success rules to a 2xx body.
pub fn check_body(endpoint: Endpoint, body: Value) -> Result<Value, ClientError> {
    if let Some(message) = error_message(&body) {
        return Err(ClientError::Application(message));
    }
    let ok = match endpoint.success_indicator() {
        SuccessIndicator::Flag(field) => body.get(field).is_some_and(is_truthy),
        SuccessIndicator::AnyField(fields) => fields
            .iter()
            .any(|f| body.get(*f).is_some_and(|v| !v.is_null())),
    };
    if ok {
        Ok(body)
    } else {
        warn!("{} response lacked its success indicator", endpoint.path());
        Err(ClientError::Application(GENERIC_FAILURE_MESSAGE.to_string()))
    }
}

/// Pulls the service's `error` message out of a body, if it has one.
fn error_message(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("message")
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}
