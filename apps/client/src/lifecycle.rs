//! Request lifecycle: every service call for a section goes through one `RequestSlot`.
//!
//! State moves Idle -> Pending -> {Succeeded | Failed} per submission. Observers
//! subscribe to a `watch` channel instead of relying on re-render reactivity.
//! Only the most recently issued submission may settle the slot; earlier
//! responses that arrive late are dropped on arrival.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::ClientError;

/// A settled failure: the stable error code plus the message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: &'static str,
    pub message: String,
}

impl From<&ClientError> for Failure {
    fn from(e: &ClientError) -> Self {
        Self {
            code: e.code(),
            message: e.user_message(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestState<T> {
    Idle,
    Pending,
    Succeeded(T),
    Failed(Failure),
}

impl<T> RequestState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestState::Pending)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, RequestState::Succeeded(_) | RequestState::Failed(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            RequestState::Succeeded(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.failure().map(|f| f.message.as_str())
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RequestState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestState<U> {
        match self {
            RequestState::Idle => RequestState::Idle,
            RequestState::Pending => RequestState::Pending,
            RequestState::Succeeded(v) => RequestState::Succeeded(f(v)),
            RequestState::Failed(failure) => RequestState::Failed(failure),
        }
    }
}

/// What happens to the last successful value while a new submission is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetainPolicy {
    /// Drop the previous value as soon as a new submission starts.
    #[default]
    DiscardOnSubmit,
    /// Keep the previous value readable through `latest_value` until the new one settles.
    KeepUntilSettled,
}

/// Identifies one submission. Settling with a superseded ticket is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

pub struct RequestSlot<T> {
    name: &'static str,
    policy: RetainPolicy,
    sequence: AtomicU64,
    state: watch::Sender<RequestState<T>>,
    retained: Mutex<Option<T>>,
}

impl<T: Clone + Send + Sync> RequestSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_policy(name, RetainPolicy::default())
    }

    pub fn with_policy(name: &'static str, policy: RetainPolicy) -> Self {
        let (state, _) = watch::channel(RequestState::Idle);
        Self {
            name,
            policy,
            sequence: AtomicU64::new(0),
            state,
            retained: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> RequestState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
        self.state.subscribe()
    }

    /// The value a view should show right now.
    /// Falls back to the retained value while pending under `KeepUntilSettled`.
    pub fn latest_value(&self) -> Option<T> {
        if let Some(value) = self.state.borrow().value() {
            return Some(value.clone());
        }
        match self.policy {
            RetainPolicy::KeepUntilSettled => self.lock_retained().clone(),
            RetainPolicy::DiscardOnSubmit => None,
        }
    }

    /// Starts a submission: moves to Pending and clears any visible error.
    pub fn begin(&self) -> Ticket {
        let ticket = Ticket(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        let previous = self.state.send_replace(RequestState::Pending);

        let mut retained = self.lock_retained();
        match (self.policy, previous) {
            (RetainPolicy::KeepUntilSettled, RequestState::Succeeded(value)) => {
                *retained = Some(value);
            }
            (RetainPolicy::KeepUntilSettled, _) => {}
            (RetainPolicy::DiscardOnSubmit, _) => *retained = None,
        }

        debug!("[{}] submission {} pending", self.name, ticket.0);
        ticket
    }

    /// True while no newer submission has started since `ticket`.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.sequence.load(Ordering::SeqCst) == ticket.0
    }

    /// Applies an outcome if `ticket` is still the latest submission.
    /// Returns false when the outcome was stale and discarded.
    pub fn settle(&self, ticket: Ticket, outcome: Result<T, ClientError>) -> bool {
        if !self.is_current(ticket) {
            warn!(
                "[{}] discarding stale response for submission {}",
                self.name, ticket.0
            );
            return false;
        }

        let next = match outcome {
            Ok(value) => RequestState::Succeeded(value),
            Err(e) => {
                warn!("[{}] submission {} failed: {e}", self.name, ticket.0);
                RequestState::Failed(Failure::from(&e))
            }
        };
        *self.lock_retained() = None;
        self.state.send_replace(next);
        debug!("[{}] submission {} settled", self.name, ticket.0);
        true
    }

    /// Runs one submission to completion and returns the slot state afterwards.
    /// If a newer submission started meanwhile, the returned state is the newer one's.
    pub async fn submit<F>(&self, request: F) -> RequestState<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let ticket = self.begin();
        let outcome = request.await;
        self.settle(ticket, outcome);
        self.state()
    }

    /// Records a failure that never reached the network (client-side validation).
    /// Counts as its own submission, so any in-flight response becomes stale.
    pub fn reject(&self, error: ClientError) -> RequestState<T> {
        let ticket = self.begin();
        self.settle(ticket, Err(error));
        self.state()
    }

    /// Clears a visible error; a settled value or pending state is left alone.
    pub fn dismiss_error(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, RequestState::Failed(_)) {
                *state = RequestState::Idle;
                true
            } else {
                false
            }
        });
    }

    fn lock_retained(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        // The guarded value is a plain Option; a poisoned lock still holds a usable one.
        self.retained.lock().unwrap_or_else(|e| e.into_inner())
    }
}
