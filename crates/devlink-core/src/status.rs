//! Serialized status tracking with change notifications.
//!
//! Both connections and devices own a status that changes along a fixed set of
//! edges and must tell interested parties about each change exactly once.
//! [`StatusCell`] implements that once for any status enum implementing
//! [`StatusKind`]:
//!
//! - transitions are serialized by an internal lock
//! - setting the current status again is a no-op and publishes nothing
//! - edges not allowed by [`StatusKind::can_transition_to`] are rejected
//! - every accepted change is broadcast as a [`StatusChange`]
//!
//! Subscribers get a `broadcast::Receiver` and unsubscribe by dropping it. A
//! subscriber that falls behind loses the oldest notifications rather than
//! blocking the owner.

use crate::constants::STATUS_CHANNEL_CAPACITY;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A status enum with a defined transition graph.
pub trait StatusKind: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Whether `self -> next` is an edge of the state machine.
    fn can_transition_to(self, next: Self) -> bool;
}

/// Notification published for every accepted status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange<S> {
    /// Status before the transition.
    pub old: S,

    /// Status after the transition.
    pub new: S,

    /// Optional human-readable reason.
    pub message: Option<String>,

    /// Description of the fault that caused the transition, if any.
    pub error: Option<String>,

    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

/// Thread-safe holder of a status value.
pub struct StatusCell<S: StatusKind> {
    object: String,
    current: Mutex<S>,
    sender: broadcast::Sender<StatusChange<S>>,
}

impl<S: StatusKind> fmt::Debug for StatusCell<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusCell")
            .field("object", &self.object)
            .field("current", &self.get())
            .finish()
    }
}

impl<S: StatusKind> StatusCell<S> {
    /// Create a cell with an initial status. `object` names the owner in
    /// errors and log lines.
    pub fn new(initial: S, object: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            object: object.into(),
            current: Mutex::new(initial),
            sender,
        }
    }

    /// Current status.
    pub fn get(&self) -> S {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Name of the owning object.
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Subscribe to future transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange<S>> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Move to `next`.
    ///
    /// Returns `Ok(true)` when the status changed and a notification was
    /// published, `Ok(false)` when `next` equals the current status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the edge is not allowed; the status
    /// is left unchanged.
    pub fn transition(&self, next: S, message: Option<String>) -> Result<bool> {
        self.apply(next, message, None)
    }

    /// Move to `next`, attaching the fault that caused the transition.
    pub fn transition_with_error(&self, next: S, message: Option<String>, error: &Error) -> Result<bool> {
        self.apply(next, message, Some(error.to_string()))
    }

    /// Move to `next` if allowed, logging instead of failing on an invalid edge.
    ///
    /// Used on teardown and fault paths where the caller already has an error
    /// to report and must not replace it with a state error.
    pub fn settle(&self, next: S, message: Option<String>, error: Option<&Error>) -> bool {
        match self.apply(next, message, error.map(ToString::to_string)) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(object = %self.object, error = %e, "Ignoring invalid status transition");
                false
            }
        }
    }

    /// Move to `next` only if the current status is `expected`.
    ///
    /// Returns the actual status on mismatch; nothing is published in that case.
    pub fn compare_and_transition(
        &self,
        expected: S,
        next: S,
        message: Option<String>,
        error: Option<&Error>,
    ) -> std::result::Result<(), S> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if *current != expected {
            return Err(*current);
        }
        self.publish(current, next, message, error.map(ToString::to_string))
            .map(|_| ())
            .map_err(|_| expected)
    }

    fn apply(&self, next: S, message: Option<String>, error: Option<String>) -> Result<bool> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        self.publish(current, next, message, error)
    }

    fn publish(
        &self,
        mut current: MutexGuard<'_, S>,
        next: S,
        message: Option<String>,
        error: Option<String>,
    ) -> Result<bool> {
        let old = *current;

        if old == next {
            return Ok(false);
        }

        if !old.can_transition_to(next) {
            return Err(Error::invalid_state(
                self.object.clone(),
                format!("transition to {next}"),
                old,
            ));
        }

        *current = next;
        debug!(object = %self.object, from = %old, to = %next, "Status changed");

        // Published while holding the lock so subscribers observe transitions
        // in the order they happened.
        let _ = self.sender.send(StatusChange {
            old,
            new: next,
            message,
            error,
            timestamp: Utc::now(),
        });

        Ok(true)
    }
}
