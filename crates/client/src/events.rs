//! Delivery event observation.
//!
//! A dispatch surfaces three kinds of observations: `sent` and `error`
//! entries (terminal, at most one `sent` per recipient) and `keychange`
//! prompts, which ask the registered handlers whether a rotated identity
//! key should be trusted. Handlers are awaited one at a time in
//! registration order; a failing `sent`/`error` handler is logged and never
//! blocks the handlers after it.

use futures::future::BoxFuture;
use std::future::Future;

use openrelay_wire::addrs::Address;

use crate::error::DispatchError;

/// Boxed error for observer callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Acknowledgement record for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEntry {
    pub addr: Address,
    /// The dispatch timestamp, identical across every retry.
    pub timestamp: u64,
}

/// Failure record for one recipient.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub addr: Address,
    /// Short phase tag naming the step that failed.
    pub reason: String,
    pub timestamp: u64,
    pub error: DispatchError,
}

/// Payload of a `keychange` prompt: the address whose identity rotated and
/// the newly fetched key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKeyChange {
    pub addr: Address,
    pub identity_key: Vec<u8>,
}

/// Verdict returned by a `keychange` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTrustDecision {
    /// Trust the new identity key and retry the session build.
    Accept,
    /// Keep the stored identity; the dispatch fails with an
    /// identity-changed error.
    Reject,
}

type SentHandler = Box<dyn Fn(SentEntry) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type ErrorHandler =
    Box<dyn Fn(ErrorEntry) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type KeyChangeHandler =
    Box<dyn Fn(IdentityKeyChange) -> BoxFuture<'static, KeyTrustDecision> + Send + Sync>;

/// Per-event handler lists, invoked sequentially in registration order.
#[derive(Default)]
pub(crate) struct Observers {
    sent: Vec<SentHandler>,
    error: Vec<ErrorHandler>,
    keychange: Vec<KeyChangeHandler>,
}

impl Observers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_sent<F, Fut>(&mut self, handler: F)
    where
        F: Fn(SentEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.sent.push(Box::new(move |entry| Box::pin(handler(entry))));
    }

    pub(crate) fn on_error<F, Fut>(&mut self, handler: F)
    where
        F: Fn(ErrorEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.error
            .push(Box::new(move |entry| Box::pin(handler(entry))));
    }

    pub(crate) fn on_keychange<F, Fut>(&mut self, handler: F)
    where
        F: Fn(IdentityKeyChange) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = KeyTrustDecision> + Send + 'static,
    {
        self.keychange
            .push(Box::new(move |change| Box::pin(handler(change))));
    }

    pub(crate) async fn emit_sent(&self, entry: &SentEntry) {
        for handler in &self.sent {
            if let Err(e) = handler(entry.clone()).await {
                tracing::warn!(addr = %entry.addr, error = %e, "sent handler failed");
            }
        }
    }

    pub(crate) async fn emit_error(&self, entry: &ErrorEntry) {
        for handler in &self.error {
            if let Err(e) = handler(entry.clone()).await {
                tracing::warn!(addr = %entry.addr, error = %e, "error handler failed");
            }
        }
    }

    /// Run every `keychange` handler; the change is accepted when any
    /// handler accepts it. With no handlers registered the change is
    /// rejected.
    pub(crate) async fn emit_keychange(&self, change: &IdentityKeyChange) -> KeyTrustDecision {
        let mut decision = KeyTrustDecision::Reject;
        for handler in &self.keychange {
            if handler(change.clone()).await == KeyTrustDecision::Accept {
                decision = KeyTrustDecision::Accept;
            }
        }
        decision
    }
}
