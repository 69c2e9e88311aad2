//! Handler surface: the only contract between the pump and untrusted code.
//!
//! A handler observes its typed payload and a [`HandlerMetadata`] captured in
//! trusted scope, and returns a [`HandlerResponse`] (or nothing, terminating
//! the branch). Envelope identity, thread identity, and chain state are
//! injected by the pump and never read back from handler output.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::budget::TokenBudget;
use crate::descriptor::PayloadRecord;
use crate::error::HandlerError;

/// Target name a handler may use to iterate on itself.
pub const SELF_TARGET: &str = "self";

/// A validated payload as delivered to a handler.
#[derive(Debug, Clone)]
pub struct Payload {
    /// Root element name the payload arrived under. Core diagnostics arrive
    /// as `huh` or `SystemError`; capability payloads use derived root tags.
    pub root_tag: String,
    pub record: PayloadRecord,
}

impl Payload {
    pub fn new(root_tag: impl Into<String>, record: PayloadRecord) -> Self {
        Self {
            root_tag: root_tag.into(),
            record,
        }
    }
}

/// What a handler asks the pump to do next.
#[derive(Debug, Clone)]
pub enum HandlerResponse {
    /// Extend the chain toward a declared peer (or `self`) with a new payload.
    Forward { payload: PayloadRecord, to: String },
    /// Pop this handler off the chain and deliver the payload to the caller.
    Respond { payload: PayloadRecord },
}

impl HandlerResponse {
    pub fn forward(payload: PayloadRecord, to: impl Into<String>) -> Self {
        Self::Forward {
            payload,
            to: to.into(),
        }
    }

    pub fn respond(payload: PayloadRecord) -> Self {
        Self::Respond { payload }
    }
}

/// Out-of-band usage reporting handle.
///
/// Clonable, write-only: a handler can decrement its thread's token budget
/// but cannot read chain state through it.
#[derive(Debug, Clone)]
pub struct UsageMeter {
    budget: Arc<TokenBudget>,
}

impl UsageMeter {
    pub fn new(budget: Arc<TokenBudget>) -> Self {
        Self { budget }
    }

    /// A meter backed by a fresh unlimited budget, for handlers under test.
    pub fn detached() -> Self {
        Self {
            budget: Arc::new(TokenBudget::new(u64::MAX)),
        }
    }

    /// Report tokens consumed on behalf of this thread.
    pub fn record(&self, tokens: u64) {
        self.budget.record(tokens);
    }
}

/// Trustworthy context captured by the pump before handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    /// Opaque thread identifier for this hop.
    pub thread_id: Uuid,
    /// Name of the immediate sender.
    pub from_id: String,
    /// The listener's own name; populated only for agents.
    pub own_name: Option<String>,
    /// True when the chain tail equals the sender (self-iteration).
    pub is_self_call: bool,
    /// Pre-built prompt fragments for this listener's declared peers.
    pub usage_instructions: Arc<str>,
    /// Token-usage side channel.
    pub usage: UsageMeter,
}

/// An asynchronous capability handler.
///
/// Treated as adversarial by the pump: invoked under a timeout and a
/// cancellation token, with every error and panic contained at the dispatch
/// boundary.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        payload: Payload,
        meta: HandlerMetadata,
    ) -> Result<Option<HandlerResponse>, HandlerError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Payload, HandlerMetadata) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<HandlerResponse>, HandlerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Convenience: wrap into the `Arc<dyn Handler>` the registry expects.
    pub fn shared(f: F) -> Arc<dyn Handler>
    where
        F: 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Payload, HandlerMetadata) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<HandlerResponse>, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        payload: Payload,
        meta: HandlerMetadata,
    ) -> Result<Option<HandlerResponse>, HandlerError> {
        (self.f)(payload, meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_meta() -> HandlerMetadata {
        HandlerMetadata {
            thread_id: Uuid::new_v4(),
            from_id: "console".to_string(),
            own_name: None,
            is_self_call: false,
            usage_instructions: Arc::from(""),
            usage: UsageMeter::detached(),
        }
    }

    #[tokio::test]
    async fn test_fn_handler_forwards_payload() {
        let handler = FnHandler::new(|payload: Payload, _meta| async move {
            Ok(Some(HandlerResponse::respond(payload.record)))
        });
        let record = PayloadRecord::new("Echo").with("text", "hi");
        let result = handler
            .handle(Payload::new("echo.echo", record.clone()), make_meta())
            .await
            .unwrap();
        match result {
            Some(HandlerResponse::Respond { payload }) => assert_eq!(payload, record),
            other => panic!("expected Respond, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fn_handler_terminate() {
        let handler = FnHandler::new(|_payload, _meta| async move { Ok(None) });
        let result = handler
            .handle(
                Payload::new("x.y", PayloadRecord::new("Y")),
                make_meta(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_usage_meter_decrements_budget() {
        let budget = Arc::new(TokenBudget::new(100));
        let meter = UsageMeter::new(budget.clone());
        meter.record(30);
        meter.clone().record(30);
        assert_eq!(budget.used(), 60);
    }
}
