use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde_json::{Value, json};
use tracing::{debug, warn};

use parley_chat::SignalError;
use parley_protocol::{
    CallActionPayload, CallAnswer, CallRecord, CallSignal, SendMessagePayload, events,
};
use parley_registry::ConnectionHandle;

use crate::state::GatewayState;

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every event handler.
pub struct EventContext {
    pub event: String,
    pub data: Value,
    /// The connection the event arrived on; error notifications go here.
    pub handle: Arc<dyn ConnectionHandle>,
    pub state: Arc<GatewayState>,
}

impl EventContext {
    fn identity(&self) -> parley_protocol::UserId {
        self.handle.identity()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed payload: {0}")]
    BadPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Signal(#[from] SignalError),
}

type HandlerResult = Result<(), EventError>;

/// A boxed async event handler.
pub type HandlerFn = Box<
    dyn Fn(EventContext) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync,
>;

// ── Event registry ───────────────────────────────────────────────────────────

/// Routes each inbound named event to exactly one handler. Holds no state of
/// its own; one instance serves every connection.
pub struct EventRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register_defaults();
        reg
    }

    pub fn register(&mut self, event: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(event.into(), handler);
    }

    /// Dispatch one inbound event. A failed operation never tears down the
    /// connection: the acting party gets an error notification and the loop
    /// keeps reading.
    pub async fn dispatch(&self, ctx: EventContext) {
        let event = ctx.event.clone();
        let identity = ctx.identity();
        let handle = Arc::clone(&ctx.handle);

        let Some(handler) = self.handlers.get(&event) else {
            warn!(event, identity, "unknown event");
            handle.send(
                events::ERROR,
                json!({ "message": format!("unknown event: {event}") }),
            );
            return;
        };

        debug!(event, identity, "dispatching event");
        match handler(ctx).await {
            Ok(()) => {}
            Err(EventError::BadPayload(err)) => {
                warn!(event, identity, error = %err, "malformed event payload");
                handle.send(events::ERROR, json!({ "message": "malformed payload" }));
            }
            Err(EventError::Signal(err)) => {
                warn!(event, identity, error = %err, "operation failed");
                handle.send(events::ERROR, json!({ "message": "operation failed" }));
            }
        }
    }

    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn register_defaults(&mut self) {
        // message.send
        self.register(
            events::MESSAGE_SEND,
            Box::new(|ctx| {
                Box::pin(async move {
                    let payload: SendMessagePayload = serde_json::from_value(ctx.data.clone())?;
                    let body = payload.message.unwrap_or_default();
                    ctx.state
                        .relay
                        .send(ctx.identity(), payload.receiver_id, &body)
                        .await?;
                    Ok(())
                })
            }),
        );

        // call.request.send
        self.register(
            events::CALL_REQUEST_SEND,
            Box::new(|ctx| {
                Box::pin(async move {
                    let payload: SendMessagePayload = serde_json::from_value(ctx.data.clone())?;
                    ctx.state
                        .calls
                        .request(ctx.identity(), payload.receiver_id)
                        .await?;
                    Ok(())
                })
            }),
        );

        // call.request.accept
        self.register(
            events::CALL_REQUEST_ACCEPT,
            Box::new(|ctx| {
                Box::pin(async move {
                    let payload: CallActionPayload = serde_json::from_value(ctx.data.clone())?;
                    let media = payload.peer_id.unwrap_or_default();
                    let result = ctx
                        .state
                        .calls
                        .accept(ctx.identity(), payload.call_id, &media)
                        .await;
                    answer_rejection(&ctx, result)
                })
            }),
        );

        // call.request.refuse
        self.register(
            events::CALL_REQUEST_REFUSE,
            Box::new(|ctx| {
                Box::pin(async move {
                    let payload: CallActionPayload = serde_json::from_value(ctx.data.clone())?;
                    let result = ctx
                        .state
                        .calls
                        .refuse(ctx.identity(), payload.call_id)
                        .await;
                    answer_rejection(&ctx, result)
                })
            }),
        );

        // call.close
        self.register(
            events::CALL_CLOSE,
            Box::new(|ctx| {
                Box::pin(async move {
                    let payload: CallActionPayload = serde_json::from_value(ctx.data.clone())?;
                    let result = ctx.state.calls.close(ctx.identity(), payload.call_id).await;
                    match result {
                        Err(SignalError::Rejected(reason)) => {
                            debug!(identity = ctx.identity(), reason, "call close rejected");
                            ctx.handle.send(
                                events::CALL_RECEIVE,
                                serde_json::to_value(CallSignal::error()).unwrap_or_default(),
                            );
                            Ok(())
                        }
                        other => other.map(|_| ()).map_err(EventError::from),
                    }
                })
            }),
        );
    }
}

/// Turn a guard rejection into the single-recipient `call.answer.receive`
/// error notification; anything else propagates.
fn answer_rejection(
    ctx: &EventContext,
    result: Result<CallRecord, SignalError>,
) -> HandlerResult {
    match result {
        Ok(_) => Ok(()),
        Err(SignalError::Rejected(reason)) => {
            debug!(identity = ctx.identity(), reason, "call operation rejected");
            ctx.handle.send(
                events::CALL_ANSWER_RECEIVE,
                serde_json::to_value(CallAnswer::error(None)).unwrap_or_default(),
            );
            Ok(())
        }
        Err(other) => Err(other.into()),
    }
}
