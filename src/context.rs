//! Invocation context and handler model
//!
//! An `InvokeContext` carries everything one handler invocation needs: the
//! inbound message and its headers, the handler that will run (a plain
//! handler or an active saga instance), a typed extension store shared by
//! pipeline behaviors, and the buffer of messages the handler emits.

use crate::error::Result;
use crate::headers;
use crate::types::MessageIntent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// An inbound message body with its type name
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Fully qualified message type name
    pub message_type: String,

    /// Message body as JSON
    pub body: serde_json::Value,
}

impl IncomingMessage {
    /// Wrap a typed message, recording its Rust type name
    pub fn new<M: Serialize>(message: &M) -> Result<Self> {
        Ok(Self {
            message_type: std::any::type_name::<M>().to_string(),
            body: serde_json::to_value(message)?,
        })
    }

    /// Wrap an already-encoded body
    pub fn from_json(message_type: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            body,
        }
    }

    /// Decode the body into a concrete message type
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// A message emitted by a handler, waiting for dispatch by the host
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Id assigned at creation
    pub message_id: String,

    /// Fully qualified message type name
    pub message_type: String,

    /// Message body as JSON
    pub body: serde_json::Value,

    /// Delivery intent
    pub intent: MessageIntent,

    /// Explicit destination, `None` for publishes and local sends
    pub destination: Option<String>,

    /// When the handler emitted the message
    pub time_sent: DateTime<Utc>,

    /// Outgoing headers
    pub headers: HashMap<String, String>,
}

/// Handle passed to handler bodies for emitting messages
#[derive(Debug, Default)]
pub struct HandlerContext {
    reply_to: Option<String>,
    outgoing: Vec<OutgoingMessage>,
}

impl HandlerContext {
    /// Create a handler context that replies to `reply_to`
    pub fn new(reply_to: Option<String>) -> Self {
        Self {
            reply_to,
            outgoing: Vec::new(),
        }
    }

    /// Send a message to an explicit destination
    pub fn send<M: Serialize>(&mut self, destination: &str, message: &M) -> Result<String> {
        self.push(message, MessageIntent::Send, Some(destination.to_string()))
    }

    /// Send a message to the local endpoint
    pub fn send_local<M: Serialize>(&mut self, message: &M) -> Result<String> {
        self.push(message, MessageIntent::Send, None)
    }

    /// Publish a message to all subscribers
    pub fn publish<M: Serialize>(&mut self, message: &M) -> Result<String> {
        self.push(message, MessageIntent::Publish, None)
    }

    /// Reply to the sender of the current message
    pub fn reply<M: Serialize>(&mut self, message: &M) -> Result<String> {
        let destination = self.reply_to.clone();
        self.push(message, MessageIntent::Reply, destination)
    }

    /// Messages emitted so far
    pub fn outgoing(&self) -> &[OutgoingMessage] {
        &self.outgoing
    }

    fn push<M: Serialize>(
        &mut self,
        message: &M,
        intent: MessageIntent,
        destination: Option<String>,
    ) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        let message_type = std::any::type_name::<M>().to_string();
        let time_sent = Utc::now();

        let mut headers = HashMap::new();
        headers.insert(headers::MESSAGE_ID.to_string(), message_id.clone());
        headers.insert(headers::ENCLOSED_MESSAGE_TYPES.to_string(), message_type.clone());
        headers.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        headers.insert(headers::TIME_SENT.to_string(), time_sent.to_rfc3339());

        self.outgoing.push(OutgoingMessage {
            message_id: message_id.clone(),
            message_type,
            body: serde_json::to_value(message)?,
            intent,
            destination,
            time_sent,
            headers,
        });
        Ok(message_id)
    }
}

/// A stateless message handler
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one inbound message
    async fn handle(&mut self, message: &IncomingMessage, ctx: &mut HandlerContext) -> Result<()>;
}

/// A stateful, long-running message handler
///
/// The host loads (or creates) the saga before invocation and persists it
/// afterwards; the saga only mutates its own data and completion flag.
#[async_trait]
pub trait Saga: Send + Sync {
    /// Runtime type name, used as the audit `SagaType`
    fn saga_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Id of the saga data entity
    fn saga_id(&self) -> Uuid;

    /// Whether the saga has been marked complete
    fn completed(&self) -> bool;

    /// JSON snapshot of the saga data entity
    fn entity(&self) -> Result<serde_json::Value>;

    /// Handle one inbound message
    async fn handle(&mut self, message: &IncomingMessage, ctx: &mut HandlerContext) -> Result<()>;
}

/// A saga resolved by the host for the current message
pub struct ActiveSagaInstance {
    saga: Box<dyn Saga>,
    is_new: bool,
}

impl ActiveSagaInstance {
    /// Wrap a loaded or freshly created saga
    pub fn new(saga: impl Saga + 'static, is_new: bool) -> Self {
        Self {
            saga: Box::new(saga),
            is_new,
        }
    }

    /// The saga itself
    pub fn instance(&self) -> &dyn Saga {
        self.saga.as_ref()
    }

    /// Whether the saga was created for this message
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Whether the saga is now complete
    pub fn completed(&self) -> bool {
        self.saga.completed()
    }
}

impl fmt::Debug for ActiveSagaInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSagaInstance")
            .field("saga_type", &self.saga.saga_type())
            .field("saga_id", &self.saga.saga_id())
            .field("is_new", &self.is_new)
            .finish()
    }
}

/// The handler selected for an invocation
pub enum MessageHandler {
    /// Stateless handler
    Plain(Box<dyn Handler>),
    /// Stateful saga instance
    Saga(ActiveSagaInstance),
}

impl MessageHandler {
    /// Wrap a plain handler
    pub fn plain(handler: impl Handler + 'static) -> Self {
        MessageHandler::Plain(Box::new(handler))
    }

    /// Wrap a saga instance
    pub fn saga(saga: impl Saga + 'static, is_new: bool) -> Self {
        MessageHandler::Saga(ActiveSagaInstance::new(saga, is_new))
    }

    /// The active saga instance, if this handler is a saga
    pub fn as_saga(&self) -> Option<&ActiveSagaInstance> {
        match self {
            MessageHandler::Saga(active) => Some(active),
            MessageHandler::Plain(_) => None,
        }
    }

    /// Whether this handler is a saga
    pub fn is_saga(&self) -> bool {
        matches!(self, MessageHandler::Saga(_))
    }

    async fn handle(&mut self, message: &IncomingMessage, ctx: &mut HandlerContext) -> Result<()> {
        match self {
            MessageHandler::Plain(handler) => handler.handle(message, ctx).await,
            MessageHandler::Saga(active) => active.saga.handle(message, ctx).await,
        }
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageHandler::Plain(_) => f.write_str("Plain"),
            MessageHandler::Saga(active) => f.debug_tuple("Saga").field(active).finish(),
        }
    }
}

/// Typed per-invocation storage shared by pipeline behaviors
///
/// Holds at most one value per type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Store a value, returning the previous value of the same type
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|prev| *prev)
    }

    /// Borrow a stored value
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Mutably borrow a stored value
    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove and return a stored value
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Whether a value of type `T` is stored
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

/// What the host gets back once an invocation has finished
#[derive(Debug)]
pub struct InvocationOutcome {
    /// The handler, so the host can persist saga state
    pub handler: MessageHandler,

    /// Inbound headers as left by the pipeline
    pub headers: HashMap<String, String>,

    /// Messages to dispatch
    pub outgoing: Vec<OutgoingMessage>,
}

/// Context for one handler invocation
#[derive(Debug)]
pub struct InvokeContext {
    message: IncomingMessage,
    headers: HashMap<String, String>,
    handler: MessageHandler,
    handler_context: HandlerContext,
    extensions: Extensions,
}

impl InvokeContext {
    /// Create a context for invoking `handler` on `message`
    pub fn new(
        message: IncomingMessage,
        headers: HashMap<String, String>,
        handler: MessageHandler,
    ) -> Self {
        let reply_to = headers.get(headers::REPLY_TO_ADDRESS).cloned();
        Self {
            message,
            headers,
            handler,
            handler_context: HandlerContext::new(reply_to),
            extensions: Extensions::default(),
        }
    }

    /// The inbound message
    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }

    /// Inbound headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Mutable inbound headers
    pub fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.headers
    }

    /// Look up a single header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The handler selected for this invocation
    pub fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    /// Typed extension store
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable typed extension store
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Messages emitted by the handler so far
    pub fn outgoing_messages(&self) -> &[OutgoingMessage] {
        self.handler_context.outgoing()
    }

    /// Delivery intent of the inbound message
    ///
    /// Missing or unrecognized values fall back to `Send`.
    pub fn message_intent(&self) -> MessageIntent {
        match self.header(headers::MESSAGE_INTENT) {
            None => MessageIntent::default(),
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::debug!(value = %raw, error = %e, "Ignoring unrecognized message intent");
                MessageIntent::default()
            }),
        }
    }

    /// When the inbound message was sent, if the header is present and valid
    pub fn time_sent(&self) -> Option<DateTime<Utc>> {
        let raw = self.header(headers::TIME_SENT)?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                tracing::debug!(value = %raw, error = %e, "Ignoring malformed time-sent header");
                None
            }
        }
    }

    /// Whether the inbound message is a scheduled saga timeout
    pub fn is_timeout_message(&self) -> bool {
        self.header(headers::IS_SAGA_TIMEOUT_MESSAGE)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Run the handler body
    pub(crate) async fn invoke_handler(&mut self) -> Result<()> {
        self.handler
            .handle(&self.message, &mut self.handler_context)
            .await
    }

    /// Finish the invocation
    ///
    /// The current saga state-change header, if any, is copied onto every
    /// outgoing message so downstream endpoints see the accumulated trail.
    pub fn finish(self) -> InvocationOutcome {
        let state_change = self.headers.get(headers::SAGA_STATE_CHANGE).cloned();
        let mut outgoing = self.handler_context.outgoing;
        if let Some(value) = state_change {
            for message in &mut outgoing {
                message
                    .headers
                    .insert(headers::SAGA_STATE_CHANGE.to_string(), value.clone());
            }
        }

        InvocationOutcome {
            handler: self.handler,
            headers: self.headers,
            outgoing,
        }
    }
}
