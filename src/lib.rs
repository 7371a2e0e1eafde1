//! # a3s-saga-audit
//!
//! Saga state-change auditing for message handler pipelines.
//!
//! ## Overview
//!
//! `a3s-saga-audit` provides a pipeline behavior that wraps the invocation of
//! a message handler. When the handler is a saga, it records what happened to
//! the saga (created, updated or completed), appends a `<sagaId>:<label>`
//! entry to the `SagaStateChange` header, and writes one structured log
//! event describing the change, the message that caused it, and the
//! messages the saga emitted.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_saga_audit::sample::{CreateUser, CreateUserSaga};
//! use a3s_saga_audit::{
//!     headers, IncomingMessage, InvokeContext, MemoryLoggerProvider, MessageHandler, Pipeline,
//!     SagaAuditBehavior, SagaAuditConfig,
//! };
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_saga_audit::Result<()> {
//! let provider = MemoryLoggerProvider::default();
//! let audit = Arc::new(SagaAuditBehavior::new(SagaAuditConfig::default(), &provider)?);
//! let pipeline = Pipeline::builder().register(audit.registration()).build()?;
//!
//! let message = CreateUser { user_name: "alice".to_string() };
//! let mut headers = HashMap::new();
//! headers.insert(headers::MESSAGE_ID.to_string(), "msg-1".to_string());
//!
//! let mut ctx = InvokeContext::new(
//!     IncomingMessage::new(&message)?,
//!     headers,
//!     MessageHandler::saga(CreateUserSaga::start(&message), true),
//! );
//! pipeline.invoke(&mut ctx).await?;
//!
//! assert_eq!(provider.events().len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Behavior** trait - a pipeline stage wrapping the rest of the pipeline
//! - **Pipeline** - ordered behaviors ending in the `InvokeSaga` stage
//! - **SagaAuditBehavior** - the saga audit interceptor
//! - **LoggerProvider** / **AuditLogger** - injected structured log sinks
//!   (`tracing`-backed or in-memory)

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod headers;
pub mod logging;
pub mod pipeline;
pub mod sample;
pub mod types;

// Re-export core types
pub use audit::SagaAuditBehavior;
pub use config::SagaAuditConfig;
pub use context::{
    ActiveSagaInstance, Extensions, Handler, HandlerContext, IncomingMessage, InvocationOutcome,
    InvokeContext, MessageHandler, OutgoingMessage, Saga,
};
pub use error::{AuditError, Result};
pub use logging::{
    AuditLogger, LogEvent, LogLevel, LoggerProvider, MemoryLoggerProvider, TracingLoggerProvider,
};
pub use pipeline::{Behavior, Next, Pipeline, PipelineBuilder, RegisterStep, INVOKE_SAGA};
pub use types::{AuditRecord, MessageIntent, SagaChangeInitiator, SagaChangeOutput, StateChange};
