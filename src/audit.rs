//! Saga state-change auditing
//!
//! `SagaAuditBehavior` sits directly in front of the `InvokeSaga` stage.
//! For saga handlers it records when the invocation started, lets the
//! handler run, then works out what happened to the saga (created, updated
//! or completed), appends that to the `SagaStateChange` header and writes
//! one structured log event:
//!
//! ```text
//! Saga execution '{SagaType}' '{SagaId}'.
//! ```
//!
//! with `SagaType`, `SagaId`, `StartTime`, `FinishTime`, `IsCompleted`,
//! `IsNew`, `Initiator`, `ResultingMessages` and `Entity` properties.
//!
//! Plain handlers, disabled loggers and messages without a `MessageId`
//! header pass through untouched. Handler errors are returned as-is and
//! nothing is logged for them.
//!
//! The behavior keeps no per-invocation state of its own. The in-flight
//! `AuditRecord` lives in the invocation's extension store, so a single
//! instance can serve any number of concurrent pipelines.

use crate::config::SagaAuditConfig;
use crate::context::{InvokeContext, OutgoingMessage};
use crate::error::Result;
use crate::headers;
use crate::logging::{AuditLogger, LogEvent, LoggerProvider};
use crate::pipeline::{Behavior, Next, RegisterStep, INVOKE_SAGA};
use crate::types::{AuditRecord, SagaChangeInitiator, SagaChangeOutput};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Pipeline step id of the audit behavior
pub const STEP_ID: &str = "CaptureSagaState";

/// Message template of the audit event
pub const MESSAGE_TEMPLATE: &str = "Saga execution '{SagaType}' '{SagaId}'.";

/// Pipeline behavior that audits saga state changes
pub struct SagaAuditBehavior {
    config: SagaAuditConfig,
    logger: Arc<dyn AuditLogger>,
}

impl SagaAuditBehavior {
    /// Create the behavior, acquiring its logger from `provider`
    pub fn new(config: SagaAuditConfig, provider: &dyn LoggerProvider) -> Result<Self> {
        config.validate()?;
        let logger = provider.logger(&config.logger_name);
        Ok(Self { config, logger })
    }

    /// Pipeline registration placing this behavior immediately before `InvokeSaga`
    pub fn registration(self: Arc<Self>) -> RegisterStep {
        RegisterStep::new(STEP_ID, self, "Records saga state changes").insert_before(INVOKE_SAGA)
    }

    /// Pre-invocation check
    ///
    /// Returns `true` and installs a fresh `AuditRecord` in the context when
    /// the handler is a saga and the logger is enabled at the audit level.
    /// Otherwise leaves the context untouched and returns `false`.
    pub fn on_before_invoke(&self, ctx: &mut InvokeContext) -> bool {
        if !self.config.enabled || !ctx.handler().is_saga() {
            return false;
        }
        if !self.logger.is_enabled(self.config.level) {
            return false;
        }

        ctx.extensions_mut().insert(AuditRecord::start());
        true
    }

    /// Post-invocation step
    ///
    /// Completes the record installed by `on_before_invoke` and audits it.
    pub fn on_after_invoke(&self, ctx: &mut InvokeContext) {
        let Some(mut record) = ctx.extensions_mut().remove::<AuditRecord>() else {
            return;
        };
        let Some(active) = ctx.handler().as_saga() else {
            return;
        };

        record.saga_type = active.instance().saga_type().to_string();
        record.finish_time = Utc::now();
        record.resulting_messages = ctx.outgoing_messages().iter().map(change_output).collect();

        self.audit_saga(record, ctx);
    }

    /// Fill in initiator and saga state, update the header, and log
    ///
    /// Skipped entirely when the inbound message has no `MessageId` header.
    pub fn audit_saga(&self, mut record: AuditRecord, ctx: &mut InvokeContext) {
        let Some(message_id) = ctx.header(headers::MESSAGE_ID).map(str::to_string) else {
            tracing::debug!(
                saga_type = %record.saga_type,
                "No message id header, skipping saga audit"
            );
            return;
        };
        let Some(active) = ctx.handler().as_saga() else {
            return;
        };

        let initiator = SagaChangeInitiator {
            is_saga_timeout_message: ctx.is_timeout_message(),
            initiating_message_id: message_id,
            originating_machine: ctx.header(headers::ORIGINATING_MACHINE).map(str::to_string),
            originating_endpoint: ctx.header(headers::ORIGINATING_ENDPOINT).map(str::to_string),
            message_type: ctx.message().message_type.clone(),
            time_sent: ctx.time_sent(),
            intent: ctx.message_intent(),
        };

        let saga = active.instance();
        record.is_new = active.is_new();
        record.is_completed = active.completed();
        record.saga_id = saga.saga_id();
        record.initiator = Some(initiator);

        let entity = match saga.entity() {
            Ok(entity) => entity,
            Err(e) => {
                tracing::warn!(
                    saga_type = %record.saga_type,
                    saga_id = %record.saga_id,
                    error = %e,
                    "Failed to snapshot saga entity"
                );
                serde_json::Value::Null
            }
        };

        assign_state_change(&record, ctx);
        self.logger.write(self.log_event(&record, entity));
    }

    fn log_event(&self, record: &AuditRecord, entity: serde_json::Value) -> LogEvent {
        LogEvent::new(self.config.level, self.logger.name(), MESSAGE_TEMPLATE)
            .with_property("SagaType", to_json(&record.saga_type))
            .with_property("SagaId", to_json(&record.saga_id))
            .with_property("StartTime", to_json(&record.start_time))
            .with_property("FinishTime", to_json(&record.finish_time))
            .with_property("IsCompleted", to_json(&record.is_completed))
            .with_property("IsNew", to_json(&record.is_new))
            .with_property("Initiator", to_json(&record.initiator))
            .with_property("ResultingMessages", to_json(&record.resulting_messages))
            .with_property("Entity", entity)
    }
}

#[async_trait]
impl Behavior for SagaAuditBehavior {
    async fn invoke(&self, ctx: &mut InvokeContext, next: Next<'_>) -> Result<()> {
        if !self.on_before_invoke(ctx) {
            return next.run(ctx).await;
        }

        if let Err(e) = next.run(ctx).await {
            ctx.extensions_mut().remove::<AuditRecord>();
            return Err(e);
        }

        self.on_after_invoke(ctx);
        Ok(())
    }
}

/// Append this record's `<sagaId>:<label>` entry to the correlation header
fn assign_state_change(record: &AuditRecord, ctx: &mut InvokeContext) {
    let value = headers::append_state_change(
        ctx.header(headers::SAGA_STATE_CHANGE),
        &record.saga_id.to_string(),
        record.state_change().as_str(),
    );
    ctx.headers_mut()
        .insert(headers::SAGA_STATE_CHANGE.to_string(), value);
}

fn change_output(message: &OutgoingMessage) -> SagaChangeOutput {
    SagaChangeOutput {
        message_type: message.message_type.clone(),
        message_id: message.message_id.clone(),
        time_sent: message.time_sent,
        intent: message.intent,
        destination: message.destination.clone(),
    }
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to serialize audit property");
        serde_json::Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        Handler, HandlerContext, IncomingMessage, MessageHandler, Saga,
    };
    use crate::error::AuditError;
    use crate::logging::{LogLevel, MemoryLoggerProvider};
    use crate::pipeline::Pipeline;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct StubSaga {
        id: Uuid,
        complete: bool,
        fail: bool,
    }

    #[async_trait]
    impl Saga for StubSaga {
        fn saga_id(&self) -> Uuid {
            self.id
        }

        fn completed(&self) -> bool {
            self.complete
        }

        fn entity(&self) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "id": self.id }))
        }

        async fn handle(&mut self, _message: &IncomingMessage, ctx: &mut HandlerContext) -> Result<()> {
            if self.fail {
                return Err(AuditError::Handler("boom".to_string()));
            }
            ctx.publish(&serde_json::json!({ "done": self.complete }))?;
            Ok(())
        }
    }

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn handle(&mut self, _message: &IncomingMessage, _ctx: &mut HandlerContext) -> Result<()> {
            Ok(())
        }
    }

    fn stub(complete: bool) -> StubSaga {
        StubSaga {
            id: Uuid::new_v4(),
            complete,
            fail: false,
        }
    }

    fn base_headers() -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(headers::MESSAGE_ID.to_string(), "msg-1".to_string());
        headers.insert(headers::ORIGINATING_MACHINE.to_string(), "host-a".to_string());
        headers
    }

    fn context(handler: MessageHandler, headers: HashMap<String, String>) -> InvokeContext {
        InvokeContext::new(
            IncomingMessage::from_json("test::Start", serde_json::json!({})),
            headers,
            handler,
        )
    }

    fn behavior(provider: &MemoryLoggerProvider) -> SagaAuditBehavior {
        SagaAuditBehavior::new(SagaAuditConfig::default(), provider).unwrap()
    }

    #[test]
    fn test_registration_targets_invoke_saga() {
        let provider = MemoryLoggerProvider::default();
        let step = Arc::new(behavior(&provider)).registration();
        assert_eq!(step.step_id(), STEP_ID);
        assert_eq!(step.description(), "Records saga state changes");
    }

    #[test]
    fn test_new_rejects_blank_logger_name() {
        let provider = MemoryLoggerProvider::default();
        let config = SagaAuditConfig {
            logger_name: String::new(),
            ..SagaAuditConfig::default()
        };
        assert!(SagaAuditBehavior::new(config, &provider).is_err());
    }

    #[test]
    fn test_before_invoke_skips_plain_handler() {
        let provider = MemoryLoggerProvider::default();
        let audit = behavior(&provider);
        let mut ctx = context(MessageHandler::plain(Noop), base_headers());

        assert!(!audit.on_before_invoke(&mut ctx));
        assert!(ctx.extensions().is_empty());
    }

    #[test]
    fn test_before_invoke_skips_when_logger_disabled() {
        let provider = MemoryLoggerProvider::with_min_level(LogLevel::Warn);
        let audit = behavior(&provider);
        let mut ctx = context(MessageHandler::saga(stub(false), true), base_headers());

        assert!(!audit.on_before_invoke(&mut ctx));
        assert!(ctx.extensions().is_empty());
    }

    #[test]
    fn test_before_invoke_skips_when_disabled_by_config() {
        let provider = MemoryLoggerProvider::default();
        let config = SagaAuditConfig {
            enabled: false,
            ..SagaAuditConfig::default()
        };
        let audit = SagaAuditBehavior::new(config, &provider).unwrap();
        let mut ctx = context(MessageHandler::saga(stub(false), true), base_headers());

        assert!(!audit.on_before_invoke(&mut ctx));
    }

    #[test]
    fn test_before_invoke_installs_record() {
        let provider = MemoryLoggerProvider::default();
        let audit = behavior(&provider);
        let mut ctx = context(MessageHandler::saga(stub(false), true), base_headers());

        assert!(audit.on_before_invoke(&mut ctx));
        let record = ctx.extensions().get::<AuditRecord>().unwrap();
        assert!(record.saga_type.is_empty());
    }

    #[test]
    fn test_audit_without_message_id_is_silent() {
        let provider = MemoryLoggerProvider::default();
        let audit = behavior(&provider);
        let mut headers = base_headers();
        headers.remove(headers::MESSAGE_ID);
        let mut ctx = context(MessageHandler::saga(stub(true), true), headers);

        audit.audit_saga(AuditRecord::start(), &mut ctx);

        assert!(ctx.header(headers::SAGA_STATE_CHANGE).is_none());
        assert!(provider.events().is_empty());
    }

    #[test]
    fn test_after_invoke_without_record_is_noop() {
        let provider = MemoryLoggerProvider::default();
        let audit = behavior(&provider);
        let mut ctx = context(MessageHandler::saga(stub(true), true), base_headers());

        audit.on_after_invoke(&mut ctx);
        assert!(provider.events().is_empty());
    }

    #[tokio::test]
    async fn test_behavior_logs_updated_saga() {
        let provider = MemoryLoggerProvider::default();
        let audit = Arc::new(behavior(&provider));
        let pipeline = Pipeline::builder().register(audit.registration()).build().unwrap();

        let saga = stub(false);
        let saga_id = saga.id;
        let mut ctx = context(MessageHandler::saga(saga, false), base_headers());
        pipeline.invoke(&mut ctx).await.unwrap();

        assert_eq!(
            ctx.header(headers::SAGA_STATE_CHANGE).unwrap(),
            format!("{}:Updated", saga_id)
        );
        assert!(!ctx.extensions().contains::<AuditRecord>());

        let events = provider.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.level, LogLevel::Info);
        assert_eq!(event.message_template, MESSAGE_TEMPLATE);
        assert_eq!(event.property("IsNew"), Some(&serde_json::json!(false)));
        assert_eq!(event.property("IsCompleted"), Some(&serde_json::json!(false)));
        assert_eq!(event.property("SagaId"), Some(&serde_json::json!(saga_id.to_string())));
        assert!(event.property("SagaType").unwrap().as_str().unwrap().ends_with("StubSaga"));

        let initiator = event.property("Initiator").unwrap();
        assert_eq!(initiator["initiatingMessageId"], "msg-1");
        assert_eq!(initiator["originatingMachine"], "host-a");
        assert!(initiator["originatingEndpoint"].is_null());
        assert_eq!(initiator["messageType"], "test::Start");
        assert_eq!(initiator["intent"], "Send");

        let resulting = event.property("ResultingMessages").unwrap().as_array().unwrap();
        assert_eq!(resulting.len(), 1);
        assert_eq!(resulting[0]["intent"], "Publish");

        assert_eq!(event.property("Entity").unwrap()["id"], saga_id.to_string());

        let property_names: Vec<&str> = event.properties.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            property_names,
            vec![
                "SagaType",
                "SagaId",
                "StartTime",
                "FinishTime",
                "IsCompleted",
                "IsNew",
                "Initiator",
                "ResultingMessages",
                "Entity"
            ]
        );
    }

    #[tokio::test]
    async fn test_behavior_propagates_handler_error() {
        let provider = MemoryLoggerProvider::default();
        let audit = Arc::new(behavior(&provider));
        let pipeline = Pipeline::builder().register(audit.registration()).build().unwrap();

        let saga = StubSaga {
            id: Uuid::new_v4(),
            complete: false,
            fail: true,
        };
        let mut ctx = context(MessageHandler::saga(saga, true), base_headers());
        let err = pipeline.invoke(&mut ctx).await.unwrap_err();

        assert!(matches!(err, AuditError::Handler(msg) if msg == "boom"));
        assert!(ctx.header(headers::SAGA_STATE_CHANGE).is_none());
        assert!(ctx.extensions().is_empty());
        assert!(provider.events().is_empty());
    }

    #[test]
    fn test_assign_state_change_appends() {
        let mut headers = base_headers();
        headers.insert(headers::SAGA_STATE_CHANGE.to_string(), "abc:Updated".to_string());
        let mut ctx = context(MessageHandler::plain(Noop), headers);

        let mut record = AuditRecord::start();
        record.saga_id = Uuid::nil();
        record.is_new = true;
        assign_state_change(&record, &mut ctx);

        assert_eq!(
            ctx.header(headers::SAGA_STATE_CHANGE).unwrap(),
            format!("abc:Updated;{}:New", Uuid::nil())
        );
    }
}
