use a3s_saga_audit::sample::{CreateUser, CreateUserSaga, UserCreated};
use a3s_saga_audit::{
    headers, Handler, HandlerContext, IncomingMessage, InvokeContext, MessageHandler, Pipeline,
    SagaAuditBehavior, SagaAuditConfig, TracingLoggerProvider,
};
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Run `CreateUser` messages through an audited saga pipeline
#[derive(Debug, Parser)]
#[command(name = "tracing-sample", version, about)]
struct Cli {
    /// User names to create
    #[arg(default_value = "alice")]
    users: Vec<String>,

    /// Endpoint name reported as the message origin
    #[arg(long, default_value = "TracingSample")]
    endpoint: String,
}

/// Handles the `UserCreated` event sent back by the saga
struct UserCreatedHandler;

#[async_trait]
impl Handler for UserCreatedHandler {
    async fn handle(
        &mut self,
        message: &IncomingMessage,
        _ctx: &mut HandlerContext,
    ) -> a3s_saga_audit::Result<()> {
        let event: UserCreated = message.body_as()?;
        tracing::info!(user_name = %event.user_name, "Received UserCreated");
        Ok(())
    }
}

fn inbound_headers(endpoint: &str) -> HashMap<String, String> {
    let machine = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let mut headers = HashMap::new();
    headers.insert(headers::MESSAGE_ID.to_string(), uuid::Uuid::new_v4().to_string());
    headers.insert(headers::ORIGINATING_MACHINE.to_string(), machine);
    headers.insert(headers::ORIGINATING_ENDPOINT.to_string(), endpoint.to_string());
    headers.insert(headers::MESSAGE_INTENT.to_string(), "Send".to_string());
    headers.insert(headers::TIME_SENT.to_string(), Utc::now().to_rfc3339());
    headers
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SagaAuditConfig::from_env()?;
    let provider = TracingLoggerProvider::new(config.level);
    let audit = Arc::new(SagaAuditBehavior::new(config, &provider)?);
    let pipeline = Pipeline::builder().register(audit.registration()).build()?;

    for user_name in cli.users {
        let message = CreateUser { user_name };
        let mut ctx = InvokeContext::new(
            IncomingMessage::new(&message)?,
            inbound_headers(&cli.endpoint),
            MessageHandler::saga(CreateUserSaga::start(&message), true),
        );
        pipeline.invoke(&mut ctx).await?;
        let outcome = ctx.finish();

        // Deliver locally sent messages straight back through the pipeline
        for outgoing in outcome.outgoing {
            let mut headers = outgoing.headers.clone();
            headers.insert(headers::ORIGINATING_ENDPOINT.to_string(), cli.endpoint.clone());
            let mut ctx = InvokeContext::new(
                IncomingMessage::from_json(outgoing.message_type, outgoing.body),
                headers,
                MessageHandler::plain(UserCreatedHandler),
            );
            pipeline.invoke(&mut ctx).await?;
        }
    }

    Ok(())
}
