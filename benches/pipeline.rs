//! Performance benchmarks for a3s-saga-audit
//!
//! Run with: cargo bench

use a3s_saga_audit::headers::{self, append_state_change};
use a3s_saga_audit::sample::{CreateUser, CreateUserSaga};
use a3s_saga_audit::{
    IncomingMessage, InvokeContext, LogLevel, MemoryLoggerProvider, MessageHandler, Pipeline,
    SagaAuditBehavior, SagaAuditConfig,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use std::sync::Arc;

fn audited_pipeline(provider: &MemoryLoggerProvider) -> Pipeline {
    let audit = Arc::new(SagaAuditBehavior::new(SagaAuditConfig::default(), provider).unwrap());
    Pipeline::builder().register(audit.registration()).build().unwrap()
}

fn create_user_context() -> InvokeContext {
    let message = CreateUser {
        user_name: "alice".to_string(),
    };
    let mut headers = HashMap::new();
    headers.insert(headers::MESSAGE_ID.to_string(), "msg-1".to_string());
    headers.insert(headers::ORIGINATING_ENDPOINT.to_string(), "bench".to_string());
    InvokeContext::new(
        IncomingMessage::new(&message).unwrap(),
        headers,
        MessageHandler::saga(CreateUserSaga::start(&message), true),
    )
}

fn bench_state_change_header(c: &mut Criterion) {
    c.bench_function("append_state_change (empty)", |b| {
        b.iter(|| append_state_change(None, "5f0c2a1e-0000-0000-0000-000000000000", "New"));
    });

    let existing = (0..10)
        .map(|i| format!("saga-{}:Updated", i))
        .collect::<Vec<_>>()
        .join(";");
    c.bench_function("append_state_change (10 entries)", |b| {
        b.iter(|| append_state_change(Some(&existing), "saga-x", "Completed"));
    });
}

fn bench_audited_invocation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let provider = MemoryLoggerProvider::default();
    let pipeline = audited_pipeline(&provider);
    c.bench_function("invoke saga (audited)", |b| {
        b.to_async(&rt).iter(|| async {
            let mut ctx = create_user_context();
            pipeline.invoke(&mut ctx).await.unwrap();
            provider.clear();
        });
    });

    let disabled = MemoryLoggerProvider::with_min_level(LogLevel::Error);
    let pipeline = audited_pipeline(&disabled);
    c.bench_function("invoke saga (logger disabled)", |b| {
        b.to_async(&rt).iter(|| async {
            let mut ctx = create_user_context();
            pipeline.invoke(&mut ctx).await.unwrap();
        });
    });

    let bare = Pipeline::builder().build().unwrap();
    c.bench_function("invoke saga (no audit)", |b| {
        b.to_async(&rt).iter(|| async {
            let mut ctx = create_user_context();
            bare.invoke(&mut ctx).await.unwrap();
        });
    });
}

criterion_group!(benches, bench_state_change_header, bench_audited_invocation);
criterion_main!(benches);
