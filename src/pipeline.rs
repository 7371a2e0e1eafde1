//! Handler invocation pipeline
//!
//! A `Pipeline` is an ordered chain of `Behavior`s ending in the
//! `InvokeSaga` stage, which runs the handler body. Each behavior receives
//! the invocation context and a `Next` continuation; it may do work before
//! and after awaiting the continuation, or skip it entirely.
//!
//! Steps are registered with `RegisterStep` and ordered by their
//! `insert_before` / `insert_after` constraints. Unconstrained steps keep
//! registration order. Steps anchored before `InvokeSaga` are placed as
//! late as the other constraints allow so they wrap the handler directly.

use crate::context::InvokeContext;
use crate::error::{AuditError, Result};
use crate::guard;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Id of the terminal stage that invokes the handler
pub const INVOKE_SAGA: &str = "InvokeSaga";

/// A pipeline stage wrapping the rest of the pipeline
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Run this stage, calling `next.run(ctx)` to continue down the pipeline
    async fn invoke(&self, ctx: &mut InvokeContext, next: Next<'_>) -> Result<()>;
}

/// Continuation for the remainder of the pipeline
pub struct Next<'a> {
    behaviors: &'a [Arc<dyn Behavior>],
}

impl<'a> Next<'a> {
    /// Run the remaining stages, ending with the handler itself
    pub fn run<'c>(self, ctx: &'c mut InvokeContext) -> BoxFuture<'c, Result<()>>
    where
        'a: 'c,
    {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => behavior.invoke(ctx, Next { behaviors: rest }),
            None => Box::pin(ctx.invoke_handler()),
        }
    }
}

/// A behavior plus its placement in the pipeline
pub struct RegisterStep {
    step_id: String,
    description: String,
    behavior: Arc<dyn Behavior>,
    before: Vec<String>,
    after: Vec<String>,
}

impl RegisterStep {
    /// Create a step with no placement constraints
    pub fn new(
        step_id: impl Into<String>,
        behavior: Arc<dyn Behavior>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            description: description.into(),
            behavior,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Run this step before the step with the given id
    pub fn insert_before(mut self, step_id: impl Into<String>) -> Self {
        self.before.push(step_id.into());
        self
    }

    /// Run this step after the step with the given id
    pub fn insert_after(mut self, step_id: impl Into<String>) -> Self {
        self.after.push(step_id.into());
        self
    }

    /// Step id
    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    fn wraps_handler(&self) -> bool {
        self.before.iter().any(|id| id == INVOKE_SAGA)
    }
}

/// Collects step registrations and resolves their order
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<RegisterStep>,
}

impl PipelineBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step
    pub fn register(mut self, step: RegisterStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate registrations and produce an ordered pipeline
    pub fn build(self) -> Result<Pipeline> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            guard::against_empty(&step.step_id, "step_id")?;
            if step.step_id == INVOKE_SAGA {
                return Err(AuditError::Pipeline(format!(
                    "Step id '{}' is reserved for the handler stage",
                    INVOKE_SAGA
                )));
            }
            if index.insert(step.step_id.as_str(), i).is_some() {
                return Err(AuditError::Pipeline(format!(
                    "Step '{}' is registered more than once",
                    step.step_id
                )));
            }
        }

        // successors[a] contains b when a must run before b
        let mut successors: Vec<HashSet<usize>> = vec![HashSet::new(); self.steps.len()];
        let mut in_degree = vec![0usize; self.steps.len()];
        let mut add_edge = |from: usize, to: usize| {
            if successors[from].insert(to) {
                in_degree[to] += 1;
            }
        };

        for (i, step) in self.steps.iter().enumerate() {
            for anchor in &step.before {
                if anchor == INVOKE_SAGA {
                    continue;
                }
                let j = resolve_anchor(&index, &step.step_id, anchor)?;
                add_edge(i, j);
            }
            for anchor in &step.after {
                if anchor == INVOKE_SAGA {
                    return Err(AuditError::Pipeline(format!(
                        "Step '{}' cannot run after '{}'",
                        step.step_id, INVOKE_SAGA
                    )));
                }
                let j = resolve_anchor(&index, &step.step_id, anchor)?;
                add_edge(j, i);
            }
        }

        // Kahn's algorithm; among ready steps prefer those not wrapping the
        // handler, then registration order.
        let mut placed = vec![false; self.steps.len()];
        let mut order = Vec::with_capacity(self.steps.len());
        while order.len() < self.steps.len() {
            let next = (0..self.steps.len())
                .filter(|&i| !placed[i] && in_degree[i] == 0)
                .min_by_key(|&i| (self.steps[i].wraps_handler(), i));

            let Some(i) = next else {
                let stuck: Vec<&str> = (0..self.steps.len())
                    .filter(|&i| !placed[i])
                    .map(|i| self.steps[i].step_id.as_str())
                    .collect();
                return Err(AuditError::Pipeline(format!(
                    "Cyclic step ordering between: {}",
                    stuck.join(", ")
                )));
            };

            placed[i] = true;
            for &j in &successors[i] {
                in_degree[j] -= 1;
            }
            order.push(i);
        }

        let mut slots: Vec<Option<RegisterStep>> = self.steps.into_iter().map(Some).collect();
        let mut step_ids = Vec::with_capacity(order.len() + 1);
        let mut behaviors = Vec::with_capacity(order.len());
        for i in order {
            if let Some(step) = slots[i].take() {
                tracing::debug!(
                    step = %step.step_id,
                    description = %step.description,
                    "Pipeline step registered"
                );
                step_ids.push(step.step_id);
                behaviors.push(step.behavior);
            }
        }
        step_ids.push(INVOKE_SAGA.to_string());

        Ok(Pipeline {
            step_ids,
            behaviors,
        })
    }
}

fn resolve_anchor(index: &HashMap<&str, usize>, step_id: &str, anchor: &str) -> Result<usize> {
    index.get(anchor).copied().ok_or_else(|| {
        AuditError::Pipeline(format!(
            "Step '{}' references unknown step '{}'",
            step_id, anchor
        ))
    })
}

/// An ordered, immutable chain of behaviors
///
/// Shareable across concurrent invocations; all per-invocation state lives
/// in the `InvokeContext`.
pub struct Pipeline {
    step_ids: Vec<String>,
    behaviors: Vec<Arc<dyn Behavior>>,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Step ids in execution order, ending with `InvokeSaga`
    pub fn step_ids(&self) -> &[String] {
        &self.step_ids
    }

    /// Run every behavior and then the handler
    pub async fn invoke(&self, ctx: &mut InvokeContext) -> Result<()> {
        tracing::debug!(
            message_type = %ctx.message().message_type,
            saga = ctx.handler().is_saga(),
            steps = self.behaviors.len(),
            "Invoking handler pipeline"
        );
        Next {
            behaviors: &self.behaviors,
        }
        .run(ctx)
        .await
    }
}
