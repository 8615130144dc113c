//! Rule-based message pipelines.
//!
//! A [`Pipeline`] is an ordered list of [`Rule`]s. Each rule evaluates its
//! [`Filter`] against the in-flight message and runs either its then-chain or
//! its else-chain of [`Processor`]s. Processing stops early once the message
//! context asks to halt or the stream has failed.

pub mod rule;

#[allow(clippy::module_inception)]
mod pipeline;

pub use pipeline::{Pipeline, PipelineBuilder};
pub use rule::{Branch, Rule, RuleBuilder};

use crate::context::MessageProcessingContext;
use crate::Result;

/// Decides which chain of a rule runs for a message.
pub trait Filter: Send + Sync {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool>;

    fn type_name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// Mutates the in-flight message and/or its contexts.
///
/// An `Err` is not handled by the pipeline; it ends the owning worker.
pub trait Processor: Send + Sync {
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()>;

    fn type_name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// Filter backed by a closure.
pub struct FnFilter<F> {
    name: String,
    predicate: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&MessageProcessingContext<'_>) -> Result<bool> + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(&MessageProcessingContext<'_>) -> Result<bool> + Send + Sync,
{
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        (self.predicate)(ctx)
    }

    fn type_name(&self) -> &str {
        &self.name
    }
}

/// Processor backed by a closure.
pub struct FnProcessor<F> {
    name: String,
    action: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&mut MessageProcessingContext<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, action: F) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&mut MessageProcessingContext<'_>) -> Result<()> + Send + Sync,
{
    fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        (self.action)(ctx)
    }

    fn type_name(&self) -> &str {
        &self.name
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
