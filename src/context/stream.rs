use crate::expr::{self, ExprDataSource};
use crate::metrics::MetricsScope;
use crate::program::{MessageAndRouting, ProcessingService, Program, Source};
use crate::{error::StreamError, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Per-source state carried across every message of one worker.
///
/// Holds the one-way failure flag, a bag of named objects (flags are named
/// `bool`s), the expression fallback chain and the worker's metrics scope.
/// The metrics scope makes this type `!Send`, which keeps it on the worker
/// thread that created it.
pub struct StreamProcessingContext {
    label: String,
    failed: bool,
    objects: HashMap<String, Box<dyn Any>>,
    source: Option<Arc<dyn Source>>,
    program: Option<Arc<Program>>,
    data_sources: Vec<Arc<dyn ExprDataSource>>,
    metrics: MetricsScope,
}

impl StreamProcessingContext {
    pub fn new(label: impl Into<String>, metrics: MetricsScope) -> Self {
        Self {
            label: label.into(),
            failed: false,
            objects: HashMap::new(),
            source: None,
            program: None,
            data_sources: Vec::new(),
            metrics,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_program(mut self, program: Arc<Program>) -> Self {
        self.program = Some(program);
        self
    }

    pub fn with_data_source(mut self, source: Arc<dyn ExprDataSource>) -> Self {
        self.data_sources.push(source);
        self
    }

    pub fn add_data_source(&mut self, source: Arc<dyn ExprDataSource>) {
        self.data_sources.push(source);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn metrics(&self) -> &MetricsScope {
        &self.metrics
    }

    pub fn program(&self) -> Option<&Arc<Program>> {
        self.program.as_ref()
    }

    pub fn source(&self) -> Option<&Arc<dyn Source>> {
        self.source.as_ref()
    }

    pub fn data_sources(&self) -> &[Arc<dyn ExprDataSource>] {
        &self.data_sources
    }

    pub fn warn(&self, text: &str) {
        warn!("[{}] {}", self.label, text);
    }

    /// Marks the stream as failed. The flag never resets; the worker stops
    /// reading once the in-flight message completes.
    pub fn fail(&mut self, text: &str) {
        error!("[{}] stream failed: {}", self.label, text);
        self.failed = true;
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Stores `value` under `name`, returning whatever was there before.
    pub fn put_object<T: Any>(&mut self, name: impl Into<String>, value: T) -> Option<Box<dyn Any>> {
        self.objects.insert(name.into(), Box::new(value))
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// `Ok(None)` when absent, `WrongType` when present with another type.
    pub fn get_object<T: Any>(&self, name: &str) -> Result<Option<&T>> {
        match self.objects.get(name) {
            None => Ok(None),
            Some(object) => object
                .downcast_ref::<T>()
                .map(Some)
                .ok_or_else(|| wrong_type::<T>(name)),
        }
    }

    pub fn get_object_mut<T: Any>(&mut self, name: &str) -> Result<Option<&mut T>> {
        match self.objects.get_mut(name) {
            None => Ok(None),
            Some(object) => object
                .downcast_mut::<T>()
                .map(Some)
                .ok_or_else(|| wrong_type::<T>(name)),
        }
    }

    pub fn require_object<T: Any>(&self, name: &str) -> Result<&T> {
        self.get_object(name)?
            .ok_or_else(|| StreamError::MissingObject(name.to_string()))
    }

    pub fn remove_object(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.objects.remove(name)
    }

    /// Sets a boolean flag and returns its previous value.
    pub fn set_flag(&mut self, name: &str, value: bool) -> bool {
        let previous = self.is_flag_set(name);
        self.objects.insert(name.to_string(), Box::new(value));
        previous
    }

    pub fn is_flag_set(&self, name: &str) -> bool {
        self.objects
            .get(name)
            .and_then(|object| object.downcast_ref::<bool>())
            .copied()
            .unwrap_or(false)
    }

    /// Removes a flag and returns its previous value. Non-flag objects under
    /// the same name are left alone.
    pub fn clear_flag(&mut self, name: &str) -> bool {
        match self.objects.get(name).and_then(|o| o.downcast_ref::<bool>()) {
            Some(previous) => {
                let previous = *previous;
                self.objects.remove(name);
                previous
            }
            None => false,
        }
    }

    /// Per-source service registered by the engine under `name`.
    pub fn service<S: ProcessingService + 'static>(&self, name: &str) -> Result<Arc<S>> {
        let handle = self.require_object::<Arc<dyn Any + Send + Sync>>(name)?;
        Arc::clone(handle)
            .downcast::<S>()
            .map_err(|_| wrong_type::<S>(name))
    }

    /// Asks the owning source to deliver `routing` again. Without a source
    /// this only warns.
    pub fn requeue(&self, routing: MessageAndRouting) -> Result<()> {
        match &self.source {
            Some(source) => source.requeue(routing),
            None => {
                self.warn(&format!(
                    "no source attached, cannot requeue message for pipeline '{}'",
                    routing.pipeline
                ));
                Ok(())
            }
        }
    }

    /// Evaluates `text` against the fallback chain only; no message data.
    pub fn eval_expression(&self, text: &str) -> String {
        expr::evaluate_text(text, &self.chain())
    }

    pub fn eval_symbol(&self, key: &str) -> Option<Value> {
        expr::evaluate_symbol(key, &self.chain())
    }

    pub(crate) fn chain(&self) -> Vec<&dyn ExprDataSource> {
        self.data_sources.iter().map(|s| s.as_ref()).collect()
    }
}

fn wrong_type<T: ?Sized>(name: &str) -> StreamError {
    StreamError::WrongType {
        name: name.to_string(),
        expected: std::any::type_name::<T>(),
    }
}
