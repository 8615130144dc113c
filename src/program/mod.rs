//! Registry of named sources, sinks, pipelines and per-source services.
//!
//! A [`Program`] is assembled once and then handed to the engine behind an
//! `Arc`, after which nothing can mutate it and every worker may read it
//! concurrently.

pub mod traits;

pub use traits::{MessageAndRouting, ProcessingService, Sink, Source};

use crate::pipeline::Pipeline;
use crate::{error::StreamError, Result};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A per-source service, kept both as its control interface and as a
/// type-erased object that workers expose through the stream context.
#[derive(Clone)]
pub struct ServiceHandle {
    service: Arc<dyn ProcessingService>,
    object: Arc<dyn Any + Send + Sync>,
}

impl ServiceHandle {
    pub fn new<S: ProcessingService + 'static>(service: Arc<S>) -> Self {
        Self {
            service: service.clone(),
            object: service,
        }
    }

    pub fn service(&self) -> &Arc<dyn ProcessingService> {
        &self.service
    }

    pub fn object(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.object)
    }
}

impl<S: ProcessingService + 'static> From<Arc<S>> for ServiceHandle {
    fn from(service: Arc<S>) -> Self {
        ServiceHandle::new(service)
    }
}

#[derive(Default)]
pub struct Program {
    sources: BTreeMap<String, Arc<dyn Source>>,
    sinks: BTreeMap<String, Arc<dyn Sink>>,
    pipelines: BTreeMap<String, Pipeline>,
    services: HashMap<String, Vec<(String, ServiceHandle)>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, name: impl Into<String>, source: Arc<dyn Source>) -> Result<()> {
        insert_unique(&mut self.sources, "source", name.into(), source)
    }

    pub fn add_sink(&mut self, name: impl Into<String>, sink: Arc<dyn Sink>) -> Result<()> {
        insert_unique(&mut self.sinks, "sink", name.into(), sink)
    }

    pub fn add_pipeline(&mut self, name: impl Into<String>, pipeline: Pipeline) -> Result<()> {
        insert_unique(&mut self.pipelines, "pipeline", name.into(), pipeline)
    }

    /// Attaches a service to a source. Services start when the source's
    /// worker starts and stop when it exits, in insertion order.
    pub fn add_service_to_source(
        &mut self,
        source: impl Into<String>,
        name: impl Into<String>,
        service: impl Into<ServiceHandle>,
    ) -> Result<()> {
        let name = name.into();
        let services = self.services.entry(source.into()).or_default();
        if services.iter().any(|(existing, _)| existing == &name) {
            return Err(StreamError::DuplicateComponent {
                kind: "service",
                name,
            });
        }
        services.push((name, service.into()));
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(name)
    }

    pub fn sink(&self, name: &str) -> Option<&Arc<dyn Sink>> {
        self.sinks.get(name)
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = (&str, &Arc<dyn Source>)> {
        self.sources.iter().map(|(name, source)| (name.as_str(), source))
    }

    pub fn sinks(&self) -> impl Iterator<Item = (&str, &Arc<dyn Sink>)> {
        self.sinks.iter().map(|(name, sink)| (name.as_str(), sink))
    }

    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn services_for(&self, source: &str) -> &[(String, ServiceHandle)] {
        self.services
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn insert_unique<V>(
    map: &mut BTreeMap<String, V>,
    kind: &'static str,
    name: String,
    value: V,
) -> Result<()> {
    if map.contains_key(&name) {
        return Err(StreamError::DuplicateComponent { kind, name });
    }
    map.insert(name, value);
    Ok(())
}
