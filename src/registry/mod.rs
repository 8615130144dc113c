//! Type-tag registry that turns a [`ProgramConfig`] into a [`Program`].
//!
//! Every component kind has its own table of factories keyed by tag.
//! Source, sink and service settings are evaluated once against the given
//! data sources when the program is built. Filter and processor settings are
//! passed through as written. Only template-bearing settings are evaluated
//! against each message: `send_to_sink.sink`, `set_field.value`,
//! `append_value.value`, `stop.reason`, `fail_stream.reason`, `log.template`,
//! `requeue.pipeline` and `expression_equals.expression`. Field names, flag
//! names, patterns and comparison values are literal.

use crate::components::{filters, processors, sinks, sources};
use crate::config::{ComponentConfig, PipelineConfig, ProgramConfig, RuleConfig};
use crate::expr::{evaluate_json, ExprDataSource};
use crate::pipeline::{Filter, Pipeline, Processor, Rule};
use crate::program::{Program, ServiceHandle, Sink, Source};
use crate::{error::StreamError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub type FilterFactory =
    Box<dyn Fn(&ComponentRegistry, &Value) -> Result<Box<dyn Filter>> + Send + Sync>;
pub type ProcessorFactory =
    Box<dyn Fn(&ComponentRegistry, &Value) -> Result<Box<dyn Processor>> + Send + Sync>;
pub type SourceFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn Source>> + Send + Sync>;
pub type SinkFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn Sink>> + Send + Sync>;
pub type ServiceFactory = Box<dyn Fn(&Value) -> Result<ServiceHandle> + Send + Sync>;

#[derive(Default)]
pub struct ComponentRegistry {
    filters: HashMap<String, FilterFactory>,
    processors: HashMap<String, ProcessorFactory>,
    sources: HashMap<String, SourceFactory>,
    sinks: HashMap<String, SinkFactory>,
    services: HashMap<String, ServiceFactory>,
}

impl ComponentRegistry {
    /// Registry without any factories.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtin_filters(&mut registry);
        register_builtin_processors(&mut registry);
        register_builtin_io(&mut registry);
        registry
    }

    pub fn register_filter<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&ComponentRegistry, &Value) -> Result<Box<dyn Filter>> + Send + Sync + 'static,
    {
        self.filters.insert(tag.into(), Box::new(factory));
    }

    pub fn register_processor<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&ComponentRegistry, &Value) -> Result<Box<dyn Processor>> + Send + Sync + 'static,
    {
        self.processors.insert(tag.into(), Box::new(factory));
    }

    pub fn register_source<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Source>> + Send + Sync + 'static,
    {
        self.sources.insert(tag.into(), Box::new(factory));
    }

    pub fn register_sink<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Sink>> + Send + Sync + 'static,
    {
        self.sinks.insert(tag.into(), Box::new(factory));
    }

    pub fn register_service<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<ServiceHandle> + Send + Sync + 'static,
    {
        self.services.insert(tag.into(), Box::new(factory));
    }

    pub fn build_filter(&self, config: &ComponentConfig) -> Result<Box<dyn Filter>> {
        let factory = lookup(&self.filters, "filter", &config.kind)?;
        factory(self, &config.config)
    }

    pub fn build_processor(&self, config: &ComponentConfig) -> Result<Box<dyn Processor>> {
        let factory = lookup(&self.processors, "processor", &config.kind)?;
        factory(self, &config.config)
    }

    pub fn build_source(&self, config: &ComponentConfig) -> Result<Arc<dyn Source>> {
        lookup(&self.sources, "source", &config.kind)?(&config.config)
    }

    pub fn build_sink(&self, config: &ComponentConfig) -> Result<Arc<dyn Sink>> {
        lookup(&self.sinks, "sink", &config.kind)?(&config.config)
    }

    pub fn build_service(&self, config: &ComponentConfig) -> Result<ServiceHandle> {
        lookup(&self.services, "service", &config.kind)?(&config.config)
    }

    pub fn build_rule(&self, config: &RuleConfig) -> Result<Rule> {
        let mut builder = Rule::builder();
        if let Some(filter) = &config.filter {
            builder = builder.filter_boxed(self.build_filter(filter)?);
        }
        for processor in &config.then {
            builder = builder.add_boxed(self.build_processor(processor)?);
        }
        builder = builder.otherwise();
        for processor in &config.otherwise {
            builder = builder.add_boxed(self.build_processor(processor)?);
        }
        builder.build()
    }

    pub fn build_pipeline(&self, config: &PipelineConfig) -> Result<Pipeline> {
        let mut builder = Pipeline::builder();
        for (index, rule) in config.rules.iter().enumerate() {
            let rule = self.build_rule(rule).map_err(|e| match e {
                StreamError::InvalidConfig(message) => StreamError::InvalidConfig(format!(
                    "pipeline '{}' rule {}: {}",
                    config.name, index, message
                )),
                other => other,
            })?;
            builder.add_rule(rule);
        }
        Ok(builder.build())
    }

    /// Builds every component in `config` and registers it under its name.
    /// `data_sources` resolve `${...}` in source, sink and service settings.
    pub fn build_program(
        &self,
        config: &ProgramConfig,
        data_sources: &[&dyn ExprDataSource],
    ) -> Result<Program> {
        let mut program = Program::new();

        for source in &config.sources {
            let component = evaluated(&source.component, data_sources);
            program.add_source(source.name.as_str(), self.build_source(&component)?)?;
            debug!("Built source '{}' ({})", source.name, component.kind);
        }

        for sink in &config.sinks {
            let component = evaluated(&sink.component, data_sources);
            program.add_sink(sink.name.as_str(), self.build_sink(&component)?)?;
            debug!("Built sink '{}' ({})", sink.name, component.kind);
        }

        for service in &config.services {
            if program.source(&service.source).is_none() {
                return Err(StreamError::InvalidConfig(format!(
                    "service '{}' is attached to unknown source '{}'",
                    service.name, service.source
                )));
            }
            let component = evaluated(&service.component, data_sources);
            program.add_service_to_source(
                service.source.as_str(),
                service.name.as_str(),
                self.build_service(&component)?,
            )?;
        }

        for pipeline in &config.pipelines {
            program.add_pipeline(pipeline.name.as_str(), self.build_pipeline(pipeline)?)?;
            debug!(
                "Built pipeline '{}' with {} rule(s)",
                pipeline.name,
                pipeline.rules.len()
            );
        }

        Ok(program)
    }
}

fn lookup<'a, F>(table: &'a HashMap<String, F>, kind: &'static str, tag: &str) -> Result<&'a F> {
    table.get(tag).ok_or_else(|| StreamError::UnknownComponent {
        kind,
        tag: tag.to_string(),
    })
}

fn evaluated(component: &ComponentConfig, data_sources: &[&dyn ExprDataSource]) -> ComponentConfig {
    ComponentConfig::new(
        component.kind.as_str(),
        evaluate_json(&component.config, data_sources),
    )
}

/// Deserializes a component's settings. A missing `config` counts as `{}`.
pub fn settings<T: DeserializeOwned>(tag: &str, config: &Value) -> Result<T> {
    let value = match config {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| StreamError::InvalidConfig(format!("{}: {}", tag, e)))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldValue {
    field: String,
    value: Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldOnly {
    field: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldPattern {
    field: String,
    pattern: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpressionExpected {
    expression: String,
    expected: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FlagOnly {
    flag: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Nested {
    filter: ComponentConfig,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NestedList {
    filters: Vec<ComponentConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SinkName {
    sink: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FromTo {
    from: String,
    to: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionalReason {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Reason {
    reason: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FlagValue {
    flag: String,
    #[serde(default = "default_true")]
    value: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionalPipeline {
    #[serde(default)]
    pipeline: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSettings {
    template: String,
    #[serde(default)]
    level: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ForEachSettings {
    field: String,
    pipeline: String,
    #[serde(default)]
    item_field: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LinesInput {
    path: PathBuf,
    pipeline: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LinesOutput {
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoSettings {}

fn register_builtin_filters(registry: &mut ComponentRegistry) {
    registry.register_filter("field_equals", |_, config| {
        let s: FieldValue = settings("field_equals", config)?;
        Ok(Box::new(filters::FieldEquals::new(s.field, s.value)))
    });
    registry.register_filter("field_exists", |_, config| {
        let s: FieldOnly = settings("field_exists", config)?;
        Ok(Box::new(filters::FieldExists::new(s.field)))
    });
    registry.register_filter("field_matches", |_, config| {
        let s: FieldPattern = settings("field_matches", config)?;
        Ok(Box::new(filters::FieldMatches::new(s.field, &s.pattern)?))
    });
    registry.register_filter("expression_equals", |_, config| {
        let s: ExpressionExpected = settings("expression_equals", config)?;
        Ok(Box::new(filters::ExpressionEquals::new(s.expression, s.expected)))
    });
    registry.register_filter("flag_set", |_, config| {
        let s: FlagOnly = settings("flag_set", config)?;
        Ok(Box::new(filters::FlagSet::new(s.flag)))
    });
    registry.register_filter("not", |registry, config| {
        let s: Nested = settings("not", config)?;
        Ok(Box::new(filters::Not::new(registry.build_filter(&s.filter)?)))
    });
    registry.register_filter("all_of", |registry, config| {
        let s: NestedList = settings("all_of", config)?;
        let children = s
            .filters
            .iter()
            .map(|child| registry.build_filter(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(filters::AllOf::new(children)))
    });
    registry.register_filter("any_of", |registry, config| {
        let s: NestedList = settings("any_of", config)?;
        let children = s
            .filters
            .iter()
            .map(|child| registry.build_filter(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(filters::AnyOf::new(children)))
    });
}

fn register_builtin_processors(registry: &mut ComponentRegistry) {
    registry.register_processor("send_to_sink", |_, config| {
        let s: SinkName = settings("send_to_sink", config)?;
        Ok(Box::new(processors::SendToSink::new(s.sink)))
    });
    registry.register_processor("set_field", |_, config| {
        let s: FieldValue = settings("set_field", config)?;
        Ok(Box::new(processors::SetField::new(s.field, s.value)))
    });
    registry.register_processor("copy_field", |_, config| {
        let s: FromTo = settings("copy_field", config)?;
        Ok(Box::new(processors::CopyField::new(s.from, s.to)))
    });
    registry.register_processor("remove_field", |_, config| {
        let s: FieldOnly = settings("remove_field", config)?;
        Ok(Box::new(processors::RemoveField::new(s.field)))
    });
    registry.register_processor("append_value", |_, config| {
        let s: FieldValue = settings("append_value", config)?;
        Ok(Box::new(processors::AppendValue::new(s.field, s.value)))
    });
    registry.register_processor("stop", |_, config| {
        let s: OptionalReason = settings("stop", config)?;
        Ok(Box::new(processors::Stop::new(s.reason)))
    });
    registry.register_processor("fail_stream", |_, config| {
        let s: Reason = settings("fail_stream", config)?;
        Ok(Box::new(processors::FailStream::new(s.reason)))
    });
    registry.register_processor("set_flag", |_, config| {
        let s: FlagValue = settings("set_flag", config)?;
        Ok(Box::new(processors::SetFlag::new(s.flag, s.value)))
    });
    registry.register_processor("requeue", |_, config| {
        let s: OptionalPipeline = settings("requeue", config)?;
        Ok(Box::new(processors::Requeue::new(s.pipeline)))
    });
    registry.register_processor("log", |_, config| {
        let s: LogSettings = settings("log", config)?;
        let level = match s.level {
            Some(level) => level.parse()?,
            None => processors::LogLevel::default(),
        };
        Ok(Box::new(processors::Log::new(s.template, level)))
    });
    registry.register_processor("add_timestamp", |_, config| {
        let s: FieldOnly = settings("add_timestamp", config)?;
        Ok(Box::new(processors::AddTimestamp::new(s.field)))
    });
    registry.register_processor("add_uuid", |_, config| {
        let s: FieldOnly = settings("add_uuid", config)?;
        Ok(Box::new(processors::AddUuid::new(s.field)))
    });
    registry.register_processor("for_each", |_, config| {
        let s: ForEachSettings = settings("for_each", config)?;
        let mut processor = processors::ForEach::new(s.field, s.pipeline);
        if let Some(item_field) = s.item_field {
            processor = processor.with_item_field(item_field);
        }
        Ok(Box::new(processor))
    });
}

fn register_builtin_io(registry: &mut ComponentRegistry) {
    registry.register_source("memory", |config| {
        let _: NoSettings = settings("memory", config)?;
        Ok(Arc::new(sources::MemorySource::new()))
    });
    registry.register_source("jsonl", |config| {
        let s: LinesInput = settings("jsonl", config)?;
        Ok(Arc::new(sources::JsonLinesSource::open(s.path, s.pipeline)?))
    });
    registry.register_sink("memory", |config| {
        let _: NoSettings = settings("memory", config)?;
        Ok(Arc::new(sinks::MemorySink::new()))
    });
    registry.register_sink("jsonl", |config| {
        let s: LinesOutput = settings("jsonl", config)?;
        Ok(match s.path {
            Some(path) => Arc::new(sinks::JsonLinesSink::create(path)?),
            None => Arc::new(sinks::JsonLinesSink::stdout()),
        })
    });
}
