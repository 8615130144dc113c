use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    /// Values available as `${name}` inside component configuration.
    pub variables: Map<String, Value>,
    pub program: ProgramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single source read, so workers re-check EOF and failure.
    pub poll_timeout_ms: u64,
    pub worker_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 500,
            worker_name_prefix: "stream-worker".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "rustream".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> crate::Result<tracing::Level> {
        self.level.parse().map_err(|_| {
            crate::error::StreamError::InvalidConfig(format!(
                "logging.level '{}' is not a valid level",
                self.level
            ))
        })
    }
}

/// Sources, sinks, services and pipelines, assembled by the component registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    pub sources: Vec<NamedComponentConfig>,
    pub sinks: Vec<NamedComponentConfig>,
    pub services: Vec<ServiceConfig>,
    pub pipelines: Vec<PipelineConfig>,
}

/// A component is identified by a registry type tag plus free-form settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>, config: Value) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedComponentConfig {
    pub name: String,
    #[serde(flatten)]
    pub component: ComponentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub source: String,
    pub name: String,
    #[serde(flatten)]
    pub component: ComponentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub filter: Option<ComponentConfig>,
    #[serde(default)]
    pub then: Vec<ComponentConfig>,
    #[serde(default, rename = "else")]
    pub otherwise: Vec<ComponentConfig>,
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::error::StreamError::Config(e.to_string()))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.engine.poll_timeout_ms == 0 {
            return Err(crate::error::StreamError::InvalidConfig(
                "engine.poll_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.engine.worker_name_prefix.is_empty() {
            return Err(crate::error::StreamError::InvalidConfig(
                "engine.worker_name_prefix cannot be empty".to_string(),
            ));
        }

        if self.metrics.namespace.is_empty()
            || !self
                .metrics
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(crate::error::StreamError::InvalidConfig(format!(
                "metrics.namespace '{}' must be non-empty and contain only [A-Za-z0-9_]",
                self.metrics.namespace
            )));
        }

        self.logging.tracing_level()?;

        for pipeline in &self.program.pipelines {
            for (index, rule) in pipeline.rules.iter().enumerate() {
                if rule.filter.is_none() && !rule.otherwise.is_empty() {
                    return Err(crate::error::StreamError::InvalidConfig(format!(
                        "pipeline '{}' rule {} has an else chain but no filter",
                        pipeline.name, index
                    )));
                }
            }
        }

        Ok(())
    }
}
