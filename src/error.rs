use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Interrupted while waiting for input")]
    Interrupted,

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Cannot convert '{text}' to {target}")]
    Coercion { text: String, target: &'static str },

    #[error("Required object not found: {0}")]
    MissingObject(String),

    #[error("Object '{name}' is not of type {expected}")]
    WrongType { name: String, expected: &'static str },

    #[error("Message body must be a JSON object")]
    NotAnObject,

    #[error("Duplicate {kind} name: {name}")]
    DuplicateComponent { kind: &'static str, name: String },

    #[error("Unknown {kind} type: {tag}")]
    UnknownComponent { kind: &'static str, tag: String },

    #[error("Source error: {0}")]
    Source(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl StreamError {
    /// Errors that end a worker without counting as a processing failure.
    pub fn is_interruption(&self) -> bool {
        match self {
            StreamError::Interrupted => true,
            StreamError::Io(e) => e.kind() == std::io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interruption_classification() {
        assert!(StreamError::Interrupted.is_interruption());
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "signal");
        assert!(StreamError::from(io).is_interruption());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(!StreamError::from(io).is_interruption());
        assert!(!StreamError::Processing("boom".to_string()).is_interruption());
    }

    #[test]
    fn test_error_messages() {
        let err = StreamError::Coercion {
            text: "abc".to_string(),
            target: "i64",
        };
        assert_eq!(err.to_string(), "Cannot convert 'abc' to i64");

        let err = StreamError::UnknownComponent {
            kind: "filter",
            tag: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown filter type: nope");
    }
}
