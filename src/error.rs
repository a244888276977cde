use thiserror::Error;

/// Main error type for ragas-eval
#[derive(Error, Debug)]
pub enum EvalError {
    /// Missing or invalid configuration / credentials. Fatal, raised before any item runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Strategy identifier outside the registered set
    #[error("Unknown retrieval strategy '{0}' (expected one of: naive, sparse-lexical, ensemble)")]
    UnknownStrategy(String),

    /// Transient failure from an external collaborator (generation, judge, embeddings, reranker).
    /// Recovered at item granularity by the pipeline.
    #[error("{service} error: {message}")]
    Collaborator { service: String, message: String },

    /// Malformed evaluation dataset
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding / decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Retrieval errors against the local corpus index
    #[error("Search error: {0}")]
    Search(String),
}

impl EvalError {
    /// Shorthand for a collaborator failure tagged with the service that produced it.
    pub fn collaborator(service: &str, message: impl Into<String>) -> Self {
        EvalError::Collaborator {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// True for errors that must terminate the run before any dataset item is processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EvalError::Configuration(_) | EvalError::UnknownStrategy(_) | EvalError::Dataset(_)
        )
    }
}

/// Convenient Result type using EvalError
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EvalError::Configuration("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_collaborator_display_names_service() {
        let err = EvalError::collaborator("openai-chat", "HTTP 429: rate limited");
        assert_eq!(err.to_string(), "openai-chat error: HTTP 429: rate limited");
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(EvalError::UnknownStrategy("hybrid".into()).is_configuration());
        assert!(EvalError::Dataset("duplicate id".into()).is_configuration());
        assert!(!EvalError::Search("fts".into()).is_configuration());
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: EvalError = rusqlite_err.into();
        assert!(matches!(err, EvalError::Database(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EvalError = io_err.into();
        assert!(matches!(err, EvalError::Io(_)));
    }
}
