use thiserror::Error;

/// Handler-level errors. These never escape the dispatch boundary: the
/// engine converts them into FAILED execution results carrying the message.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Unknown subtype '{subtype}' for {node_type} node")]
    UnknownSubtype { node_type: String, subtype: String },
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Formula error: {0}")]
    FormulaError(String),
    #[error("Suspension not supported here: {0}")]
    SuspensionUnsupported(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
