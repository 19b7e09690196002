use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

/// Failures from the external inference service, normalized so task records
/// capture a single message verbatim.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
