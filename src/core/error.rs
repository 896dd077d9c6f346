use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook delivery error: {0}")]
    Delivery(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GatewayError {
    /// True for failures of the coordination backend itself (as opposed to
    /// malformed data or missing records).
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_errors_map_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let mapped = GatewayError::from(err);
        assert!(matches!(mapped, GatewayError::Serialization(_)));
        assert!(!mapped.is_backend());
    }

    #[test]
    fn display_includes_context() {
        let err = GatewayError::NotFound("instance abc".to_string());
        assert_eq!(err.to_string(), "'instance abc' not found");
    }
}
