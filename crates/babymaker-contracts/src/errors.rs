use thiserror::Error;

/// Every failure a generation session can surface.
///
/// Library code returns these instead of panicking; the orchestrator turns
/// them into failed results and the CLI into a readable line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid option for {field}: '{value}'")]
    InvalidOption { field: String, value: String },
    #[error("no '{key}' entry in the {table} prompt table")]
    UnknownOption { table: String, key: String },
    #[error("validation failed for {}: {message}", .field.as_deref().unwrap_or("request"))]
    ValidationError {
        field: Option<String>,
        message: String,
    },
    #[error("remote generation failed: {0}")]
    RemoteFailure(String),
    #[error("storage failed: {0}")]
    StorageFailure(String),
}

impl GenerationError {
    pub fn validation(field: Option<&str>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::InvalidOption { .. } => "invalid_option",
            Self::UnknownOption { .. } => "unknown_option",
            Self::ValidationError { .. } => "validation_error",
            Self::RemoteFailure(_) => "remote_failure",
            Self::StorageFailure(_) => "storage_failure",
        }
    }

    /// Short text meant for the person who pressed "generate".
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured(detail) => {
                format!("Replicate is not configured ({detail}). Set REPLICATE_API_TOKEN in your environment or .env file.")
            }
            Self::InvalidOption { field, value } => {
                format!("'{value}' is not a valid choice for {field}.")
            }
            Self::UnknownOption { table, key } => {
                format!("No prompt wording is defined for '{key}' ({table}).")
            }
            Self::ValidationError { .. } => format!("The request was rejected: {self}."),
            Self::RemoteFailure(detail) => format!("Image generation failed: {detail}"),
            Self::StorageFailure(detail) => format!("The image could not be saved: {detail}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GenerationError;

    #[test]
    fn validation_error_names_the_field() {
        let err = GenerationError::validation(Some("parent_images"), "expected 2 to 4 images");
        assert_eq!(
            err.to_string(),
            "validation failed for parent_images: expected 2 to 4 images"
        );
        let err = GenerationError::validation(None, "bad input");
        assert_eq!(err.to_string(), "validation failed for request: bad input");
    }

    #[test]
    fn kind_is_stable_snake_case() {
        let err = GenerationError::InvalidOption {
            field: "style".to_string(),
            value: "Watercolor".to_string(),
        };
        assert_eq!(err.kind(), "invalid_option");
        assert_eq!(
            GenerationError::StorageFailure("disk full".to_string()).kind(),
            "storage_failure"
        );
    }

    #[test]
    fn not_configured_message_mentions_token() {
        let err = GenerationError::NotConfigured("missing API token".to_string());
        assert!(err.user_message().contains("REPLICATE_API_TOKEN"));
    }
}
