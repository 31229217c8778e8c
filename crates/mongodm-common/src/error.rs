//! Error types for mongodm

use thiserror::Error;

/// Result type alias for mongodm operations
pub type Result<T> = std::result::Result<T, MongoDmError>;

/// Unified error type for all mongodm operations
///
/// The first five variants are the document-mapper failures callers are
/// expected to match on. The remaining ones carry failures from the driver
/// and the ambient configuration layer.
#[derive(Error, Debug, Clone)]
pub enum MongoDmError {
    /// Malformed schema declaration; the document type cannot be used.
    #[error("Schema definition error: {0}")]
    Schema(String),

    /// Collection resolution attempted without a URL or a bound client.
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// Health probe against a freshly initialized client failed.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Field access or mutation violates the schema.
    #[error("Attribute error: {0}")]
    Attribute(String),

    /// The operation needs a persisted document, or a by-id lookup failed.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Raised by user `pre_save` / `after_save` hooks.
    #[error("Hook error: {0}")]
    Hook(String),
}

impl MongoDmError {
    /// Returns true for errors signalling a missing or unsaved document
    pub fn is_not_found(&self) -> bool {
        matches!(self, MongoDmError::DocumentNotFound(_))
    }

    /// Returns true for schema declaration errors
    pub fn is_schema_error(&self) -> bool {
        matches!(self, MongoDmError::Schema(_))
    }

    /// Returns true for field access errors
    pub fn is_attribute_error(&self) -> bool {
        matches!(self, MongoDmError::Attribute(_))
    }

    /// The message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            MongoDmError::Schema(m)
            | MongoDmError::MissingConfiguration(m)
            | MongoDmError::Connect(m)
            | MongoDmError::Attribute(m)
            | MongoDmError::DocumentNotFound(m)
            | MongoDmError::MongoDB(m)
            | MongoDmError::Serialization(m)
            | MongoDmError::Deserialization(m)
            | MongoDmError::Validation(m)
            | MongoDmError::Configuration(m)
            | MongoDmError::Unsupported(m)
            | MongoDmError::Hook(m) => m,
        }
    }
}

impl From<serde_json::Error> for MongoDmError {
    fn from(err: serde_json::Error) -> Self {
        MongoDmError::Deserialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for MongoDmError {
    fn from(err: mongodb::error::Error) -> Self {
        MongoDmError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for MongoDmError {
    fn from(err: bson::ser::Error) -> Self {
        MongoDmError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for MongoDmError {
    fn from(err: bson::de::Error) -> Self {
        MongoDmError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_schema() {
        let err = MongoDmError::Schema("field 'name' has error definition".to_string());
        assert_eq!(
            err.to_string(),
            "Schema definition error: field 'name' has error definition"
        );
    }

    #[test]
    fn test_error_display_attribute() {
        let err = MongoDmError::Attribute("'User' object has no attribute 'x'".to_string());
        assert_eq!(err.to_string(), "Attribute error: 'User' object has no attribute 'x'");
    }

    #[test]
    fn test_error_display_not_found() {
        let err = MongoDmError::DocumentNotFound("oid is None".to_string());
        assert_eq!(err.to_string(), "Document not found: oid is None");
    }

    #[test]
    fn test_error_display_mongodb() {
        let err = MongoDmError::MongoDB("connection refused".to_string());
        assert_eq!(err.to_string(), "MongoDB error: connection refused");
    }

    #[test]
    fn test_message_strips_prefix() {
        let err = MongoDmError::Connect("mongodb connecting error.".to_string());
        assert_eq!(err.message(), "mongodb connecting error.");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: MongoDmError = json_err.into();
        assert!(matches!(err, MongoDmError::Deserialization(_)));
    }

    #[test]
    fn test_predicates() {
        assert!(MongoDmError::DocumentNotFound("x".to_string()).is_not_found());
        assert!(!MongoDmError::Attribute("x".to_string()).is_not_found());
        assert!(MongoDmError::Schema("x".to_string()).is_schema_error());
        assert!(MongoDmError::Attribute("x".to_string()).is_attribute_error());
        assert!(!MongoDmError::Hook("x".to_string()).is_attribute_error());
    }
}
