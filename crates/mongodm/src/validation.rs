//! Input validation for names and identifiers
//!
//! Collection names come from declarations, JSON config and the
//! environment, so they are checked before they reach the driver.

use bson::{oid::ObjectId, Bson};
use mongodm_common::{MongoDmError, Result};

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Validated collection name
///
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(MongoDmError::Validation(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(MongoDmError::Validation(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(MongoDmError::Validation(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(MongoDmError::Validation(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(MongoDmError::Validation(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Parse an identifier for a by-id lookup
///
/// `ObjectId` values pass through and strings must be 24 hex characters.
/// Anything else is reported as [`MongoDmError::DocumentNotFound`] with the
/// reason, since no document can carry such an id.
pub fn parse_object_id(value: &Bson) -> Result<ObjectId> {
    match value {
        Bson::ObjectId(oid) => Ok(*oid),
        Bson::String(hex) => ObjectId::parse_str(hex).map_err(|e| {
            MongoDmError::DocumentNotFound(format!("'{}' is not a valid ObjectId: {}", hex, e))
        }),
        other => Err(MongoDmError::DocumentNotFound(format!(
            "{} is not a valid ObjectId, it must be a 12-byte input or a 24-character hex string",
            other
        ))),
    }
}

/// Whether `value` counts as "no id" for by-id operations
pub(crate) fn is_empty_id(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::String(s) => s.is_empty(),
        _ => false,
    }
}
