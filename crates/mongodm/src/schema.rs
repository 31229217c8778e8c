//! Schema declaration and validation
//!
//! A schema maps field names to a [`FieldSpec`]: a required type, an optional
//! default value and an optional single-field index. Declarations are plain
//! BSON documents, so a document type can carry its schema as data:
//!
//! ```ignore
//! use bson::doc;
//!
//! let schema = Schema::from_declaration(&doc! {
//!     "name": { "type": "string", "default": "my_default_name", "index": -1 },
//!     "sex": { "type": "bool" },
//!     "age": { "type": "int", "default": 20, "index": 1 },
//!     "createdAt": { "type": "datetime", "index": -1 },
//!     "updatedAt": { "type": "datetime" },
//! })?;
//! ```
//!
//! Every declaration is validated exactly once, when the owning document type
//! is compiled. The compiled [`Schema`] is immutable afterwards.

use bson::{Bson, Document as BsonDocument};
use mongodm_common::{MongoDmError, Result};
use std::fmt;
use std::str::FromStr;

/// Field stamped on the first save when declared in the schema
pub const CREATED_AT: &str = "createdAt";

/// Field stamped on every save when declared in the schema
pub const UPDATED_AT: &str = "updatedAt";

/// The only keys a field descriptor may carry
const DESCRIPTOR_KEYS: [&str; 3] = ["type", "default", "index"];

/// Index kinds as they are written in declarations
const INDEX_KINDS_DISPLAY: &str = "[1, -1, '2d', '2dsphere', 'hashed', 'text']";

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    /// 32 or 64-bit integer
    Int,
    Double,
    Bool,
    DateTime,
    ObjectId,
    Array,
    Document,
    Binary,
    Decimal128,
    /// Any value (no type check)
    Any,
}

impl FieldType {
    /// Canonical name used in declarations and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::DateTime => "datetime",
            FieldType::ObjectId => "objectid",
            FieldType::Array => "array",
            FieldType::Document => "document",
            FieldType::Binary => "binary",
            FieldType::Decimal128 => "decimal",
            FieldType::Any => "any",
        }
    }

    /// Whether `value` is an instance of this type
    pub fn matches(&self, value: &Bson) -> bool {
        match self {
            FieldType::String => matches!(value, Bson::String(_)),
            FieldType::Int => matches!(value, Bson::Int32(_) | Bson::Int64(_)),
            FieldType::Double => matches!(value, Bson::Double(_)),
            FieldType::Bool => matches!(value, Bson::Boolean(_)),
            FieldType::DateTime => matches!(value, Bson::DateTime(_)),
            FieldType::ObjectId => matches!(value, Bson::ObjectId(_)),
            FieldType::Array => matches!(value, Bson::Array(_)),
            FieldType::Document => matches!(value, Bson::Document(_)),
            FieldType::Binary => matches!(value, Bson::Binary(_)),
            FieldType::Decimal128 => matches!(value, Bson::Decimal128(_)),
            FieldType::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for FieldType {
    type Err = MongoDmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" | "str" => Ok(FieldType::String),
            "int" | "integer" => Ok(FieldType::Int),
            "double" | "float" => Ok(FieldType::Double),
            "bool" | "boolean" => Ok(FieldType::Bool),
            "datetime" | "date" => Ok(FieldType::DateTime),
            "objectid" => Ok(FieldType::ObjectId),
            "array" | "list" => Ok(FieldType::Array),
            "document" | "dict" | "object" => Ok(FieldType::Document),
            "binary" | "bytes" => Ok(FieldType::Binary),
            "decimal" | "decimal128" => Ok(FieldType::Decimal128),
            "any" => Ok(FieldType::Any),
            other => Err(MongoDmError::Schema(format!(
                "unsupported field type '{}'",
                other
            ))),
        }
    }
}

/// Get the BSON type name of a value for error messages
pub(crate) fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectid",
        Bson::DateTime(_) => "datetime",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal",
        _ => "unknown",
    }
}

/// Single-field index kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// `1`
    Ascending,
    /// `-1`
    Descending,
    /// `"2d"`
    Geo2d,
    /// `"2dsphere"`
    GeoSphere,
    /// `"hashed"`
    Hashed,
    /// `"text"`
    Text,
}

impl IndexKind {
    /// Parse the declaration form of an index kind
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(1) | Bson::Int64(1) => Some(IndexKind::Ascending),
            Bson::Int32(-1) | Bson::Int64(-1) => Some(IndexKind::Descending),
            Bson::Double(f) if *f == 1.0 => Some(IndexKind::Ascending),
            Bson::Double(f) if *f == -1.0 => Some(IndexKind::Descending),
            Bson::String(s) => match s.as_str() {
                "2d" => Some(IndexKind::Geo2d),
                "2dsphere" => Some(IndexKind::GeoSphere),
                "hashed" => Some(IndexKind::Hashed),
                "text" => Some(IndexKind::Text),
                _ => None,
            },
            _ => None,
        }
    }

    /// Value used in an index key document
    pub fn to_bson(&self) -> Bson {
        match self {
            IndexKind::Ascending => Bson::Int32(1),
            IndexKind::Descending => Bson::Int32(-1),
            IndexKind::Geo2d => Bson::String("2d".to_string()),
            IndexKind::GeoSphere => Bson::String("2dsphere".to_string()),
            IndexKind::Hashed => Bson::String("hashed".to_string()),
            IndexKind::Text => Bson::String("text".to_string()),
        }
    }

    /// Token used when generating index names (`age_1`, `loc_2dsphere`)
    pub fn token(&self) -> &'static str {
        match self {
            IndexKind::Ascending => "1",
            IndexKind::Descending => "-1",
            IndexKind::Geo2d => "2d",
            IndexKind::GeoSphere => "2dsphere",
            IndexKind::Hashed => "hashed",
            IndexKind::Text => "text",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Ordered index key list, e.g. `[("name", Ascending), ("createdAt", Descending)]`
pub type IndexKeys = Vec<(String, IndexKind)>;

/// Build the index key document for an ordered key list
pub fn index_keys_document(keys: &[(String, IndexKind)]) -> BsonDocument {
    keys.iter()
        .map(|(field, kind)| (field.clone(), kind.to_bson()))
        .collect()
}

/// Compiled definition of a single field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    field_type: FieldType,
    default: Option<Bson>,
    index: Option<IndexKind>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            default: None,
            index: None,
        }
    }

    /// Set the default applied when an instance is constructed
    pub fn default(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Declare a single-field index
    pub fn index(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn default_value(&self) -> Option<&Bson> {
        self.default.as_ref()
    }

    pub fn index_kind(&self) -> Option<IndexKind> {
        self.index
    }

    /// The declaration form of this field, as accepted by [`Schema::from_declaration`]
    pub fn to_declaration(&self) -> BsonDocument {
        let mut declaration = BsonDocument::new();
        declaration.insert("type", self.field_type.type_name());
        if let Some(default) = &self.default {
            declaration.insert("default", default.clone());
        }
        if let Some(index) = self.index {
            declaration.insert("index", index.to_bson());
        }
        declaration
    }
}

/// Compiled, validated schema of a document type
///
/// Field order is declaration order; it drives default application and
/// index creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldSpec)>,
}

impl Schema {
    /// Schema with no fields
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Validate a declaration and compile it
    ///
    /// Fields are checked in declaration order and the first violation is
    /// returned:
    /// 1. the descriptor must be a document
    /// 2. it must contain `type`, naming a supported [`FieldType`]
    /// 3. a `default` must be an instance of `type`
    /// 4. an `index` must be one of the [`IndexKind`] values
    /// 5. no key outside `type`, `default`, `index`
    pub fn from_declaration(declaration: &BsonDocument) -> Result<Self> {
        let mut fields = Vec::with_capacity(declaration.len());
        for (name, definition) in declaration {
            fields.push((name.clone(), compile_field(name, definition)?));
        }
        Ok(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Fields declaring an index, in declaration order
    pub fn indexed_fields(&self) -> impl Iterator<Item = (&str, IndexKind)> {
        self.fields
            .iter()
            .filter_map(|(name, spec)| spec.index.map(|kind| (name.as_str(), kind)))
    }

    /// Fields declaring a default, in declaration order
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.fields
            .iter()
            .filter_map(|(name, spec)| spec.default.as_ref().map(|value| (name.as_str(), value)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn compile_field(name: &str, definition: &Bson) -> Result<FieldSpec> {
    let definition = match definition {
        Bson::Document(definition) => definition,
        _ => {
            return Err(MongoDmError::Schema(format!(
                "field '{}' has error definition",
                name
            )))
        }
    };

    let type_value = definition.get("type").ok_or_else(|| {
        MongoDmError::Schema(format!("field '{}' not has 'type' definition", name))
    })?;

    let field_type = match type_value {
        Bson::String(type_name) => type_name.parse::<FieldType>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        MongoDmError::Schema(format!(
            "field '{}' type {} is not supported",
            name, type_value
        ))
    })?;

    let default = match definition.get("default") {
        Some(value) if !field_type.matches(value) => {
            return Err(MongoDmError::Schema(format!(
                "field '{}' default value has error type",
                name
            )))
        }
        other => other.cloned(),
    };

    let index = match definition.get("index") {
        Some(value) => Some(IndexKind::from_bson(value).ok_or_else(|| {
            MongoDmError::Schema(format!(
                "field '{}' index value not as {}",
                name, INDEX_KINDS_DISPLAY
            ))
        })?),
        None => None,
    };

    let unknown_keys: Vec<String> = definition
        .keys()
        .filter(|key| !DESCRIPTOR_KEYS.contains(&key.as_str()))
        .map(|key| format!("'{}'", key))
        .collect();
    if !unknown_keys.is_empty() {
        return Err(MongoDmError::Schema(format!(
            "field '{}' has error definition key [{}]",
            name,
            unknown_keys.join(", ")
        )));
    }

    Ok(FieldSpec {
        field_type,
        default,
        index,
    })
}

/// Typed construction of a [`Schema`]
///
/// Builder input is converted to its declaration form on [`build`](Self::build)
/// and runs through the same validator as a raw declaration.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    fields: Vec<(String, FieldSpec)>,
}

impl SchemaBuilder {
    /// Add a field, replacing an earlier definition of the same name in place
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = spec,
            None => self.fields.push((name, spec)),
        }
        self
    }

    /// Add every field of `base`
    pub fn extend(self, base: &Schema) -> Self {
        base.fields
            .iter()
            .fold(self, |builder, (name, spec)| builder.field(name.clone(), spec.clone()))
    }

    pub fn build(self) -> Result<Schema> {
        let declaration: BsonDocument = self
            .fields
            .iter()
            .map(|(name, spec)| (name.clone(), Bson::Document(spec.to_declaration())))
            .collect();
        Schema::from_declaration(&declaration)
    }
}
