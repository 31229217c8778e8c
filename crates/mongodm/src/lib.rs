//! Schema-enforcing async document mapper for MongoDB
//!
//! Document types declare a schema once; instances are checked on every
//! write and persisted through a lazily resolved, per-type collection.
//!
//! # Features
//! - Declarative schemas with type, default and index per field
//! - Schema-checked document instances with `save`, `delete`, `refresh`
//! - Named client registry, injectable per document type, with a
//!   registry-wide default client set by [`init_db`]
//! - Index management from the schema or explicit key lists
//! - In-process driver for running without a server

pub mod collection;
pub mod connection;
pub mod document;
pub mod driver;
pub mod memory;
pub mod model;
pub mod registry;
pub mod schema;
pub mod validation;

pub use collection::{ClassBinding, ClassConfig, DEFAULT_DB_NAME};
pub use connection::{ClientConfig, MongoClient, MongoCollection, MongoConnector};
pub use document::{Document, ID_KEY};
pub use driver::{CollectionHandle, Connector, DatabaseClient, DocumentCursor};
pub use memory::{MemoryClient, MemoryCollection, MemoryConnector};
pub use model::{ClassCell, Declaration, DocumentClass, Model};
pub use registry::{init_db, ClientRegistry, DefaultBinding, DEFAULT_CLIENT_NAME, DEFAULT_URL};
pub use schema::{FieldSpec, FieldType, IndexKind, Schema, SchemaBuilder, CREATED_AT, UPDATED_AT};
pub use validation::{parse_object_id, ValidatedCollectionName};

pub use async_trait::async_trait;
pub use bson;
pub use mongodb::{options, ClientSession};
pub use mongodm_common::{MongoDmError, Result};
