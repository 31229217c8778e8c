//! Boundary with the database driver
//!
//! The document mapper never talks to the network itself. It drives these
//! traits, which are implemented over the `mongodb` crate in
//! [`connection`](crate::connection) and in-process in
//! [`memory`](crate::memory).
//!
//! Sessions are opaque: every operation takes an optional
//! `&mut ClientSession` and hands it to the driver unchanged. Driver option
//! structs are passed through the same way.

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use futures::stream::BoxStream;
use mongodb::options::{CountOptions, FindOneOptions, FindOptions, IndexOptions};
use mongodb::ClientSession;
use mongodm_common::Result;
use std::fmt;
use std::sync::Arc;

use crate::connection::ClientConfig;
use crate::schema::IndexKind;

/// Lazy stream of raw documents returned by `find`
pub type DocumentCursor<'a> = BoxStream<'a, Result<BsonDocument>>;

/// Builds database clients from a connection URL
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, config: &ClientConfig) -> Result<Arc<dyn DatabaseClient>>;
}

/// A live connection to a database deployment
#[async_trait]
pub trait DatabaseClient: fmt::Debug + Send + Sync {
    /// Handle to `collection` in `database`; no I/O happens here
    fn collection(&self, database: &str, collection: &str) -> Arc<dyn CollectionHandle>;

    /// Server information, used as a health probe
    async fn server_info(&self) -> Result<BsonDocument>;

    /// Start a session for transactional work
    async fn start_session(&self) -> Result<ClientSession>;
}

/// Operations on one collection
#[async_trait]
pub trait CollectionHandle: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn database_name(&self) -> &str;

    /// Insert a document and return its `_id`
    async fn insert_one(
        &self,
        document: &BsonDocument,
        session: Option<&mut ClientSession>,
    ) -> Result<Bson>;

    /// Replace the first match of `filter`; returns the matched count
    async fn replace_one(
        &self,
        filter: BsonDocument,
        replacement: &BsonDocument,
        session: Option<&mut ClientSession>,
    ) -> Result<u64>;

    /// Delete the first match of `filter`; returns the deleted count
    async fn delete_one(
        &self,
        filter: BsonDocument,
        session: Option<&mut ClientSession>,
    ) -> Result<u64>;

    async fn find_one(
        &self,
        filter: BsonDocument,
        options: Option<FindOneOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<BsonDocument>>;

    /// The returned cursor may borrow the session but never the handle
    async fn find<'a>(
        &self,
        filter: BsonDocument,
        options: Option<FindOptions>,
        session: Option<&'a mut ClientSession>,
    ) -> Result<DocumentCursor<'a>>;

    async fn count_documents(
        &self,
        filter: BsonDocument,
        options: Option<CountOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<u64>;

    /// Create one index over the ordered key list; returns its name
    async fn create_index(
        &self,
        keys: &[(String, IndexKind)],
        options: Option<IndexOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<String>;

    /// Index name mapped to `{ "key": {...}, ...options }`
    async fn index_information(&self, session: Option<&mut ClientSession>) -> Result<BsonDocument>;

    async fn drop_index(&self, name: &str, session: Option<&mut ClientSession>) -> Result<()>;

    /// Drop every index except `_id_`
    async fn drop_indexes(&self, session: Option<&mut ClientSession>) -> Result<()>;
}
