//! Schema-checked document instances
//!
//! [`Document<M>`] wraps an insertion-ordered BSON document. Every write is
//! checked against the compiled schema of `M`; `_id` is exempt. The
//! type-level operations (lookups, counts, index management, connection
//! setup) live here too, as associated functions of `Document<M>`.

use bson::{doc, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::options::{CountOptions, FindOneOptions, FindOptions, IndexOptions};
use mongodb::ClientSession;
use mongodm_common::{MongoDmError, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::connection::{check_client_health, ClientConfig};
use crate::driver::{CollectionHandle, DatabaseClient, DocumentCursor};
use crate::model::{DocumentClass, Model};
use crate::schema::{bson_type_name, IndexKind, CREATED_AT, UPDATED_AT};
use crate::validation::{is_empty_id, parse_object_id};

/// Identity key assigned by the database on first insert
pub const ID_KEY: &str = "_id";

/// Entries shown by `Display`/`Debug`
const DISPLAY_MAX_ENTRIES: usize = 4;

/// Longest value rendering shown unshortened by `Display`/`Debug`
const DISPLAY_MAX_VALUE: usize = 30;

/// A document of type `M`
pub struct Document<M: Model> {
    data: BsonDocument,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Document<M> {
    /// New instance with every schema default applied
    pub fn new() -> Result<Self> {
        let class = M::class()?;
        let data = class
            .schema()
            .defaults()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Ok(Self {
            data,
            _model: PhantomData,
        })
    }

    /// New instance with defaults, then `fields` applied through [`set`](Self::set)
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bson>,
    {
        let mut document = Self::new()?;
        for (key, value) in fields {
            document.set(key, value)?;
        }
        Ok(document)
    }

    fn from_raw(raw: BsonDocument) -> Result<Self> {
        Self::from_fields(raw)
    }

    fn class() -> Result<&'static DocumentClass> {
        M::class()
    }

    // =====================
    // Field access
    // =====================

    pub fn get(&self, key: &str) -> Result<&Bson> {
        self.data.get(key).ok_or_else(|| missing_attribute::<M>(key))
    }

    pub fn try_get(&self, key: &str) -> Option<&Bson> {
        self.data.get(key)
    }

    /// Deserialize one field into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(bson::from_bson(self.get(key)?.clone())?)
    }

    /// Store `value` under `key`
    ///
    /// Fails with [`MongoDmError::Attribute`] when `key` is not declared or
    /// the value does not have the declared type. New keys are appended;
    /// existing keys keep their position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if key != ID_KEY {
            let class = Self::class()?;
            let spec = class.schema().get(&key).ok_or_else(|| {
                MongoDmError::Attribute(format!(
                    "'{}' object has no attribute '{}' definition",
                    M::NAME,
                    key
                ))
            })?;
            if !spec.field_type().matches(&value) {
                debug!(
                    document = M::NAME,
                    field = %key,
                    got = bson_type_name(&value),
                    "Rejected value of the wrong type"
                );
                return Err(MongoDmError::Attribute(format!(
                    "in '{}', '{}' has not correct type {}",
                    M::NAME,
                    key,
                    spec.field_type()
                )));
            }
        }
        self.data.insert(key, value);
        Ok(())
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &str) -> Result<Bson> {
        self.data.remove(key).ok_or_else(|| missing_attribute::<M>(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.data.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn id(&self) -> Option<&Bson> {
        self.data.get(ID_KEY)
    }

    /// Whether the document carries an identity key
    pub fn is_persisted(&self) -> bool {
        self.data.contains_key(ID_KEY)
    }

    pub fn data(&self) -> &BsonDocument {
        &self.data
    }

    pub fn into_data(self) -> BsonDocument {
        self.data
    }

    /// Stamp `createdAt` (first save only) and `updatedAt` when declared
    pub fn touch_timestamps(&mut self) -> Result<()> {
        let schema = Self::class()?.schema();
        let now = bson::DateTime::from_chrono(chrono::Utc::now());
        if !self.is_persisted() && schema.contains(CREATED_AT) {
            self.set(CREATED_AT, now)?;
        }
        if schema.contains(UPDATED_AT) {
            self.set(UPDATED_AT, now)?;
        }
        Ok(())
    }

    // =====================
    // Persistence
    // =====================

    /// Collection of this document, resolved through its type
    pub async fn collection(&self) -> Result<Arc<dyn CollectionHandle>> {
        Self::resolve_collection().await
    }

    /// Insert when not yet persisted, otherwise replace by `_id`
    ///
    /// `pre_save` runs before the write and `after_save` after it. An
    /// `after_save` failure is returned although the write has happened.
    ///
    /// The replace path does not upsert: a document given an `_id` by hand
    /// before its first save matches nothing, and `save` still returns `Ok`
    /// without writing anything.
    pub async fn save(&mut self, mut session: Option<&mut ClientSession>) -> Result<&mut Self> {
        let existing_id = self.id().cloned();
        debug!(document = M::NAME, persisted = existing_id.is_some(), "pre_save");
        M::pre_save(self).await?;

        let collection = Self::resolve_collection().await?;
        match existing_id {
            None => {
                let id = collection
                    .insert_one(&self.data, session.as_deref_mut())
                    .await?;
                self.data.insert(ID_KEY, id);
            }
            Some(id) => {
                collection
                    .replace_one(doc! { ID_KEY: id }, &self.data, session.as_deref_mut())
                    .await?;
            }
        }

        M::after_save(self).await?;
        Ok(self)
    }

    /// Delete by `_id`; the key is dropped from this instance when a
    /// document was actually deleted
    pub async fn delete(&mut self, session: Option<&mut ClientSession>) -> Result<u64> {
        let id = self.require_id()?;
        let collection = Self::resolve_collection().await?;
        let deleted = collection.delete_one(doc! { ID_KEY: id }, session).await?;
        if deleted > 0 {
            self.data.remove(ID_KEY);
        }
        Ok(deleted)
    }

    /// Replace the stored data with the current database copy
    ///
    /// Unsaved edits are discarded. If the document no longer exists the
    /// data is left untouched and [`MongoDmError::DocumentNotFound`] is
    /// returned.
    pub async fn refresh(&mut self, session: Option<&mut ClientSession>) -> Result<&mut Self> {
        let id = self.require_id()?;
        let collection = Self::resolve_collection().await?;
        let fetched = collection
            .find_one(doc! { ID_KEY: id.clone() }, None, session)
            .await?;
        match fetched {
            Some(data) => {
                self.data = data;
                Ok(self)
            }
            None => Err(MongoDmError::DocumentNotFound(format!(
                "'{}' with _id {} does not exist",
                M::NAME,
                id
            ))),
        }
    }

    fn require_id(&self) -> Result<Bson> {
        self.id()
            .cloned()
            .ok_or_else(|| MongoDmError::DocumentNotFound("document not saved.".to_string()))
    }

    // =====================
    // Type-level operations
    // =====================

    /// Collection bound to `M`
    pub async fn resolve_collection() -> Result<Arc<dyn CollectionHandle>> {
        Self::class()?.binding().resolve().await
    }

    /// Build an instance from a raw value
    ///
    /// Returns `None` for anything but a document; every field goes through
    /// [`set`](Self::set).
    pub fn create_instance(value: Option<Bson>) -> Result<Option<Self>> {
        match value {
            Some(Bson::Document(raw)) => Self::from_raw(raw).map(Some),
            _ => Ok(None),
        }
    }

    /// Look up by `_id`; an empty id yields `None`
    ///
    /// Lookup failures, malformed ids included, are reported as
    /// [`MongoDmError::DocumentNotFound`] carrying the original message.
    pub async fn find_by_id(
        id: impl Into<Bson>,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<Self>> {
        let id = id.into();
        if is_empty_id(&id) {
            return Ok(None);
        }
        let collection = Self::resolve_collection().await?;
        let lookup = async {
            let oid = parse_object_id(&id)?;
            let found = collection
                .find_one(doc! { ID_KEY: oid }, None, session)
                .await?;
            Self::create_instance(found.map(Bson::Document))
        };
        lookup.await.map_err(into_not_found)
    }

    /// Delete by `_id`, returning the deleted count
    pub async fn delete_by_id(
        id: impl Into<Bson>,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let id = id.into();
        if is_empty_id(&id) {
            return Err(MongoDmError::DocumentNotFound("oid is None".to_string()));
        }
        let collection = Self::resolve_collection().await?;
        let delete = async {
            let oid = parse_object_id(&id)?;
            collection.delete_one(doc! { ID_KEY: oid }, session).await
        };
        delete.await.map_err(into_not_found)
    }

    /// Raw documents matching `filter` (all documents when `None`)
    pub async fn find<'a>(
        filter: Option<BsonDocument>,
        options: Option<FindOptions>,
        session: Option<&'a mut ClientSession>,
    ) -> Result<DocumentCursor<'a>> {
        let collection = Self::resolve_collection().await?;
        collection
            .find(filter.unwrap_or_default(), options, session)
            .await
    }

    /// Every match of `filter` as instances
    pub async fn find_all(
        filter: Option<BsonDocument>,
        options: Option<FindOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<Vec<Self>> {
        let cursor = Self::find(filter, options, session).await?;
        let raw: Vec<BsonDocument> = cursor.try_collect().await?;
        raw.into_iter().map(Self::from_raw).collect()
    }

    pub async fn find_one(
        filter: Option<BsonDocument>,
        options: Option<FindOneOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<Self>> {
        let collection = Self::resolve_collection().await?;
        let found = collection
            .find_one(filter.unwrap_or_default(), options, session)
            .await?;
        Self::create_instance(found.map(Bson::Document))
    }

    pub async fn count(
        filter: Option<BsonDocument>,
        options: Option<CountOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let collection = Self::resolve_collection().await?;
        collection
            .count_documents(filter.unwrap_or_default(), options, session)
            .await
    }

    /// Create one index per indexed schema field, in declaration order
    pub async fn create_index(
        options: Option<IndexOptions>,
        mut session: Option<&mut ClientSession>,
    ) -> Result<Vec<String>> {
        let class = Self::class()?;
        let collection = Self::resolve_collection().await?;
        let mut names = Vec::new();
        for (field, kind) in class.schema().indexed_fields() {
            let name = collection
                .create_index(
                    &[(field.to_string(), kind)],
                    options.clone(),
                    session.as_deref_mut(),
                )
                .await?;
            names.push(name);
        }
        debug!(document = M::NAME, indexes = ?names, "Created schema indexes");
        Ok(names)
    }

    /// Create one index over the ordered `keys`
    pub async fn create_compound_index<I, K>(
        keys: I,
        options: Option<IndexOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<String>
    where
        I: IntoIterator<Item = (K, IndexKind)>,
        K: Into<String>,
    {
        let keys: Vec<(String, IndexKind)> =
            keys.into_iter().map(|(key, kind)| (key.into(), kind)).collect();
        let collection = Self::resolve_collection().await?;
        collection.create_index(&keys, options, session).await
    }

    pub async fn get_index_info(session: Option<&mut ClientSession>) -> Result<BsonDocument> {
        Self::resolve_collection()
            .await?
            .index_information(session)
            .await
    }

    pub async fn drop_index(name: &str, session: Option<&mut ClientSession>) -> Result<()> {
        Self::resolve_collection()
            .await?
            .drop_index(name, session)
            .await
    }

    pub async fn drop_indexes(session: Option<&mut ClientSession>) -> Result<()> {
        Self::resolve_collection().await?.drop_indexes(session).await
    }

    /// Resolve the collection, switching database first when `db_name` is given
    pub async fn get_collection(db_name: Option<&str>) -> Result<Arc<dyn CollectionHandle>> {
        if let Some(db_name) = db_name {
            Self::class()?.binding().set_db_name(db_name);
        }
        Self::resolve_collection().await
    }

    /// Connect a dedicated client, bind it to `M` and probe it
    ///
    /// The client is built through the type's registry without being cached
    /// there. `db_name` and `client_name` keep their declared values when
    /// `None`.
    #[instrument(skip(url, config), fields(document = M::NAME))]
    pub async fn init_db(
        url: &str,
        db_name: Option<&str>,
        client_name: Option<&str>,
        config: &ClientConfig,
    ) -> Result<Arc<dyn DatabaseClient>> {
        let binding = Self::class()?.binding();
        let client_name = client_name
            .map(str::to_string)
            .unwrap_or_else(|| binding.client_name());
        let client = binding
            .registry()
            .get_or_create(&client_name, Some(url), false, config)
            .await?;
        if let Some(db_name) = db_name {
            binding.set_db_name(db_name);
        }
        binding.bind_client(client.clone());
        Self::check_health().await?;
        Ok(client)
    }

    /// Probe the bound client; a type without one has nothing to check
    pub async fn check_health() -> Result<()> {
        let Some(client) = Self::class()?.binding().client() else {
            return Ok(());
        };
        check_client_health(client.as_ref(), M::NAME).await
    }
}

fn missing_attribute<M: Model>(key: &str) -> MongoDmError {
    MongoDmError::Attribute(format!("'{}' object has no attribute '{}'", M::NAME, key))
}

fn into_not_found(err: MongoDmError) -> MongoDmError {
    match err {
        MongoDmError::DocumentNotFound(_) => err,
        other => MongoDmError::DocumentNotFound(other.to_string()),
    }
}

impl<M: Model> Clone for Document<M> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> PartialEq for Document<M> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<M: Model> fmt::Display for Document<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}({{", M::NAME)?;
        for (position, (key, value)) in self.data.iter().enumerate() {
            if position > 0 {
                write!(f, ", ")?;
            }
            if position == DISPLAY_MAX_ENTRIES {
                write!(f, "...")?;
                break;
            }
            write!(f, "\"{}\": {}", key, shorten(&value.to_string()))?;
        }
        write!(f, "}})>")
    }
}

impl<M: Model> fmt::Debug for Document<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Keep the head and tail of long renderings
fn shorten(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= DISPLAY_MAX_VALUE {
        return text.to_string();
    }
    let keep = DISPLAY_MAX_VALUE - 3;
    let head = keep / 2;
    let tail = keep - head;
    let mut shortened: String = chars[..head].iter().collect();
    shortened.push_str("...");
    shortened.extend(&chars[chars.len() - tail..]);
    shortened
}
