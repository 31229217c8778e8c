//! In-process driver
//!
//! Implements the driver traits without a server so document types can be
//! exercised in tests and embedded tooling. Clients connected to the same URL
//! share one deployment, the same way two clients of one server see the same
//! data.
//!
//! Filters support top-level and dotted field equality plus `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`, `$and`, `$or` and
//! `$nor`. Find honours `sort`, `skip` and `limit`; other driver options are
//! accepted and ignored.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use futures::StreamExt;
use mongodb::options::{CountOptions, FindOneOptions, FindOptions, IndexOptions};
use mongodb::ClientSession;
use mongodm_common::{MongoDmError, Result};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::connection::{generated_index_name, ClientConfig};
use crate::driver::{CollectionHandle, Connector, DatabaseClient, DocumentCursor};
use crate::schema::{index_keys_document, IndexKind};

const ID_INDEX: &str = "_id_";

/// Connector handing out in-process clients
#[derive(Debug, Default)]
pub struct MemoryConnector {
    deployments: RwLock<HashMap<String, Arc<Deployment>>>,
    connections: AtomicUsize,
    offline: bool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose clients fail every health probe
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Number of clients constructed so far
    pub fn connections(&self) -> usize {
        self.connections.load(AtomicOrdering::SeqCst)
    }

    /// The deployment behind `url`, created on first use
    pub fn deployment(&self, url: &str) -> Arc<Deployment> {
        if let Some(deployment) = self.deployments.read().get(url) {
            return deployment.clone();
        }
        self.deployments
            .write()
            .entry(url.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str, _config: &ClientConfig) -> Result<Arc<dyn DatabaseClient>> {
        if url.is_empty() {
            return Err(MongoDmError::MissingConfiguration(
                "Connection URL cannot be empty".to_string(),
            ));
        }
        self.connections.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Arc::new(MemoryClient {
            deployment: self.deployment(url),
            offline: self.offline,
        }))
    }
}

/// All namespaces (`db.collection`) of one in-process deployment
#[derive(Debug, Default)]
pub struct Deployment {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl Deployment {
    /// Number of documents stored in `database.collection`
    pub fn document_count(&self, database: &str, collection: &str) -> usize {
        self.namespaces
            .read()
            .get(&namespace(database, collection))
            .map(|ns| ns.documents.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Namespace {
    documents: Vec<BsonDocument>,
    indexes: Vec<StoredIndex>,
}

#[derive(Debug)]
struct StoredIndex {
    name: String,
    keys: BsonDocument,
    options: BsonDocument,
}

fn namespace(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}

/// Client bound to one [`Deployment`]
#[derive(Debug)]
pub struct MemoryClient {
    deployment: Arc<Deployment>,
    offline: bool,
}

#[async_trait]
impl DatabaseClient for MemoryClient {
    fn collection(&self, database: &str, collection: &str) -> Arc<dyn CollectionHandle> {
        Arc::new(MemoryCollection {
            deployment: self.deployment.clone(),
            database: database.to_string(),
            name: collection.to_string(),
            namespace: namespace(database, collection),
        })
    }

    async fn server_info(&self) -> Result<BsonDocument> {
        if self.offline {
            return Err(MongoDmError::MongoDB(
                "server selection timeout: memory deployment is offline".to_string(),
            ));
        }
        Ok(doc! { "version": "memory", "ok": 1.0 })
    }

    async fn start_session(&self) -> Result<ClientSession> {
        Err(MongoDmError::Unsupported(
            "sessions require a MongoDB deployment".to_string(),
        ))
    }
}

/// Collection inside a [`Deployment`]
#[derive(Debug)]
pub struct MemoryCollection {
    deployment: Arc<Deployment>,
    database: String,
    name: String,
    namespace: String,
}

impl MemoryCollection {
    fn select(
        &self,
        filter: &BsonDocument,
        sort: Option<&BsonDocument>,
        skip: Option<u64>,
        limit: Option<i64>,
    ) -> Vec<BsonDocument> {
        let namespaces = self.deployment.namespaces.read();
        let documents = match namespaces.get(&self.namespace) {
            Some(ns) => &ns.documents,
            None => return Vec::new(),
        };

        let mut selected: Vec<BsonDocument> = documents
            .iter()
            .filter(|document| matches_filter(document, filter))
            .cloned()
            .collect();
        if let Some(sort) = sort {
            selected.sort_by(|a, b| compare_by_sort(a, b, sort));
        }

        let remaining = selected.into_iter().skip(skip.unwrap_or(0) as usize);
        match limit {
            Some(limit) if limit != 0 => remaining.take(limit.unsigned_abs() as usize).collect(),
            _ => remaining.collect(),
        }
    }
}

#[async_trait]
impl CollectionHandle for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn insert_one(
        &self,
        document: &BsonDocument,
        _session: Option<&mut ClientSession>,
    ) -> Result<Bson> {
        let id = document
            .get("_id")
            .cloned()
            .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

        let mut stored = BsonDocument::new();
        stored.insert("_id", id.clone());
        for (key, value) in document {
            if key != "_id" {
                stored.insert(key.clone(), value.clone());
            }
        }

        let mut namespaces = self.deployment.namespaces.write();
        let ns = namespaces.entry(self.namespace.clone()).or_default();
        if ns.documents.iter().any(|existing| existing.get("_id") == Some(&id)) {
            return Err(MongoDmError::MongoDB(format!(
                "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                self.namespace, id
            )));
        }
        ns.documents.push(stored);
        Ok(id)
    }

    async fn replace_one(
        &self,
        filter: BsonDocument,
        replacement: &BsonDocument,
        _session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let mut namespaces = self.deployment.namespaces.write();
        let Some(ns) = namespaces.get_mut(&self.namespace) else {
            return Ok(0);
        };
        let Some(slot) = ns
            .documents
            .iter_mut()
            .find(|document| matches_filter(document, &filter))
        else {
            return Ok(0);
        };

        let mut replaced = BsonDocument::new();
        if let Some(id) = slot.get("_id") {
            replaced.insert("_id", id.clone());
        }
        for (key, value) in replacement {
            if key != "_id" {
                replaced.insert(key.clone(), value.clone());
            }
        }
        *slot = replaced;
        Ok(1)
    }

    async fn delete_one(
        &self,
        filter: BsonDocument,
        _session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let mut namespaces = self.deployment.namespaces.write();
        let Some(ns) = namespaces.get_mut(&self.namespace) else {
            return Ok(0);
        };
        match ns
            .documents
            .iter()
            .position(|document| matches_filter(document, &filter))
        {
            Some(position) => {
                ns.documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_one(
        &self,
        filter: BsonDocument,
        options: Option<FindOneOptions>,
        _session: Option<&mut ClientSession>,
    ) -> Result<Option<BsonDocument>> {
        let (sort, skip) = match &options {
            Some(options) => (options.sort.as_ref(), options.skip),
            None => (None, None),
        };
        Ok(self.select(&filter, sort, skip, Some(1)).into_iter().next())
    }

    async fn find<'a>(
        &self,
        filter: BsonDocument,
        options: Option<FindOptions>,
        _session: Option<&'a mut ClientSession>,
    ) -> Result<DocumentCursor<'a>> {
        let (sort, skip, limit) = match &options {
            Some(options) => (options.sort.as_ref(), options.skip, options.limit),
            None => (None, None, None),
        };
        let documents = self.select(&filter, sort, skip, limit);
        Ok(futures::stream::iter(documents.into_iter().map(Ok)).boxed())
    }

    async fn count_documents(
        &self,
        filter: BsonDocument,
        options: Option<CountOptions>,
        _session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let (skip, limit) = match &options {
            Some(options) => (
                options.skip,
                options
                    .limit
                    .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX)),
            ),
            None => (None, None),
        };
        Ok(self.select(&filter, None, skip, limit).len() as u64)
    }

    async fn create_index(
        &self,
        keys: &[(String, IndexKind)],
        options: Option<IndexOptions>,
        _session: Option<&mut ClientSession>,
    ) -> Result<String> {
        if keys.is_empty() {
            return Err(MongoDmError::MongoDB("Index keys cannot be empty".to_string()));
        }
        let keys = index_keys_document(keys);
        let mut options = match &options {
            Some(options) => bson::to_document(options)?,
            None => BsonDocument::new(),
        };
        let name = match options.remove("name") {
            Some(Bson::String(name)) => name,
            _ => generated_index_name(&keys),
        };

        let mut namespaces = self.deployment.namespaces.write();
        let ns = namespaces.entry(self.namespace.clone()).or_default();
        for existing in &ns.indexes {
            if existing.name == name && existing.keys == keys {
                return Ok(name);
            }
            if existing.name == name {
                return Err(MongoDmError::MongoDB(format!(
                    "An existing index has the same name as the requested index: {}",
                    name
                )));
            }
            if existing.keys == keys {
                return Err(MongoDmError::MongoDB(format!(
                    "Index already exists with a different name: {}",
                    existing.name
                )));
            }
        }
        ns.indexes.push(StoredIndex {
            name: name.clone(),
            keys,
            options,
        });
        Ok(name)
    }

    async fn index_information(&self, _session: Option<&mut ClientSession>) -> Result<BsonDocument> {
        let mut information = doc! { ID_INDEX: { "v": 2, "key": { "_id": 1 } } };
        let namespaces = self.deployment.namespaces.read();
        if let Some(ns) = namespaces.get(&self.namespace) {
            for index in &ns.indexes {
                let mut entry = doc! { "v": 2, "key": index.keys.clone() };
                for (key, value) in &index.options {
                    entry.insert(key.clone(), value.clone());
                }
                information.insert(index.name.clone(), entry);
            }
        }
        Ok(information)
    }

    async fn drop_index(&self, name: &str, _session: Option<&mut ClientSession>) -> Result<()> {
        if name == ID_INDEX {
            return Err(MongoDmError::MongoDB("cannot drop _id index".to_string()));
        }
        let mut namespaces = self.deployment.namespaces.write();
        let ns = namespaces.entry(self.namespace.clone()).or_default();
        match ns.indexes.iter().position(|index| index.name == name) {
            Some(position) => {
                ns.indexes.remove(position);
                Ok(())
            }
            None => Err(MongoDmError::MongoDB(format!(
                "index not found with name [{}]",
                name
            ))),
        }
    }

    async fn drop_indexes(&self, _session: Option<&mut ClientSession>) -> Result<()> {
        if let Some(ns) = self.deployment.namespaces.write().get_mut(&self.namespace) {
            ns.indexes.clear();
        }
        Ok(())
    }
}

// =====================
// Filter evaluation
// =====================

/// Whether `document` satisfies `filter`
pub(crate) fn matches_filter(document: &BsonDocument, filter: &BsonDocument) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => clauses(condition).all(|clause| matches_filter(document, clause)),
        "$or" => clauses(condition).any(|clause| matches_filter(document, clause)),
        "$nor" => !clauses(condition).any(|clause| matches_filter(document, clause)),
        path => matches_condition(lookup(document, path), condition),
    })
}

fn clauses(value: &Bson) -> impl Iterator<Item = &BsonDocument> {
    let items: &[Bson] = match value {
        Bson::Array(items) => items,
        _ => &[],
    };
    items.iter().filter_map(Bson::as_document)
}

fn lookup<'a>(document: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> bool {
    match condition {
        Bson::Document(operators)
            if operators.keys().next().is_some_and(|key| key.starts_with('$')) =>
        {
            operators
                .iter()
                .all(|(operator, operand)| apply_operator(value, operator, operand))
        }
        _ => equals(value, condition),
    }
}

fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn apply_operator(value: Option<&Bson>, operator: &str, operand: &Bson) -> bool {
    match operator {
        "$eq" => equals(value, operand),
        "$ne" => !equals(value, operand),
        "$gt" => compare_optional(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(
            compare_optional(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$lt" => compare_optional(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(
            compare_optional(value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "$in" => match operand {
            Bson::Array(candidates) => candidates.iter().any(|c| equals(value, c)),
            _ => false,
        },
        "$nin" => match operand {
            Bson::Array(candidates) => !candidates.iter().any(|c| equals(value, c)),
            _ => true,
        },
        "$exists" => value.is_some() == truthy(operand),
        _ => false,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_optional(value: Option<&Bson>, operand: &Bson) -> Option<Ordering> {
    compare_values(value?, operand)
}

fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_by_sort(a: &BsonDocument, b: &BsonDocument, sort: &BsonDocument) -> Ordering {
    for (path, direction) in sort {
        let ordering = match (lookup(a, path), lookup(b, path)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        };
        let ordering = if as_f64(direction).is_some_and(|d| d < 0.0) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collection(url: &str) -> Arc<dyn CollectionHandle> {
        let connector = MemoryConnector::new();
        let client = connector.connect(url, &ClientConfig::default()).await.unwrap();
        client.collection("test", "users")
    }

    #[test]
    fn test_equality_and_operators() {
        let document = doc! { "name": "kavin", "age": 30, "tags": ["a", "b"], "address": { "city": "x" } };
        assert!(matches_filter(&document, &doc! {}));
        assert!(matches_filter(&document, &doc! { "name": "kavin" }));
        assert!(matches_filter(&document, &doc! { "age": 30_i64 }));
        assert!(matches_filter(&document, &doc! { "age": { "$gt": 18, "$lte": 30 } }));
        assert!(!matches_filter(&document, &doc! { "age": { "$lt": 30 } }));
        assert!(matches_filter(&document, &doc! { "tags": "b" }));
        assert!(matches_filter(&document, &doc! { "address.city": "x" }));
        assert!(matches_filter(&document, &doc! { "email": { "$exists": false } }));
        assert!(matches_filter(&document, &doc! { "name": { "$in": ["felix", "kavin"] } }));
        assert!(matches_filter(&document, &doc! { "name": { "$nin": ["felix"] } }));
        assert!(matches_filter(
            &document,
            &doc! { "$or": [{ "name": "felix" }, { "age": 30 }] }
        ));
        assert!(!matches_filter(
            &document,
            &doc! { "$and": [{ "name": "kavin" }, { "age": { "$ne": 30 } }] }
        ));
    }

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let users = collection("memory://insert").await;
        let id = users.insert_one(&doc! { "name": "kavin" }, None).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let stored = users
            .find_one(doc! { "_id": id.clone() }, None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(stored.get_str("name").unwrap(), "kavin");

        let duplicate = users.insert_one(&doc! { "_id": id, "name": "felix" }, None).await;
        assert!(matches!(duplicate, Err(MongoDmError::MongoDB(_))));
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let users = collection("memory://replace").await;
        let id = users.insert_one(&doc! { "name": "kavin" }, None).await.unwrap();

        let matched = users
            .replace_one(doc! { "_id": id.clone() }, &doc! { "name": "felix" }, None)
            .await
            .unwrap();
        assert_eq!(matched, 1);
        let stored = users.find_one(doc! {}, None, None).await.unwrap().unwrap();
        assert_eq!(stored.get("_id"), Some(&id));
        assert_eq!(stored.get_str("name").unwrap(), "felix");

        assert_eq!(users.delete_one(doc! { "_id": id.clone() }, None).await.unwrap(), 1);
        assert_eq!(users.delete_one(doc! { "_id": id }, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit() {
        let users = collection("memory://find").await;
        for age in [30, 10, 20, 40] {
            users.insert_one(&doc! { "age": age }, None).await.unwrap();
        }
        let options = FindOptions::builder()
            .sort(doc! { "age": -1 })
            .skip(1)
            .limit(2)
            .build();
        let ages: Vec<i32> = users
            .find(doc! {}, Some(options), None)
            .await
            .unwrap()
            .map_ok(|document| document.get_i32("age").unwrap())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ages, vec![30, 20]);
        assert_eq!(
            users
                .count_documents(doc! { "age": { "$gte": 20 } }, None, None)
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_count_limit_saturates() {
        let users = collection("memory://count-limit").await;
        for age in [1, 2, 3] {
            users.insert_one(&doc! { "age": age }, None).await.unwrap();
        }
        let unbounded = CountOptions::builder().limit(u64::MAX).build();
        assert_eq!(
            users.count_documents(doc! {}, Some(unbounded), None).await.unwrap(),
            3
        );
        let two = CountOptions::builder().limit(2).build();
        assert_eq!(users.count_documents(doc! {}, Some(two), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_index_lifecycle() {
        let users = collection("memory://indexes").await;
        let name = users
            .create_index(&[("name".to_string(), IndexKind::Descending)], None, None)
            .await
            .unwrap();
        assert_eq!(name, "name_-1");
        let again = users
            .create_index(&[("name".to_string(), IndexKind::Descending)], None, None)
            .await
            .unwrap();
        assert_eq!(again, "name_-1");

        let info = users.index_information(None).await.unwrap();
        assert!(info.contains_key("_id_"));
        assert_eq!(
            info.get_document("name_-1").unwrap().get_document("key").unwrap(),
            &doc! { "name": -1 }
        );

        users.drop_index("name_-1", None).await.unwrap();
        assert!(users.drop_index("name_-1", None).await.is_err());
        assert!(users.drop_index("_id_", None).await.is_err());
        assert!(users.create_index(&[], None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_clients_share_deployment_per_url() {
        let connector = MemoryConnector::new();
        let first = connector.connect("memory://shared", &ClientConfig::default()).await.unwrap();
        let second = connector.connect("memory://shared", &ClientConfig::default()).await.unwrap();
        first
            .collection("test", "users")
            .insert_one(&doc! { "name": "kavin" }, None)
            .await
            .unwrap();
        let count = second
            .collection("test", "users")
            .count_documents(doc! {}, None, None)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(connector.connections(), 2);
        assert_eq!(connector.deployment("memory://shared").document_count("test", "users"), 1);
    }

    #[tokio::test]
    async fn test_offline_probe_fails() {
        let connector = MemoryConnector::offline();
        let client = connector.connect("memory://offline", &ClientConfig::default()).await.unwrap();
        assert!(client.server_info().await.is_err());
        assert!(client.start_session().await.is_err());
    }
}
