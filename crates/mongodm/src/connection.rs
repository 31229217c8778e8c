//! MongoDB connection management with pool configuration and health checking
//!
//! [`MongoConnector`] builds [`MongoClient`]s; [`MongoCollection`] implements
//! [`CollectionHandle`] over `mongodb::Collection<bson::Document>`.

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    options::{
        ClientOptions, CountOptions, FindOneOptions, FindOptions, IndexOptions, ServerApi,
        ServerApiVersion,
    },
    Client, ClientSession, Collection, IndexModel,
};
use mongodm_common::{MongoDmError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::driver::{CollectionHandle, Connector, DatabaseClient, DocumentCursor};
use crate::schema::{index_keys_document, IndexKind};

/// Connection pool configuration applied when a client is constructed
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Minimum number of connections in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("mongodm".to_string()),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by environment variables.
    ///
    /// - `MONGODM_MIN_POOL_SIZE`, `MONGODM_MAX_POOL_SIZE`
    /// - `MONGODM_CONNECT_TIMEOUT_MS`
    /// - `MONGODM_APP_NAME`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(min) = env_parse::<u32>("MONGODM_MIN_POOL_SIZE")? {
            config.min_pool_size = Some(min);
        }
        if let Some(max) = env_parse::<u32>("MONGODM_MAX_POOL_SIZE")? {
            config.max_pool_size = Some(max);
        }
        if let Some(ms) = env_parse::<u64>("MONGODM_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Some(Duration::from_millis(ms));
        }
        if let Ok(app) = std::env::var("MONGODM_APP_NAME") {
            config.app_name = Some(app);
        }
        Ok(config)
    }

    fn apply(&self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &self.app_name {
            options.app_name = Some(app.clone());
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            MongoDmError::Configuration(format!("{} has invalid value '{}'", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

/// Connector backed by the `mongodb` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    #[instrument(skip(self, url, config))]
    async fn connect(&self, url: &str, config: &ClientConfig) -> Result<Arc<dyn DatabaseClient>> {
        if url.is_empty() {
            return Err(MongoDmError::MissingConfiguration(
                "Connection URL cannot be empty".to_string(),
            ));
        }

        let mut client_options = ClientOptions::parse(url).await?;
        config.apply(&mut client_options);

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;
        info!(app_name = ?config.app_name, "MongoDB client constructed");
        Ok(Arc::new(MongoClient::new(client)))
    }
}

/// Probe `client` with `server_info`
///
/// A failed call or a reply without `ok: 1` is reported as
/// [`MongoDmError::Connect`]. `target` names the caller in the logs.
pub async fn check_client_health(client: &dyn DatabaseClient, target: &str) -> Result<()> {
    let info = client.server_info().await.map_err(|e| {
        warn!(target_name = target, error = %e, "Health probe failed");
        connect_error()
    })?;
    let healthy = info
        .get("ok")
        .and_then(numeric)
        .is_some_and(|ok| ok == 1.0);
    if !healthy {
        warn!(target_name = target, "Health probe returned an unexpected reply");
        return Err(connect_error());
    }
    info!(target_name = target, "mongodb connecting successful");
    Ok(())
}

fn connect_error() -> MongoDmError {
    MongoDmError::Connect("mongodb connecting error.".to_string())
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}

/// [`DatabaseClient`] over `mongodb::Client`
///
/// The driver spawns its monitoring tasks on the runtime that is current when
/// the client is constructed.
#[derive(Debug, Clone)]
pub struct MongoClient {
    client: Client,
}

impl MongoClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the driver client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl DatabaseClient for MongoClient {
    fn collection(&self, database: &str, collection: &str) -> Arc<dyn CollectionHandle> {
        Arc::new(MongoCollection {
            inner: self.client.database(database).collection(collection),
            database: database.to_string(),
        })
    }

    async fn server_info(&self) -> Result<BsonDocument> {
        let info = self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await?;
        Ok(info)
    }

    async fn start_session(&self) -> Result<ClientSession> {
        Ok(self.client.start_session().await?)
    }
}

/// [`CollectionHandle`] over an untyped `mongodb::Collection`
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: Collection<BsonDocument>,
    database: String,
}

impl MongoCollection {
    /// Get a reference to the driver collection
    pub fn collection(&self) -> &Collection<BsonDocument> {
        &self.inner
    }
}

#[async_trait]
impl CollectionHandle for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn insert_one(
        &self,
        document: &BsonDocument,
        session: Option<&mut ClientSession>,
    ) -> Result<Bson> {
        let action = self.inner.insert_one(document);
        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(result.inserted_id)
    }

    async fn replace_one(
        &self,
        filter: BsonDocument,
        replacement: &BsonDocument,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let action = self.inner.replace_one(filter, replacement);
        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(result.matched_count)
    }

    async fn delete_one(
        &self,
        filter: BsonDocument,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let action = self.inner.delete_one(filter);
        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(result.deleted_count)
    }

    async fn find_one(
        &self,
        filter: BsonDocument,
        options: Option<FindOneOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<BsonDocument>> {
        let action = self.inner.find_one(filter).with_options(options);
        let found = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(found)
    }

    async fn find<'a>(
        &self,
        filter: BsonDocument,
        options: Option<FindOptions>,
        session: Option<&'a mut ClientSession>,
    ) -> Result<DocumentCursor<'a>> {
        let action = self.inner.find(filter).with_options(options);
        match session {
            Some(session) => {
                let cursor = action.session(&mut *session).await?;
                let stream = futures::stream::unfold(
                    (cursor, session),
                    |(mut cursor, session)| async move {
                        let next = cursor.next(&mut *session).await?;
                        Some((next.map_err(MongoDmError::from), (cursor, session)))
                    },
                );
                Ok(stream.boxed())
            }
            None => {
                let cursor = action.await?;
                Ok(cursor.map_err(MongoDmError::from).boxed())
            }
        }
    }

    async fn count_documents(
        &self,
        filter: BsonDocument,
        options: Option<CountOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<u64> {
        let action = self.inner.count_documents(filter).with_options(options);
        let count = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(count)
    }

    async fn create_index(
        &self,
        keys: &[(String, IndexKind)],
        options: Option<IndexOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<String> {
        let model = IndexModel::builder()
            .keys(index_keys_document(keys))
            .options(options)
            .build();
        let action = self.inner.create_index(model);
        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(result.index_name)
    }

    async fn index_information(&self, session: Option<&mut ClientSession>) -> Result<BsonDocument> {
        let models: Vec<IndexModel> = match session {
            Some(session) => {
                let mut cursor = self.inner.list_indexes().session(&mut *session).await?;
                let mut models = Vec::new();
                while let Some(model) = cursor.next(&mut *session).await {
                    models.push(model?);
                }
                models
            }
            None => self.inner.list_indexes().await?.try_collect().await?,
        };

        let mut information = BsonDocument::new();
        for model in models {
            let name = model
                .options
                .as_ref()
                .and_then(|options| options.name.clone())
                .unwrap_or_else(|| generated_index_name(&model.keys));
            let mut entry = match &model.options {
                Some(options) => bson::to_document(options)?,
                None => BsonDocument::new(),
            };
            entry.remove("name");
            entry.insert("key", model.keys);
            information.insert(name, entry);
        }
        Ok(information)
    }

    async fn drop_index(&self, name: &str, session: Option<&mut ClientSession>) -> Result<()> {
        let action = self.inner.drop_index(name);
        match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        }
        Ok(())
    }

    async fn drop_indexes(&self, session: Option<&mut ClientSession>) -> Result<()> {
        let action = self.inner.drop_indexes();
        match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        }
        Ok(())
    }
}

/// Server-style index name for a key document, e.g. `name_1_createdAt_-1`
pub(crate) fn generated_index_name(keys: &BsonDocument) -> String {
    keys.iter()
        .map(|(field, kind)| match IndexKind::from_bson(kind) {
            Some(kind) => format!("{}_{}", field, kind.token()),
            None => format!("{}_{}", field, kind),
        })
        .collect::<Vec<_>>()
        .join("_")
}
