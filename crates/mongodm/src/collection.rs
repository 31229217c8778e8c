//! Per-type collection resolution
//!
//! Every document type owns one [`ClassBinding`]: its declared
//! [`ClassConfig`], an optional pre-bound client and the registry used to
//! create clients on demand. Resolution is repeated on every access; only
//! the registry caches anything.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use mongodm_common::{MongoDmError, Result};
use parking_lot::RwLock;
use tracing::info;

use crate::connection::ClientConfig;
use crate::driver::{CollectionHandle, DatabaseClient};
use crate::registry::{ClientRegistry, DEFAULT_CLIENT_NAME};
use crate::validation::ValidatedCollectionName;

/// Database used when a declaration does not name one
pub const DEFAULT_DB_NAME: &str = "test";

/// Lower-cased type name with a trailing `s`
pub fn default_collection_name(type_name: &str) -> String {
    format!("{}s", type_name.to_lowercase())
}

/// Declared bindings of a document type; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    pub client_name: Option<String>,
    pub url: Option<String>,
    pub db_name: Option<String>,
    pub collection_name: Option<String>,
}

impl ClassConfig {
    /// Load from `MONGODM_CLIENT`, `MONGODM_URL` and `MONGODM_DB`
    pub fn from_env() -> Self {
        Self {
            client_name: env_value("MONGODM_CLIENT"),
            url: env_value("MONGODM_URL"),
            db_name: env_value("MONGODM_DB"),
            collection_name: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            MongoDmError::Configuration(format!("Invalid document configuration: {}", e))
        })
    }

    /// Fields set in `other` take precedence
    pub fn merged(mut self, other: ClassConfig) -> Self {
        if other.client_name.is_some() {
            self.client_name = other.client_name;
        }
        if other.url.is_some() {
            self.url = other.url;
        }
        if other.db_name.is_some() {
            self.db_name = other.db_name;
        }
        if other.collection_name.is_some() {
            self.collection_name = other.collection_name;
        }
        self
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Runtime binding of one document type to its database
pub struct ClassBinding {
    type_name: &'static str,
    config: RwLock<ClassConfig>,
    client: RwLock<Option<Arc<dyn DatabaseClient>>>,
    registry: Arc<ClientRegistry>,
    client_config: ClientConfig,
}

impl ClassBinding {
    pub(crate) fn new(
        type_name: &'static str,
        config: ClassConfig,
        client: Option<Arc<dyn DatabaseClient>>,
        registry: Arc<ClientRegistry>,
        client_config: ClientConfig,
    ) -> Result<Self> {
        if let Some(name) = &config.collection_name {
            ValidatedCollectionName::new(name)?;
        }
        Ok(Self {
            type_name,
            config: RwLock::new(config),
            client: RwLock::new(client),
            registry,
            client_config,
        })
    }

    pub fn config(&self) -> ClassConfig {
        self.config.read().clone()
    }

    pub fn client_name(&self) -> String {
        self.config
            .read()
            .client_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string())
    }

    pub fn url(&self) -> Option<String> {
        self.config.read().url.clone()
    }

    pub fn db_name(&self) -> String {
        self.config
            .read()
            .db_name
            .clone()
            .unwrap_or_else(|| DEFAULT_DB_NAME.to_string())
    }

    pub fn collection_name(&self) -> String {
        self.config
            .read()
            .collection_name
            .clone()
            .unwrap_or_else(|| default_collection_name(self.type_name))
    }

    /// The pre-bound client, if any
    pub fn client(&self) -> Option<Arc<dyn DatabaseClient>> {
        self.client.read().clone()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Bind `client`; later resolutions skip the registry
    pub fn bind_client(&self, client: Arc<dyn DatabaseClient>) {
        *self.client.write() = Some(client);
    }

    pub fn set_db_name(&self, db_name: impl Into<String>) {
        self.config.write().db_name = Some(db_name.into());
    }

    /// Resolve the collection handle for this type
    ///
    /// Uses the bound client when there is one, then the registry default
    /// installed by [`ClientRegistry::init_db`]. Otherwise a declared URL is
    /// required and the client is fetched from (or registered in) the
    /// registry under the declared client name.
    ///
    /// A declared database name wins over the registry default's.
    pub async fn resolve(&self) -> Result<Arc<dyn CollectionHandle>> {
        let collection_name = ValidatedCollectionName::new(&self.collection_name())?;
        let declared_db = self.config.read().db_name.clone();

        let (client, db_name) = match (self.client(), self.registry.default_binding()) {
            (Some(client), _) => (client, self.db_name()),
            (None, Some(default)) => {
                let db_name = declared_db
                    .or(default.db_name)
                    .unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
                (default.client, db_name)
            }
            (None, None) => {
                let db_name = self.db_name();
                let url = self.url().filter(|url| !url.is_empty()).ok_or_else(|| {
                    MongoDmError::MissingConfiguration(format!(
                        "miss db_url for '{name}', declare it with `Declaration::url(..)` \
                         or call `Document::<{name}>::init_db(url, ..)`",
                        name = self.type_name
                    ))
                })?;
                let client_name = self.client_name();
                info!(
                    document = self.type_name,
                    client = %client_name,
                    db = %db_name,
                    "Creating implicit database connection"
                );
                let client = self
                    .registry
                    .get_or_create(&client_name, Some(&url), true, &self.client_config)
                    .await?;
                (client, db_name)
            }
        };

        Ok(client.collection(&db_name, collection_name.as_str()))
    }
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBinding")
            .field("type_name", &self.type_name)
            .field("config", &*self.config.read())
            .field("bound", &self.client.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Connector;
    use crate::memory::MemoryConnector;

    fn binding(config: ClassConfig) -> (Arc<MemoryConnector>, ClassBinding) {
        let connector = Arc::new(MemoryConnector::new());
        let registry = Arc::new(ClientRegistry::new(connector.clone()));
        let binding =
            ClassBinding::new("User", config, None, registry, ClientConfig::default()).unwrap();
        (connector, binding)
    }

    #[test]
    fn test_defaults() {
        let (_, binding) = binding(ClassConfig::default());
        assert_eq!(binding.client_name(), "__local__");
        assert_eq!(binding.db_name(), "test");
        assert_eq!(binding.collection_name(), "users");
        assert!(binding.url().is_none());
        assert!(binding.client().is_none());
    }

    #[test]
    fn test_default_collection_name() {
        assert_eq!(default_collection_name("User"), "users");
        assert_eq!(default_collection_name("BlogPost"), "blogposts");
    }

    #[test]
    fn test_config_from_json() {
        let config = ClassConfig::from_json_str(
            r#"{"url": "mongodb://db:27017", "db_name": "app"}"#,
        )
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("mongodb://db:27017"));
        assert_eq!(config.db_name.as_deref(), Some("app"));
        assert!(config.client_name.is_none());

        let err = ClassConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, MongoDmError::Configuration(_)));
    }

    #[test]
    fn test_config_merge() {
        let base = ClassConfig {
            url: Some("mongodb://a".into()),
            db_name: Some("one".into()),
            ..Default::default()
        };
        let merged = base.merged(ClassConfig {
            db_name: Some("two".into()),
            ..Default::default()
        });
        assert_eq!(merged.url.as_deref(), Some("mongodb://a"));
        assert_eq!(merged.db_name.as_deref(), Some("two"));
    }

    #[test]
    fn test_invalid_collection_name_rejected() {
        let registry = Arc::new(ClientRegistry::new(Arc::new(MemoryConnector::new())));
        let result = ClassBinding::new(
            "User",
            ClassConfig {
                collection_name: Some("system.users".into()),
                ..Default::default()
            },
            None,
            registry,
            ClientConfig::default(),
        );
        assert!(matches!(result, Err(MongoDmError::Validation(_))));
    }

    #[tokio::test]
    async fn test_resolve_without_url_fails() {
        let (_, binding) = binding(ClassConfig::default());
        let err = binding.resolve().await.unwrap_err();
        assert!(matches!(err, MongoDmError::MissingConfiguration(_)));
        assert!(err.to_string().contains("init_db"));
        assert!(err.to_string().contains("url("));
    }

    #[tokio::test]
    async fn test_resolve_registers_implicit_client() {
        let (connector, binding) = binding(ClassConfig {
            url: Some("memory://resolve".into()),
            ..Default::default()
        });
        let first = binding.resolve().await.unwrap();
        let second = binding.resolve().await.unwrap();
        assert_eq!(first.name(), "users");
        assert_eq!(first.database_name(), "test");
        assert_eq!(second.name(), "users");
        assert_eq!(connector.connections(), 1);
        assert!(binding.registry().contains("__local__"));
    }

    #[tokio::test]
    async fn test_bound_client_wins() {
        let (connector, binding) = binding(ClassConfig::default());
        let client = connector
            .connect("memory://bound", &ClientConfig::default())
            .await
            .unwrap();
        binding.bind_client(client);
        binding.set_db_name("other");
        let collection = binding.resolve().await.unwrap();
        assert_eq!(collection.database_name(), "other");
        assert!(binding.registry().is_empty());
    }

    #[tokio::test]
    async fn test_registry_default_used_when_unbound() {
        let (_, binding) = binding(ClassConfig::default());
        binding
            .registry()
            .init_db("memory://root", Some("mytest"), None, &ClientConfig::default())
            .await
            .unwrap();
        let collection = binding.resolve().await.unwrap();
        assert_eq!(collection.database_name(), "mytest");

        binding.set_db_name("declared");
        let collection = binding.resolve().await.unwrap();
        assert_eq!(collection.database_name(), "declared");
        assert!(binding.registry().is_empty());
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("MONGODM_CLIENT", "reporting");
        std::env::set_var("MONGODM_URL", "mongodb://env:27017");
        std::env::set_var("MONGODM_DB", "");
        let config = ClassConfig::from_env();
        std::env::remove_var("MONGODM_CLIENT");
        std::env::remove_var("MONGODM_URL");
        std::env::remove_var("MONGODM_DB");

        assert_eq!(config.client_name.as_deref(), Some("reporting"));
        assert_eq!(config.url.as_deref(), Some("mongodb://env:27017"));
        assert!(config.db_name.is_none());
        assert!(config.collection_name.is_none());
    }
}

