//! Named client cache
//!
//! A [`ClientRegistry`] maps a logical client name to a live
//! [`DatabaseClient`]. Document types use [`ClientRegistry::global`] unless
//! their declaration injects another registry.
//!
//! Clients are bound to the tokio runtime that was current when they were
//! constructed. Reusing a cached client from a different runtime is the
//! caller's responsibility.

use mongodm_common::Result;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::connection::{check_client_health, ClientConfig, MongoConnector};
use crate::driver::{Connector, DatabaseClient};

/// Client name used when a declaration does not name one
pub const DEFAULT_CLIENT_NAME: &str = "__local__";

/// URL used when a registry lookup is given none
pub const DEFAULT_URL: &str = "mongodb://localhost:27017";

static GLOBAL_REGISTRY: Lazy<Arc<ClientRegistry>> =
    Lazy::new(|| Arc::new(ClientRegistry::new(Arc::new(MongoConnector))));

/// Client and database used by every type of a registry that has no
/// client of its own
#[derive(Debug, Clone)]
pub struct DefaultBinding {
    pub client: Arc<dyn DatabaseClient>,
    pub db_name: Option<String>,
}

/// Process-wide or injected cache of named database clients
pub struct ClientRegistry {
    connector: Arc<dyn Connector>,
    clients: RwLock<HashMap<String, Arc<dyn DatabaseClient>>>,
    default: RwLock<Option<DefaultBinding>>,
}

impl ClientRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            clients: RwLock::new(HashMap::new()),
            default: RwLock::new(None),
        }
    }

    /// The default registry, connecting through the `mongodb` driver
    pub fn global() -> Arc<ClientRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Return the client registered under `name`, connecting if needed
    ///
    /// With `cache` set, an existing entry is returned as is (`url` and
    /// `config` are ignored) and a newly constructed client replaces any
    /// prior entry. Without it a fresh client is always built and never
    /// registered.
    ///
    /// The lookup and the insert are separate steps: two tasks resolving the
    /// same name for the first time may both connect, and the last one to
    /// finish keeps the slot.
    pub async fn get_or_create(
        &self,
        name: &str,
        url: Option<&str>,
        cache: bool,
        config: &ClientConfig,
    ) -> Result<Arc<dyn DatabaseClient>> {
        if cache {
            if let Some(client) = self.get(name) {
                return Ok(client);
            }
        }

        let url = url.unwrap_or(DEFAULT_URL);
        let client = self.connector.connect(url, config).await?;
        if cache {
            debug!(client = name, "Registering database client");
            self.insert(name, client.clone());
        }
        Ok(client)
    }

    /// Connect a dedicated client and make it the default of this registry
    ///
    /// Every document type using this registry without a bound client of its
    /// own resolves through it. `db_name` applies to types that do not
    /// declare a database. The client is not cached by name. The default is
    /// installed before the health probe runs, so a failed probe still
    /// leaves it in place.
    pub async fn init_db(
        &self,
        url: &str,
        db_name: Option<&str>,
        client_name: Option<&str>,
        config: &ClientConfig,
    ) -> Result<Arc<dyn DatabaseClient>> {
        let client_name = client_name.unwrap_or(DEFAULT_CLIENT_NAME);
        let client = self.get_or_create(client_name, Some(url), false, config).await?;
        *self.default.write() = Some(DefaultBinding {
            client: client.clone(),
            db_name: db_name.map(str::to_string),
        });
        info!(client = client_name, db = ?db_name, "Default database client installed");
        check_client_health(client.as_ref(), client_name).await?;
        Ok(client)
    }

    pub fn default_binding(&self) -> Option<DefaultBinding> {
        self.default.read().clone()
    }

    /// Forget the default installed by [`ClientRegistry::init_db`]
    pub fn reset_default(&self) -> Option<DefaultBinding> {
        self.default.write().take()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Register `client` under `name`, returning the entry it replaced
    pub fn insert(
        &self,
        name: impl Into<String>,
        client: Arc<dyn DatabaseClient>,
    ) -> Option<Arc<dyn DatabaseClient>> {
        self.clients.write().insert(name.into(), client)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn DatabaseClient>> {
        self.clients.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.read().contains_key(name)
    }

    pub fn clear(&self) {
        self.clients.write().clear();
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clients = self.clients.read();
        let mut names: Vec<&String> = clients.keys().collect();
        names.sort();
        f.debug_struct("ClientRegistry")
            .field("clients", &names)
            .field("has_default", &self.default.read().is_some())
            .finish()
    }
}

/// [`ClientRegistry::init_db`] on the global registry
pub async fn init_db(
    url: &str,
    db_name: Option<&str>,
    client_name: Option<&str>,
    config: &ClientConfig,
) -> Result<Arc<dyn DatabaseClient>> {
    ClientRegistry::global()
        .init_db(url, db_name, client_name, config)
        .await
}
