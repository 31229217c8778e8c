//! Shared fixtures for integration tests
#![allow(dead_code)]

use mongodm::{ClientRegistry, MemoryConnector};
use once_cell::sync::Lazy;
use std::sync::Arc;

static CONNECTOR: Lazy<Arc<MemoryConnector>> = Lazy::new(|| Arc::new(MemoryConnector::new()));

static REGISTRY: Lazy<Arc<ClientRegistry>> =
    Lazy::new(|| Arc::new(ClientRegistry::new(CONNECTOR.clone())));

/// In-process connector shared by the models of one test binary
pub fn connector() -> Arc<MemoryConnector> {
    CONNECTOR.clone()
}

/// Registry over [`connector`]
pub fn registry() -> Arc<ClientRegistry> {
    REGISTRY.clone()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}
