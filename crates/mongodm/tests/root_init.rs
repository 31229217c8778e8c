//! One registry-wide client shared by every document type

use std::sync::Arc;

use mongodm::bson::Bson;
use mongodm::{
    class_cell, ClassCell, ClientConfig, ClientRegistry, Declaration, Document, FieldSpec,
    FieldType, MemoryConnector, Model, MongoDmError,
};
use once_cell::sync::Lazy;

static CONNECTOR: Lazy<Arc<MemoryConnector>> = Lazy::new(|| Arc::new(MemoryConnector::new()));

static REGISTRY: Lazy<Arc<ClientRegistry>> =
    Lazy::new(|| Arc::new(ClientRegistry::new(CONNECTOR.clone())));

/// Shared base; carries no connection settings of its own
struct Base;

impl Model for Base {
    const NAME: &'static str = "Base";

    fn declaration() -> Declaration {
        Declaration::new()
            .field("name", FieldSpec::new(FieldType::String))
            .registry(REGISTRY.clone())
            .abstract_base()
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

struct Child;

impl Model for Child {
    const NAME: &'static str = "Child";

    fn declaration() -> Declaration {
        Declaration::new().inherit::<Base>()
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

struct Archived;

impl Model for Archived {
    const NAME: &'static str = "Archived";

    fn declaration() -> Declaration {
        Declaration::new().inherit::<Base>().db_name("archive")
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

#[tokio::test]
async fn test_registry_default_serves_every_type() {
    let Err(err) =
        Document::<Base>::init_db("memory://root", None, None, &ClientConfig::default()).await
    else {
        panic!("an abstract base cannot be bound");
    };
    assert!(err.is_schema_error());

    let Err(err) = Document::<Child>::resolve_collection().await else {
        panic!("no client before the registry is initialized");
    };
    assert!(matches!(err, MongoDmError::MissingConfiguration(_)));

    REGISTRY
        .init_db("memory://root", Some("mytest"), None, &ClientConfig::default())
        .await
        .unwrap();

    let child = Document::<Child>::resolve_collection().await.unwrap();
    assert_eq!(child.database_name(), "mytest");
    assert_eq!(child.name(), "childs");

    let archived = Document::<Archived>::resolve_collection().await.unwrap();
    assert_eq!(archived.database_name(), "archive");
    assert_eq!(archived.name(), "archiveds");

    let mut doc = Document::<Child>::from_fields([("name", "kavin")]).unwrap();
    doc.save(None).await.unwrap();
    let id = doc.id().cloned().unwrap();
    assert!(matches!(id, Bson::ObjectId(_)));
    Document::<Archived>::from_fields([("name", "old")])
        .unwrap()
        .save(None)
        .await
        .unwrap();

    let deployment = CONNECTOR.deployment("memory://root");
    assert_eq!(deployment.document_count("mytest", "childs"), 1);
    assert_eq!(deployment.document_count("archive", "archiveds"), 1);
    assert!(Document::<Child>::find_by_id(id, None).await.unwrap().is_some());

    // one client, never registered by name
    assert_eq!(CONNECTOR.connections(), 1);
    assert!(REGISTRY.is_empty());
}
