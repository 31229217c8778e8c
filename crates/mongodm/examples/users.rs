/// Example: basic CRUD, schema indexes and switching databases
///
/// Runs against MongoDB when `MONGODB_URL` is set, otherwise in process:
/// `MONGODB_URL=mongodb://localhost:27017 cargo run -p mongodm --example users`
use std::sync::Arc;

use futures::TryStreamExt;
use mongodm::bson::doc;
use mongodm::{
    async_trait, class_cell, ClassCell, ClientConfig, ClientRegistry, Declaration, Document,
    FieldSpec, FieldType, IndexKind, MemoryConnector, Model, Result,
};
use once_cell::sync::Lazy;

static MEMORY: Lazy<Arc<ClientRegistry>> =
    Lazy::new(|| Arc::new(ClientRegistry::new(Arc::new(MemoryConnector::new()))));

fn registry() -> Arc<ClientRegistry> {
    if std::env::var("MONGODB_URL").is_ok() {
        ClientRegistry::global()
    } else {
        MEMORY.clone()
    }
}

struct User;

#[async_trait]
impl Model for User {
    const NAME: &'static str = "User";

    fn declaration() -> Declaration {
        Declaration::new()
            .field(
                "name",
                FieldSpec::new(FieldType::String)
                    .default("my_default_name")
                    .index(IndexKind::Descending),
            )
            .field("sex", FieldSpec::new(FieldType::Bool))
            .field(
                "age",
                FieldSpec::new(FieldType::Int).default(20).index(IndexKind::Ascending),
            )
            .field("createdAt", FieldSpec::new(FieldType::DateTime).index(IndexKind::Descending))
            .field("updatedAt", FieldSpec::new(FieldType::DateTime))
            .registry(registry())
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }

    async fn after_save(document: &mut Document<Self>) -> Result<()> {
        tracing::info!(user = %document, "saved");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("MONGODB_URL").unwrap_or_else(|_| "memory://users-demo".to_string());
    Document::<User>::init_db(&url, Some("mongodm_demo"), None, &ClientConfig::default()).await?;

    // CRUD
    let mut user = Document::<User>::from_fields([("name", "kavin")])?;
    user.set("sex", true)?;
    user.save(None).await?;
    println!("inserted {}", user);

    user.set("age", 30)?;
    user.save(None).await?;

    let id = user.id().cloned().unwrap_or_default();
    if let Some(found) = Document::<User>::find_by_id(id.clone(), None).await? {
        println!("found    {}", found);
    }

    for name in ["felix", "ada"] {
        Document::<User>::from_fields([("name", name)])?.save(None).await?;
    }
    let adults: Vec<_> = Document::<User>::find(Some(doc! { "age": { "$gte": 20 } }), None, None)
        .await?
        .try_collect()
        .await?;
    println!("{} users aged 20 or more", adults.len());
    println!("{} users in total", Document::<User>::count(None, None, None).await?);

    // Indexes declared in the schema
    let names = Document::<User>::create_index(None, None).await?;
    println!("created indexes {:?}", names);
    let compound = Document::<User>::create_compound_index(
        [("name", IndexKind::Ascending), ("age", IndexKind::Descending)],
        None,
        None,
    )
    .await?;
    println!("created compound index {}", compound);
    println!("index info {}", Document::<User>::get_index_info(None).await?);

    // Switch to another database
    let archive = Document::<User>::get_collection(Some("mongodm_demo_archive")).await?;
    println!("now writing to {}.{}", archive.database_name(), archive.name());
    Document::<User>::from_fields([("name", "archived")])?.save(None).await?;

    // Clean up
    Document::<User>::get_collection(Some("mongodm_demo")).await?;
    user.delete(None).await?;
    Document::<User>::delete_by_id(id, None).await?;
    Document::<User>::drop_indexes(None).await?;
    Ok(())
}
