//! Tests against a running MongoDB server
//!
//! Ignored by default. Run with:
//! `MONGODB_URL=mongodb://localhost:27017 cargo test -p mongodm --test live_mongodb -- --ignored`

use mongodm::bson::{doc, Bson};
use mongodm::{class_cell, ClassCell, ClientConfig, Declaration, Document, Model};

fn mongodb_url() -> String {
    std::env::var("MONGODB_URL").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

struct LiveUser;

impl Model for LiveUser {
    const NAME: &'static str = "LiveUser";

    fn declaration() -> Declaration {
        Declaration::new()
            .schema(doc! {
                "name": { "type": "string", "default": "my_default_name", "index": -1 },
                "age": { "type": "int", "default": 20, "index": 1 },
                "createdAt": { "type": "datetime", "index": -1 },
                "updatedAt": { "type": "datetime" },
            })
            .db_name("mongodm_live_test")
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

#[tokio::test]
#[ignore]
async fn test_live_round_trip() {
    Document::<LiveUser>::init_db(&mongodb_url(), None, None, &ClientConfig::default())
        .await
        .expect("MongoDB must be reachable");

    let mut user = Document::<LiveUser>::from_fields([("name", "live")]).unwrap();
    user.save(None).await.unwrap();
    let id = user.id().cloned().unwrap();
    assert!(matches!(id, Bson::ObjectId(_)));

    user.set("age", 42).unwrap();
    user.save(None).await.unwrap();
    user.refresh(None).await.unwrap();
    assert_eq!(user.get("age").unwrap(), &Bson::Int32(42));

    let names = Document::<LiveUser>::create_index(None, None).await.unwrap();
    assert_eq!(names, vec!["name_-1", "age_1", "createdAt_-1"]);
    let info = Document::<LiveUser>::get_index_info(None).await.unwrap();
    assert!(info.contains_key("_id_"));

    assert_eq!(user.delete(None).await.unwrap(), 1);
    assert!(Document::<LiveUser>::find_by_id(id, None).await.unwrap().is_none());
    Document::<LiveUser>::drop_indexes(None).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_live_session_is_threaded_through() {
    let client =
        Document::<LiveUser>::init_db(&mongodb_url(), None, None, &ClientConfig::default())
            .await
            .expect("MongoDB must be reachable");
    let mut session = client.start_session().await.unwrap();

    let mut user = Document::<LiveUser>::from_fields([("name", "session")]).unwrap();
    user.save(Some(&mut session)).await.unwrap();
    let found = Document::<LiveUser>::find_by_id(user.id().cloned().unwrap(), Some(&mut session))
        .await
        .unwrap();
    assert!(found.is_some());
    user.delete(Some(&mut session)).await.unwrap();
}
