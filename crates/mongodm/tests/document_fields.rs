//! Field access on document instances

mod common;

use mongodm::bson::{doc, oid::ObjectId, Bson};
use mongodm::{
    class_cell, ClassCell, Declaration, Document, FieldSpec, FieldType, IndexKind, Model,
};

struct User;

impl Model for User {
    const NAME: &'static str = "User";

    fn declaration() -> Declaration {
        Declaration::new()
            .schema(doc! {
                "name": { "type": "string", "default": "my_default_name", "index": -1 },
                "age": { "type": "int", "default": 20, "index": 1 },
                "sex": { "type": "bool" },
                "createdAt": { "type": "datetime", "index": -1 },
                "updatedAt": { "type": "datetime" },
            })
            .registry(common::registry())
            .url("memory://document-fields")
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

struct Pet;

impl Model for Pet {
    const NAME: &'static str = "Pet";

    fn declaration() -> Declaration {
        Declaration::new()
            .field("name", FieldSpec::new(FieldType::String))
            .field("age", FieldSpec::new(FieldType::Int).index(IndexKind::Ascending))
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

struct MissingType;

impl Model for MissingType {
    const NAME: &'static str = "MissingType";

    fn declaration() -> Declaration {
        Declaration::new().schema(doc! { "name": { "default": "x" } })
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

struct BadDefault;

impl Model for BadDefault {
    const NAME: &'static str = "BadDefault";

    fn declaration() -> Declaration {
        Declaration::new().field("age", FieldSpec::new(FieldType::Int).default("twenty"))
    }

    fn cell() -> &'static ClassCell {
        class_cell!()
    }
}

#[test]
fn test_new_has_exactly_the_defaults() {
    let user = Document::<User>::new().unwrap();
    assert_eq!(user.len(), 2);
    assert_eq!(user.get("name").unwrap(), &Bson::String("my_default_name".into()));
    assert_eq!(user.get("age").unwrap(), &Bson::Int32(20));
    assert!(!user.contains_key("sex"));
    assert!(user.id().is_none());

    let pet = Document::<Pet>::new().unwrap();
    assert!(pet.is_empty());
}

#[test]
fn test_from_fields_overrides_defaults() {
    let user = Document::<User>::from_fields([
        ("name", Bson::from("kavin")),
        ("sex", Bson::from(true)),
    ])
    .unwrap();
    let keys: Vec<&str> = user.keys().collect();
    assert_eq!(keys, vec!["name", "age", "sex"]);
    assert_eq!(user.get("name").unwrap(), &Bson::String("kavin".into()));
}

#[test]
fn test_undeclared_field_is_rejected() {
    let mut user = Document::<User>::new().unwrap();
    let err = user.set("test", 1).unwrap_err();
    assert!(err.is_attribute_error());
    assert_eq!(err.message(), "'User' object has no attribute 'test' definition");
    assert!(!user.contains_key("test"));
}

#[test]
fn test_wrong_type_is_rejected() {
    let mut user = Document::<User>::new().unwrap();
    let err = user.set("name", 20).unwrap_err();
    assert!(err.is_attribute_error());
    assert!(err.message().contains("'name' has not correct type string"));
    assert_eq!(user.get("name").unwrap(), &Bson::String("my_default_name".into()));

    assert!(user.set("sex", "male").is_err());
    assert!(user.set("createdAt", "2024-01-01").is_err());
}

#[test]
fn test_identity_key_is_exempt() {
    let mut user = Document::<User>::new().unwrap();
    user.set("_id", ObjectId::new()).unwrap();
    user.set("_id", "custom").unwrap();
    assert!(user.is_persisted());
}

#[test]
fn test_construction_stops_at_first_violation() {
    let result = Document::<User>::from_fields([
        ("name", Bson::from("kavin")),
        ("unknown", Bson::from(1)),
    ]);
    assert!(result.unwrap_err().is_attribute_error());
}

#[test]
fn test_remove_and_iterate() {
    let mut user = Document::<User>::from_fields([("sex", false)]).unwrap();
    assert_eq!(user.remove("age").unwrap(), Bson::Int32(20));
    assert!(user.remove("age").is_err());
    let pairs: Vec<(&str, &Bson)> = user.iter().collect();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[1], ("sex", &Bson::Boolean(false)));
}

#[test]
fn test_equal_data_means_equal_documents() {
    let first = Document::<User>::from_fields([("sex", true)]).unwrap();
    let second = Document::<User>::from_fields([("sex", true)]).unwrap();
    assert_eq!(first, second);

    let mut third = second.clone();
    third.set("age", 21).unwrap();
    assert_ne!(first, third);
}

#[test]
fn test_display_names_the_type() {
    let user = Document::<User>::new().unwrap();
    assert_eq!(
        user.to_string(),
        "<User({\"name\": \"my_default_name\", \"age\": 20})>"
    );
}

#[test]
fn test_create_instance() {
    assert!(Document::<User>::create_instance(None).unwrap().is_none());
    assert!(Document::<User>::create_instance(Some(Bson::String("x".into())))
        .unwrap()
        .is_none());

    let user = Document::<User>::create_instance(Some(Bson::Document(doc! { "age": 30 })))
        .unwrap()
        .unwrap();
    assert_eq!(user.get("age").unwrap(), &Bson::Int32(30));
    assert_eq!(user.get("name").unwrap(), &Bson::String("my_default_name".into()));

    let err = Document::<User>::create_instance(Some(Bson::Document(doc! { "nope": 1 })))
        .unwrap_err();
    assert!(err.is_attribute_error());
}

#[test]
fn test_missing_type_fails_class_definition() {
    let err = Document::<MissingType>::new().unwrap_err();
    assert!(err.is_schema_error());
    assert_eq!(err.message(), "field 'name' not has 'type' definition");
}

#[test]
fn test_default_of_wrong_type_fails_class_definition() {
    let err = BadDefault::class().unwrap_err();
    assert!(err.is_schema_error());
    assert_eq!(err.message(), "field 'age' default value has error type");
}

#[test]
fn test_typed_access() {
    let user = Document::<User>::new().unwrap();
    let age: i64 = user.get_as("age").unwrap();
    assert_eq!(age, 20);
    let name: String = user.get_as("name").unwrap();
    assert_eq!(name, "my_default_name");
    assert!(user.get_as::<String>("sex").is_err());
}
