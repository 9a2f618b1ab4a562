//! Persistence lifecycle against the in-memory backend

use chrono::NaiveDate;
use motor_odm::backend::memory::MemoryDatabase;
use motor_odm::fields::{
    BinaryField, BooleanField, DateTimeField, DecimalField, DictField, EmailField,
    EmbeddedDocumentField, Field, FloatField, IntField, JsonField, ListField, ObjectIdField,
    StringField, UrlField, UuidField,
};
use motor_odm::{
    Database, Direction, Document, OdmError, QuerySet, Schema, SchemaBuilder, Value, Q,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn memory_db() -> Database {
    Database::new("test", "test", Arc::new(MemoryDatabase::new("test")))
}

fn user_schema() -> Arc<Schema> {
    SchemaBuilder::new("User")
        .collection("users")
        .field("name", StringField::new().required())
        .field("email", EmailField::new().unique())
        .field("age", IntField::new())
        .build()
        .unwrap()
}

async fn seed_users(qs: &QuerySet) {
    for (name, email, age) in [
        ("Bernardo", "bernardo@example.com", 31),
        ("Rafael", "rafael@example.com", 25),
        ("Heynemann", "heynemann@example.com", 40),
    ] {
        qs.create([
            ("name", Value::from(name)),
            ("email", Value::from(email)),
            ("age", Value::from(age)),
        ])
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_save_then_get_returns_equal_document() {
    let schema = SchemaBuilder::new("Everything")
        .field("string", StringField::new())
        .field("int", IntField::new())
        .field("float", FloatField::new())
        .field("decimal", DecimalField::new())
        .field("boolean", BooleanField::new())
        .field("datetime", DateTimeField::new())
        .field("binary", BinaryField::new())
        .field("json", JsonField::new())
        .field("dict", DictField::new())
        .field("uuid", UuidField::new())
        .field("url", UrlField::new())
        .field("email", EmailField::new())
        .field("object_id", ObjectIdField::new())
        .field("tags", ListField::new(StringField::new()))
        .build()
        .unwrap();
    let qs = QuerySet::new(schema.clone(), memory_db());

    let stamp = NaiveDate::from_ymd_opt(2014, 3, 1)
        .unwrap()
        .and_hms_milli_opt(12, 30, 15, 250)
        .unwrap();
    let mut doc = Document::with_values(
        schema,
        [
            ("string", Value::from("text")),
            ("int", Value::from(42)),
            ("float", Value::from(1.5)),
            ("decimal", Value::from(Decimal::new(1234, 2))),
            ("boolean", Value::from(true)),
            ("datetime", Value::from(stamp)),
            ("binary", Value::Binary(vec![0, 1, 2, 255])),
            ("json", Value::from(json!({"b": [1, 2], "a": "x"}))),
            ("dict", Value::from(json!({"nested": {"n": 3}, "flag": false}))),
            ("uuid", Value::from(Uuid::new_v4())),
            ("url", Value::from("http://example.com/path")),
            ("email", Value::from("someone@example.com")),
            ("object_id", Value::from(bson::oid::ObjectId::new())),
            ("tags", Value::from(vec!["a", "b"])),
        ],
    )
    .unwrap();

    qs.save(&mut doc).await.unwrap();
    let id = doc.id().expect("identity assigned on insert");

    let loaded = qs.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(loaded, doc);
}

#[tokio::test]
async fn test_get_missing_id_is_none() {
    let qs = QuerySet::new(user_schema(), memory_db());
    assert!(qs.get_by_id(bson::oid::ObjectId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_by_filter() {
    let qs = QuerySet::new(user_schema(), memory_db());
    seed_users(&qs).await;

    let found = qs
        .get(None, Some(Q::lookup("age__lt", 30)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name"), Some(&Value::from("Rafael")));
}

#[tokio::test]
async fn test_partly_loaded_save_fails_and_writes_nothing() {
    let qs = QuerySet::new(user_schema(), memory_db());
    let saved = qs
        .create([("name", "Bernardo"), ("email", "bernardo@example.com")])
        .await
        .unwrap();
    let id = saved.id().unwrap();

    let mut partial = qs.clone().only(["name"]).get_by_id(id).await.unwrap().unwrap();
    assert!(partial.is_partly_loaded());
    assert_eq!(partial.loaded_fields(), Some(&["name".to_string()][..]));
    assert_eq!(partial.get("email"), Some(&Value::Null));

    partial.set("name", "Changed").unwrap();
    let err = qs.save(&mut partial).await.unwrap_err();
    assert!(matches!(err, OdmError::PartlyLoaded { .. }));

    let stored = qs.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored, saved);
}

#[tokio::test]
async fn test_exclude_loads_remaining_fields() {
    let mut qs = QuerySet::new(user_schema(), memory_db()).exclude(["email"]);
    seed_users(&qs).await;

    let docs = qs.find_all(None).await.unwrap();
    assert_eq!(docs.len(), 3);
    for doc in &docs {
        assert!(doc.is_partly_loaded());
        assert_eq!(doc.get("email"), Some(&Value::Null));
        assert!(!doc.get("name").unwrap().is_null());
    }
}

#[tokio::test]
async fn test_bulk_insert_is_atomic_at_validation() {
    let mut qs = QuerySet::new(user_schema(), memory_db());
    let schema = qs.schema().clone();
    let mut docs = vec![
        Document::with_values(schema.clone(), [("name", "a")]).unwrap(),
        Document::with_values(schema.clone(), [("age", 3)]).unwrap(),
        Document::with_values(schema.clone(), [("name", "c")]).unwrap(),
    ];

    let before = qs.count().await.unwrap();
    let err = qs.bulk_insert(&mut docs).await.unwrap_err();
    match err {
        OdmError::BatchValidation { index, source } => {
            assert_eq!(index, 1);
            assert!(matches!(*source, OdmError::InvalidField { ref field, .. } if field == "name"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(qs.count().await.unwrap(), before);
    assert!(docs.iter().all(|doc| doc.id().is_none()));

    docs[1].set("name", "b").unwrap();
    docs[0].set("email", "a@example.com").unwrap();
    docs[1].set("email", "b@example.com").unwrap();
    docs[2].set("email", "c@example.com").unwrap();
    qs.bulk_insert(&mut docs).await.unwrap();
    assert!(docs.iter().all(|doc| doc.id().is_some()));
    assert_eq!(qs.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_unique_violation_keeps_one_document() {
    let mut qs = QuerySet::new(user_schema(), memory_db());
    qs.create([("name", "a"), ("email", "same@example.com")])
        .await
        .unwrap();

    let err = qs
        .create([("name", "b"), ("email", "same@example.com")])
        .await
        .unwrap_err();
    match err {
        OdmError::UniqueKeyViolation { document, index, key } => {
            assert_eq!(document, "User");
            assert_eq!(index, "email_1");
            assert!(key.contains("same@example.com"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let mut same = qs.clone().filter(Q::field("email").eq("same@example.com"));
    assert_eq!(same.count().await.unwrap(), 1);
    assert_eq!(qs.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_reports_matched_count() {
    let qs = QuerySet::new(user_schema(), memory_db());
    seed_users(&qs).await;

    let mut adults = qs.clone().filter(Q::field("age").gt(30));
    let outcome = adults.update([("age", 50)]).await.unwrap();
    assert_eq!(outcome.count, 2);
    assert!(outcome.updated_existing);

    let mut fifty = qs.clone().filter(Q::field("age").eq(50));
    assert_eq!(fifty.count().await.unwrap(), 2);

    let mut nobody = qs.clone().filter(Q::field("name").eq("nobody"));
    let outcome = nobody.update([("age", 1)]).await.unwrap();
    assert_eq!(outcome.count, 0);
    assert!(!outcome.updated_existing);
}

#[tokio::test]
async fn test_remove_without_filter_deletes_everything() {
    let mut qs = QuerySet::new(user_schema(), memory_db());
    seed_users(&qs).await;

    let before = qs.count().await.unwrap();
    assert_eq!(qs.remove(None).await.unwrap(), before);
    assert_eq!(qs.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_remove_instance_and_filtered() {
    let mut qs = QuerySet::new(user_schema(), memory_db());
    seed_users(&qs).await;
    let db = qs.database().clone();

    let first = qs
        .clone()
        .order_by("age", Direction::Ascending)
        .limit(1)
        .find_all(None)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(first.delete(&db).await.unwrap(), 1);

    let mut old = qs.clone().filter(Q::lookup("age__gte", 40));
    assert_eq!(old.remove(None).await.unwrap(), 1);
    assert_eq!(qs.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_find_all_orders_and_pages() {
    let qs = QuerySet::new(user_schema(), memory_db());
    seed_users(&qs).await;

    let names = |docs: Vec<Document>| -> Vec<String> {
        docs.iter()
            .map(|doc| doc.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
            .collect()
    };

    let mut ordered = qs.clone().order_by("age", Direction::Descending);
    assert_eq!(
        names(ordered.find_all(None).await.unwrap()),
        vec!["Heynemann", "Bernardo", "Rafael"]
    );

    let mut paged = qs.clone().order_by("name", Direction::Ascending).skip(1).limit(1);
    assert_eq!(names(paged.find_all(None).await.unwrap()), vec!["Heynemann"]);

    let mut either = qs
        .clone()
        .filter(Q::field("name").eq("Rafael") | Q::field("age").gte(40))
        .order_by("age", Direction::Ascending);
    assert_eq!(
        names(either.find_all(None).await.unwrap()),
        vec!["Rafael", "Heynemann"]
    );

    let mut not_rafael = qs.clone().filter(!Q::field("name").eq("Rafael"));
    assert_eq!(not_rafael.count().await.unwrap(), 2);

    let mut pattern = qs.clone().filter(Q::field("name").regex_with("^b", "i"));
    assert_eq!(pattern.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_find_all_clears_filters() {
    let qs = QuerySet::new(user_schema(), memory_db());
    seed_users(&qs).await;

    let mut filtered = qs.clone().filter(Q::field("age").is_in(vec![25, 31]));
    assert_eq!(filtered.find_all(None).await.unwrap().len(), 2);
    assert_eq!(filtered.find_all(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_auto_now_on_insert_is_set_once() {
    let schema = SchemaBuilder::new("Created")
        .field("name", StringField::new())
        .field("created_at", DateTimeField::new().auto_now_on_insert())
        .build()
        .unwrap();
    let qs = QuerySet::new(schema, memory_db());

    let mut doc = qs.create([("name", "a")]).await.unwrap();
    let created = doc.get("created_at").and_then(Value::as_datetime).unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    doc.set("name", "b").unwrap();
    qs.save(&mut doc).await.unwrap();

    assert_eq!(doc.get("created_at").and_then(Value::as_datetime), Some(created));
    let stored = qs.get_by_id(doc.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.get("created_at").and_then(Value::as_datetime), Some(created));
}

#[tokio::test]
async fn test_auto_now_on_update_increases() {
    let schema = SchemaBuilder::new("Touched")
        .field("updated_at", DateTimeField::new().auto_now_on_update())
        .build()
        .unwrap();
    let qs = QuerySet::new(schema.clone(), memory_db());

    let mut doc = Document::new(schema);
    qs.save(&mut doc).await.unwrap();
    let first = doc.get("updated_at").and_then(Value::as_datetime).unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    qs.save(&mut doc).await.unwrap();
    let second = doc.get("updated_at").and_then(Value::as_datetime).unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn test_embedded_timestamps_and_round_trip() {
    let address = SchemaBuilder::new("Address")
        .field("city", StringField::new().required())
        .field("added_at", DateTimeField::new().auto_now_on_insert())
        .build()
        .unwrap();
    let person = SchemaBuilder::new("Person")
        .field("name", StringField::new())
        .field("home", EmbeddedDocumentField::new(address.clone()))
        .build()
        .unwrap();
    let qs = QuerySet::new(person.clone(), memory_db());

    let home = Document::with_values(address.clone(), [("city", "Rio")]).unwrap();
    let mut doc = Document::with_values(
        person,
        [("name", Value::from("Bernardo")), ("home", Value::from(home))],
    )
    .unwrap();
    qs.save(&mut doc).await.unwrap();

    let embedded = doc.get("home").and_then(Value::as_document).unwrap();
    assert!(embedded.get("added_at").and_then(Value::as_datetime).is_some());
    assert!(embedded.id().is_none());

    let loaded = qs.get_by_id(doc.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(loaded, doc);

    let mut by_city = qs.clone().filter(Q::field("home.city").eq("Rio"));
    assert_eq!(by_city.count().await.unwrap(), 1);

    let invalid = Document::new(address);
    let mut broken = Document::new(qs.schema().clone());
    broken.set("home", invalid).unwrap();
    assert!(qs.save(&mut broken).await.unwrap_err().is_validation());
}

#[test]
fn test_url_field_scenario() {
    let field = UrlField::new();
    assert!(!field.validate(&Value::from("not a url")));
    assert!(field.validate(&Value::from("http://example.com/")));
    assert!(field.validate(&Value::Null));
}

#[tokio::test]
async fn test_inherited_schema_persists_parent_fields() {
    let base = SchemaBuilder::new("BaseUser")
        .field("name", StringField::new().required())
        .build()
        .unwrap();
    let admin = SchemaBuilder::new("Admin")
        .inherit(&base)
        .field("level", IntField::new().default(1))
        .build()
        .unwrap();
    let qs = QuerySet::new(admin, memory_db());

    let doc = qs.create([("name", "root")]).await.unwrap();
    let loaded = qs.get_by_id(doc.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(loaded.get("name"), Some(&Value::from("root")));
    assert_eq!(loaded.get("level"), Some(&Value::Int(1)));
}
