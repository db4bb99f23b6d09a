/// Expiration scope tests
///
/// Default filtering, with_expired / only_expired and bulk expire / unexpire
/// Run with: cargo test --test expiration_scope_tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use expirable::prelude::*;
use expirable::{DbError, ExpirationScope};
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn posts() -> Arc<RecordType> {
    RecordTypeBuilder::new("Post", "posts")
        .column(Column::new("id", DataType::Integer))
        .column(Column::new("title", DataType::Text))
        .column(Column::new("expired_at", DataType::Timestamp))
        .behavior(Expires)
        .build()
        .unwrap()
}

/// A: never expires, B: expired yesterday, C: expires tomorrow.
fn seeded() -> (Database, Arc<RecordType>, ManualClock) {
    let clock = ManualClock::new(now());
    let db = Database::with_clock(clock.clone());
    let ty = posts();
    db.create_table(&ty).unwrap();

    db.create(&ty, [("title", Value::from("A")), ("expired_at", Value::Null)]).unwrap();
    db.create(&ty, [("title", Value::from("B")), ("expired_at", Value::from(now() - Duration::days(1)))]).unwrap();
    db.create(&ty, [("title", Value::from("C")), ("expired_at", Value::from(now() + Duration::days(1)))]).unwrap();

    (db, ty, clock)
}

fn titles(query: &Query<'_>) -> Vec<String> {
    let mut titles: Vec<String> = query
        .get()
        .unwrap()
        .iter()
        .map(|r| r.get("title").and_then(Value::as_str).unwrap().to_string())
        .collect();
    titles.sort();
    titles
}

#[test]
fn test_default_query_hides_expired() {
    let (db, ty, _) = seeded();
    assert_eq!(titles(&db.query(&ty)), vec!["A", "C"]);
    assert_eq!(db.query(&ty).count().unwrap(), 2);
}

#[test]
fn test_only_expired() {
    let (db, ty, _) = seeded();
    assert_eq!(titles(&db.query(&ty).only_expired().unwrap()), vec!["B"]);
}

#[test]
fn test_with_expired_returns_everything() {
    let (db, ty, _) = seeded();
    assert_eq!(titles(&db.query(&ty).with_expired().unwrap()), vec!["A", "B", "C"]);
}

#[test]
fn test_with_expired_then_only_expired() {
    let (db, ty, _) = seeded();
    let chained = db.query(&ty).with_expired().unwrap().only_expired().unwrap();
    assert_eq!(titles(&chained), titles(&db.query(&ty).only_expired().unwrap()));
}

#[test]
fn test_time_passing_moves_rows_between_views() {
    let (db, ty, clock) = seeded();
    clock.advance(Duration::days(2));

    assert_eq!(titles(&db.query(&ty)), vec!["A"]);
    assert_eq!(titles(&db.query(&ty).only_expired().unwrap()), vec!["B", "C"]);
}

#[test]
fn test_boundary_instant_is_in_neither_view() {
    let (db, ty, _) = seeded();
    db.create(&ty, [("title", Value::from("D")), ("expired_at", Value::from(now()))]).unwrap();

    assert_eq!(titles(&db.query(&ty)), vec!["A", "C"]);
    assert_eq!(titles(&db.query(&ty).only_expired().unwrap()), vec!["B"]);
    assert_eq!(db.query(&ty).with_expired().unwrap().count().unwrap(), 4);
}

#[test]
fn test_caller_or_cannot_leak_expired_rows() {
    let (db, ty, _) = seeded();
    let query = db.query(&ty).where_eq("title", "A").or_where_eq("title", "B");
    assert_eq!(titles(&query), vec!["A"]);

    let sql = query.to_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT posts.* FROM posts WHERE (title = 'A' OR title = 'B') AND \
         (expired_at > '2024-06-01 12:00:00.000000' OR expired_at IS NULL)"
    );
}

#[test]
fn test_find_goes_through_scope() {
    let (db, ty, _) = seeded();
    let b = db.query(&ty).only_expired().unwrap().first().unwrap().unwrap();
    assert!(db.find(&ty, b.key().clone()).unwrap().is_none());
}

#[test]
fn test_bulk_expire_stamps_visible_rows() {
    let (db, ty, _) = seeded();
    let affected = db.query(&ty).where_eq("title", "A").expire().unwrap();
    assert_eq!(affected, 1);

    assert_eq!(titles(&db.query(&ty)), vec!["C"]);

    let a = db.query(&ty).with_expired().unwrap().where_eq("title", "A").first().unwrap().unwrap();
    assert_eq!(a.get("expired_at"), Some(&Value::Timestamp(now())));
    assert!(a.is_expired(&db).unwrap());
}

#[test]
fn test_bulk_expire_skips_already_expired_rows() {
    let (db, ty, _) = seeded();
    assert_eq!(db.query(&ty).expire().unwrap(), 2);
    assert_eq!(db.query(&ty).count().unwrap(), 0);
}

#[test]
fn test_bulk_unexpire_reaches_expired_rows() {
    let (db, ty, _) = seeded();
    let affected = db.query(&ty).unexpire().unwrap();
    assert_eq!(affected, 3);
    assert_eq!(titles(&db.query(&ty)), vec!["A", "B", "C"]);
    assert_eq!(db.query(&ty).only_expired().unwrap().count().unwrap(), 0);
}

#[test]
fn test_bulk_unexpire_touches_updated_at() {
    let clock = ManualClock::new(now());
    let db = Database::with_clock(clock.clone());
    let ty = RecordTypeBuilder::new("Coupon", "coupons")
        .column(Column::new("id", DataType::Integer))
        .column(Column::new("expired_at", DataType::Timestamp))
        .timestamps(true)
        .behavior(Expires)
        .build()
        .unwrap();
    db.create_table(&ty).unwrap();

    let mut coupon = db.create(&ty, [("expired_at", Value::from(now() - Duration::hours(1)))]).unwrap();
    assert_eq!(coupon.get("updated_at"), Some(&Value::Timestamp(now())));

    clock.advance(Duration::minutes(5));
    assert_eq!(db.query(&ty).unexpire().unwrap(), 1);

    coupon.refresh(&db).unwrap();
    assert_eq!(coupon.get("expired_at"), Some(&Value::Null));
    assert_eq!(coupon.get("updated_at"), Some(&Value::Timestamp(now() + Duration::minutes(5))));
}

#[test]
fn test_joined_query_uses_qualified_column() {
    let (db, ty, _) = seeded();
    let tags = RecordTypeBuilder::new("Tag", "tags")
        .column(Column::new("id", DataType::Integer))
        .column(Column::new("post_id", DataType::Integer))
        .column(Column::new("expired_at", DataType::Timestamp))
        .build()
        .unwrap();
    db.create_table(&tags).unwrap();

    for post in db.query(&ty).with_expired().unwrap().get().unwrap() {
        db.create(&tags, [("post_id", post.key().clone())]).unwrap();
    }

    let joined = db.query(&ty).join("tags", "posts.id", CompareOp::Eq, "tags.post_id");
    assert_eq!(ExpirationScope::resolve_expired_at_column(&joined), "posts.expired_at");
    assert_eq!(titles(&joined), vec!["A", "C"]);

    let expired = db
        .query(&ty)
        .join("tags", "posts.id", CompareOp::Eq, "tags.post_id")
        .only_expired()
        .unwrap();
    assert_eq!(titles(&expired), vec!["B"]);

    // Without qualification the column would be ambiguous.
    let bare = db
        .query_without_scopes(&ty)
        .join("tags", "posts.id", CompareOp::Eq, "tags.post_id")
        .where_null("expired_at");
    assert!(matches!(bare.get(), Err(DbError::AmbiguousColumn(_))));
}

#[test]
fn test_joined_bulk_expire() {
    let (db, ty, _) = seeded();
    let authors = RecordTypeBuilder::new("Author", "authors")
        .column(Column::new("id", DataType::Integer))
        .column(Column::new("post_id", DataType::Integer))
        .column(Column::new("name", DataType::Text))
        .build()
        .unwrap();
    db.create_table(&authors).unwrap();

    let c = db.query(&ty).where_eq("title", "C").first().unwrap().unwrap();
    db.create(&authors, [("post_id", c.key().clone()), ("name", Value::from("ann"))]).unwrap();

    let affected = db
        .query(&ty)
        .join("authors", "posts.id", CompareOp::Eq, "authors.post_id")
        .where_eq("authors.name", "ann")
        .expire()
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(titles(&db.query(&ty)), vec!["A"]);
}

#[test]
fn test_custom_column_through_constant() {
    let db = Database::with_clock(ManualClock::new(now()));
    let ty = RecordTypeBuilder::new("Offer", "offers")
        .column(Column::new("id", DataType::Integer))
        .column(Column::new("ends_at", DataType::Timestamp))
        .constant("EXPIRED_AT", "ends_at")
        .behavior(Expires)
        .build()
        .unwrap();
    db.create_table(&ty).unwrap();

    db.create(&ty, [("ends_at", Value::from(now() - Duration::seconds(1)))]).unwrap();
    db.create(&ty, [("ends_at", Value::Null)]).unwrap();

    assert_eq!(db.query(&ty).count().unwrap(), 1);
    assert_eq!(db.query(&ty).only_expired().unwrap().count().unwrap(), 1);
    assert!(db.query(&ty).to_sql().unwrap().contains("ends_at IS NULL"));
}

#[test]
fn test_expiration_operations_unavailable_without_behavior() {
    let db = Database::new();
    let ty = RecordTypeBuilder::new("Note", "notes")
        .column(Column::new("id", DataType::Integer))
        .column(Column::new("expired_at", DataType::Timestamp))
        .build()
        .unwrap();
    db.create_table(&ty).unwrap();

    assert!(matches!(db.query(&ty).expire(), Err(DbError::UnsupportedOperation(_))));
    assert!(matches!(db.query(&ty).only_expired(), Err(DbError::UnsupportedOperation(_))));
}

#[test]
fn test_text_timestamps_use_configured_format() {
    let config = DatabaseConfig::new().date_format("%d/%m/%Y %H:%M:%S");
    let db = Database::with_config(config, Arc::new(ManualClock::new(now()))).unwrap();
    let ty = posts();
    db.create_table(&ty).unwrap();

    db.create(&ty, [("title", Value::from("old")), ("expired_at", Value::from("31/05/2024 08:00:00"))]).unwrap();
    assert_eq!(db.query(&ty).count().unwrap(), 0);

    db.query(&ty).unexpire().unwrap();
    db.query(&ty).expire().unwrap();
    let post = db.query(&ty).with_expired().unwrap().first().unwrap().unwrap();
    assert_eq!(post.get("expired_at"), Some(&Value::Timestamp(now())));
}

#[test]
fn test_concurrent_readers() {
    let (db, ty, _) = seeded();
    let db = Arc::new(db);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            let ty = Arc::clone(&ty);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    assert_eq!(db.query(&ty).count().unwrap(), 2);
                    assert_eq!(db.query(&ty).only_expired().unwrap().count().unwrap(), 1);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
