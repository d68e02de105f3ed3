mod common;

use std::fs;

use common::{AIRBNB, SHOPPING, TABLE, TestWorkspace, fixture_path, ingest_fixture, options};
use dataset_analytics::{
    data::StorageType,
    ingest::{self, IngestError, canonicalize_header, read_upload_from_reader},
    queries,
    shape::ShapeRegistry,
    store::Store,
};
use proptest::prelude::*;

fn column_text(store: &Store, column: &str) -> Vec<Option<String>> {
    let mut stmt = store
        .connection()
        .prepare(&format!("SELECT \"{column}\" FROM \"{TABLE}\" ORDER BY rowid"))
        .expect("prepare select");
    stmt.query_map([], |row| row.get::<_, Option<String>>(0))
        .expect("query column")
        .map(|row| row.expect("row"))
        .collect()
}

#[test]
fn shopping_headers_are_canonicalized() {
    let (store, _) = ingest_fixture(SHOPPING);
    assert_eq!(
        store.column_names(TABLE).unwrap(),
        vec![
            "customer_id",
            "item_purchased",
            "category",
            "purchase_amount_usd",
            "location",
            "season",
            "review_rating",
            "purchase_date",
        ]
    );
}

#[test]
fn seasons_become_mid_season_dates() {
    let (store, _) = ingest_fixture(SHOPPING);
    let dates = column_text(&store, "purchase_date");
    assert_eq!(dates[0].as_deref(), Some("2024-12-15"));
    assert_eq!(dates[1].as_deref(), Some("2024-03-15"));
    assert_eq!(dates[2].as_deref(), Some("2024-06-15"));
    assert_eq!(dates[4].as_deref(), Some("2024-09-15"));
    assert_eq!(dates[6].as_deref(), Some("2024-09-15"));
    assert_eq!(dates[7], None);
}

#[test]
fn amounts_and_ratings_are_numeric() {
    let (_, report) = ingest_fixture(SHOPPING);
    let amount = report
        .columns
        .iter()
        .find(|c| c.name == "purchase_amount_usd")
        .expect("amount column");
    assert_eq!(amount.storage, StorageType::Real);
    assert_eq!(amount.missing, 1);
    let rating = report
        .columns
        .iter()
        .find(|c| c.name == "review_rating")
        .expect("rating column");
    assert_eq!(rating.storage, StorageType::Real);
    assert_eq!(rating.missing, 1);
    let customer = report
        .columns
        .iter()
        .find(|c| c.name == "customer_id")
        .expect("customer column");
    assert_eq!(customer.storage, StorageType::Integer);
}

#[test]
fn airbnb_text_roles_are_cleaned() {
    let (store, _) = ingest_fixture(AIRBNB);
    let options = queries::filter_options(
        store.connection(),
        TABLE,
        &store.descriptor(&ShapeRegistry::builtin(), TABLE).unwrap(),
    )
    .unwrap();
    assert_eq!(options.regions, vec!["Bronx", "Brooklyn", "Manhattan", "Queens"]);
    assert_eq!(
        options.products,
        vec!["Entire Home/Apt", "Private Room", "Shared Room"]
    );
}

#[test]
fn far_future_review_dates_are_dropped() {
    let (store, report) = ingest_fixture(AIRBNB);
    let dates = column_text(&store, "last_review");
    assert_eq!(dates[0].as_deref(), Some("2021-10-19"));
    assert_eq!(dates[4], None);
    let last_review = report
        .columns
        .iter()
        .find(|c| c.name == "last_review")
        .expect("date column");
    assert_eq!(last_review.coerced_to_missing, 1);
}

#[test]
fn reingesting_replaces_the_table() {
    let workspace = TestWorkspace::new();
    let db = workspace.path().join("db").join("app.sqlite");
    let registry = ShapeRegistry::builtin();
    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let mut store = Store::open(&db).expect("open store");
        ingest::ingest_file(&mut store, &registry, &fixture_path(SHOPPING), TABLE, &options())
            .expect("ingest");
        snapshots.push((
            store.row_count(TABLE).unwrap(),
            store.column_names(TABLE).unwrap(),
        ));
    }
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[0].0, 9);
}

#[test]
fn new_upload_overwrites_previous_dataset() {
    let workspace = TestWorkspace::new();
    let db = workspace.path().join("app.sqlite");
    let registry = ShapeRegistry::builtin();
    let mut store = Store::open(&db).expect("open store");
    ingest::ingest_file(&mut store, &registry, &fixture_path(SHOPPING), TABLE, &options())
        .expect("ingest shopping");
    ingest::ingest_file(&mut store, &registry, &fixture_path(AIRBNB), TABLE, &options())
        .expect("ingest airbnb");
    assert_eq!(store.row_count(TABLE).unwrap(), 6);
    assert_eq!(store.descriptor(&registry, TABLE).unwrap().name, "airbnb");
    assert!(!store.table_exists("fact__staging").unwrap());
}

#[test]
fn corrupt_store_file_is_recreated() {
    let workspace = TestWorkspace::new();
    let garbage = "this file is not a sqlite database\n".repeat(200);
    let db = workspace.write("app.sqlite", &garbage);
    let mut store = Store::open(&db).expect("store recovers");
    ingest::ingest_file(
        &mut store,
        &ShapeRegistry::builtin(),
        &fixture_path(SHOPPING),
        TABLE,
        &options(),
    )
    .expect("ingest after recovery");
    assert_eq!(store.row_count(TABLE).unwrap(), 9);
    assert!(fs::metadata(&db).unwrap().len() > 0);
}

#[test]
fn last_colliding_header_wins() {
    let csv = "Location,Item Purchased,Price (USD),price usd\nTexas,Blouse,1,2\n";
    let parsed = read_upload_from_reader(csv.as_bytes(), &options()).expect("parse");
    assert_eq!(parsed.collisions.len(), 1);
    assert_eq!(parsed.collisions[0].canonical, "price_usd");
    assert_eq!(parsed.collisions[0].kept, "price usd");
    let mut store = Store::open_in_memory().unwrap();
    ingest::store_upload(&mut store, &ShapeRegistry::builtin(), parsed, TABLE, options().today)
        .expect("store");
    let values: Vec<i64> = store
        .connection()
        .prepare("SELECT price_usd FROM fact")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(|v| v.unwrap())
        .collect();
    assert_eq!(values, vec![2]);
}

#[test]
fn missing_file_is_an_open_error() {
    let workspace = TestWorkspace::new();
    let mut store = Store::open_in_memory().unwrap();
    let err = ingest::ingest_file(
        &mut store,
        &ShapeRegistry::builtin(),
        &workspace.path().join("absent.csv"),
        TABLE,
        &options(),
    )
    .unwrap_err();
    assert!(matches!(err, IngestError::Open { .. }));
    assert!(!store.table_exists(TABLE).unwrap());
}

#[test]
fn invalid_utf8_is_a_decode_error() {
    let bytes: &[u8] = b"location,item_purchased\nTex\xffas,Blouse\n";
    let err = read_upload_from_reader(bytes, &options()).unwrap_err();
    assert!(matches!(err, IngestError::Decode { row: 2, .. }));
}

#[test]
fn header_only_upload_stores_zero_rows() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("empty.csv", "Location,Item Purchased,Purchase Amount (USD)\n");
    let mut store = Store::open_in_memory().unwrap();
    let report = ingest::ingest_file(&mut store, &ShapeRegistry::builtin(), &path, TABLE, &options())
        .expect("ingest");
    assert_eq!(report.rows, 0);
    assert_eq!(report.descriptor.name, "shopping");
    assert_eq!(store.row_count(TABLE).unwrap(), 0);
}

proptest! {
    #[test]
    fn canonical_headers_are_stable(header in "[A-Za-z0-9 ()$%-]{0,24}") {
        let once = canonicalize_header(&header);
        prop_assert_eq!(canonicalize_header(&once), once.clone());
        prop_assert!(!once.contains(' '));
        prop_assert!(!once.chars().any(|c| c.is_ascii_uppercase()));
    }
}
