mod common;

use common::{AIRBNB, SHOPPING, TABLE, ingest_fixture};
use dataset_analytics::{
    filter::{Predicate, build_predicate},
    frame::{Column, NormalizedTable},
    report::{self, HISTOGRAM_BINS},
    shape::ShapeRegistry,
    store::Store,
};

#[test]
fn dashboard_report_gathers_every_aggregate() {
    let (store, ingested) = ingest_fixture(AIRBNB);
    let dashboard = report::build_report(
        &store,
        TABLE,
        &ingested.descriptor,
        &Predicate::default(),
        2,
        3,
    )
    .expect("build report");
    assert_eq!(dashboard.summary.rows, 6);
    assert_eq!(dashboard.summary.average_rating, Some(4.0));
    assert_eq!(dashboard.top_regions.as_ref().map(Vec::len), Some(2));
    assert_eq!(dashboard.preview.rows.len(), 3);
    let bins = dashboard.rating_histogram.expect("ratings present");
    assert_eq!(bins.len(), HISTOGRAM_BINS);
    assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 5);
}

#[test]
fn text_rendering_marks_monthly_extremes() {
    let (store, ingested) = ingest_fixture(SHOPPING);
    let dashboard = report::build_report(
        &store,
        TABLE,
        &ingested.descriptor,
        &Predicate::default(),
        10,
        5,
    )
    .unwrap();
    let text = report::render_text(&dashboard);
    let june = text
        .lines()
        .find(|line| line.starts_with("Jun 2024"))
        .expect("june row");
    assert!(june.contains("1 120.00"));
    assert!(june.contains("max"));
    let december = text
        .lines()
        .find(|line| line.starts_with("Dec 2024"))
        .expect("december row");
    assert!(december.ends_with("last"));
    let september = text
        .lines()
        .find(|line| line.starts_with("Sep 2024"))
        .expect("september row");
    assert!(september.ends_with("min"));
}

#[test]
fn missing_amount_role_renders_not_available() {
    let mut table = NormalizedTable::new(2);
    table.insert_column(Column::from_raw(
        "location",
        vec!["Texas".to_string(), "Ohio".to_string()],
    ));
    table.insert_column(Column::from_raw(
        "item_purchased",
        vec!["Blouse".to_string(), "Coat".to_string()],
    ));
    table.infer_remaining_types();
    let mut store = Store::open_in_memory().unwrap();
    store.replace_table(TABLE, &table).unwrap();
    let descriptor = store.descriptor(&ShapeRegistry::builtin(), TABLE).unwrap();
    assert_eq!(descriptor.name, "shopping");
    assert_eq!(descriptor.amount_col, None);

    let dashboard = report::build_report(
        &store,
        TABLE,
        &descriptor,
        &Predicate::default(),
        10,
        10,
    )
    .unwrap();
    assert_eq!(dashboard.summary.rows, 2);
    assert_eq!(dashboard.summary.total, None);
    assert_eq!(dashboard.monthly, None);
    let text = report::render_text(&dashboard);
    assert!(text.contains("N/A"));
    assert!(text.contains("unavailable (needs a date and an amount column)"));
    assert!(text.contains("unavailable (no rating column)"));
    let ranked = text
        .lines()
        .find(|line| line.starts_with("Ohio"))
        .expect("ohio ranking row");
    assert_eq!(ranked.split_whitespace().nth(1), Some("1"));
    assert!(!text.contains("1.00"));
}

#[test]
fn empty_selection_renders_placeholders() {
    let (store, ingested) = ingest_fixture(SHOPPING);
    let predicate = build_predicate(
        &ingested.descriptor,
        None,
        &["Atlantis".to_string()],
        &[],
    );
    let dashboard =
        report::build_report(&store, TABLE, &ingested.descriptor, &predicate, 10, 10).unwrap();
    let text = report::render_text(&dashboard);
    assert!(text.contains("no rows match the current filters"));
    assert!(text.contains("no ratings match the current filters"));
    assert!(text.contains("Preview (0 row(s))"));
}
