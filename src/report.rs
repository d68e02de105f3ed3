//! Dashboard assembly and terminal rendering.
//!
//! [`build_report`] runs every aggregate under one predicate; the render
//! functions turn the result into KPI cards, ranked bars, a monthly table and
//! a rating histogram.

use std::fmt::Write as _;

use serde::Serialize;

use crate::{
    filter::Predicate,
    queries::{self, MonthlyPoint, PreviewTable, RankedGroup, Summary},
    shape::DatasetDescriptor,
    store::{Store, StoreError},
    table::{Align, TextTable},
};

pub const HISTOGRAM_BINS: usize = 20;
const BAR_WIDTH: usize = 30;
const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub dataset: DatasetDescriptor,
    pub summary: Summary,
    pub monthly: Option<Vec<MonthlyPoint>>,
    pub top_regions: Option<Vec<RankedGroup>>,
    pub top_products: Option<Vec<RankedGroup>>,
    pub rating_histogram: Option<Vec<HistogramBin>>,
    pub preview: PreviewTable,
}

pub fn build_report(
    store: &Store,
    table: &str,
    descriptor: &DatasetDescriptor,
    predicate: &Predicate,
    top_n: usize,
    preview_rows: usize,
) -> Result<DashboardReport, StoreError> {
    let conn = store.connection();
    let ratings = queries::rating_distribution(conn, table, descriptor, predicate)?;
    Ok(DashboardReport {
        dataset: descriptor.clone(),
        summary: queries::summary(conn, table, descriptor, predicate)?,
        monthly: queries::monthly_series(conn, table, descriptor, predicate)?,
        top_regions: queries::top_regions(conn, table, descriptor, predicate, top_n)?,
        top_products: queries::top_products(conn, table, descriptor, predicate, top_n)?,
        rating_histogram: ratings.map(|values| histogram(&values, HISTOGRAM_BINS)),
        preview: queries::preview(conn, table, predicate, preview_rows)?,
    })
}

/// Equal-width bins spanning the observed range. A single distinct value
/// yields one bin.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: values.len(),
        }];
    }
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for value in values {
        let idx = (((value - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(idx, count)| HistogramBin {
            lower: min + width * idx as f64,
            upper: min + width * (idx + 1) as f64,
            count,
        })
        .collect()
}

/// Groups digits in threes separated by spaces.
fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    grouped
}

pub fn format_count(value: u64) -> String {
    group_thousands(&value.to_string())
}

pub fn format_money(value: Option<f64>) -> String {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return NOT_AVAILABLE.to_string();
    };
    let fixed = format!("{:.2}", value.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{}.{fraction}", group_thousands(whole))
}

fn format_group_count(value: Option<f64>) -> String {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| format_count(v.round() as u64))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn format_rating(value: Option<f64>) -> String {
    value
        .filter(|v| v.is_finite())
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn bar(value: f64, max: f64) -> String {
    if max <= 0.0 || !value.is_finite() {
        return String::new();
    }
    let filled = ((value / max) * BAR_WIDTH as f64).round() as usize;
    "#".repeat(filled.min(BAR_WIDTH))
}

pub fn render_text(report: &DashboardReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Dataset: {}", report.dataset.name);
    let _ = writeln!(out);

    let _ = writeln!(out, "KPIs");
    let mut kpis = TextTable::new(["rows", "total", "average", "average rating"])
        .align(0, Align::Right)
        .align(1, Align::Right)
        .align(2, Align::Right)
        .align(3, Align::Right);
    kpis.push_row(vec![
        format_count(report.summary.rows),
        format_money(report.summary.total),
        format_money(report.summary.average),
        format_rating(report.summary.average_rating),
    ]);
    out.push_str(&kpis.render());
    let _ = writeln!(out);

    let monthly_title = format!(
        "Monthly {} of {}",
        report.dataset.monthly_aggregate,
        report.dataset.amount_col.as_deref().unwrap_or("amount")
    );
    render_monthly(&mut out, &monthly_title, report.monthly.as_deref());
    // without an amount role the rankings hold row counts
    let format_value: fn(Option<f64>) -> String = if report.dataset.amount_col.is_some() {
        format_money
    } else {
        format_group_count
    };
    render_ranking(
        &mut out,
        "Top regions",
        report.top_regions.as_deref(),
        "no region column",
        format_value,
    );
    render_ranking(
        &mut out,
        "Top products",
        report.top_products.as_deref(),
        "no product column",
        format_value,
    );
    render_histogram(&mut out, report.rating_histogram.as_deref());
    render_preview(&mut out, &report.preview);
    out
}

fn render_monthly(out: &mut String, title: &str, points: Option<&[MonthlyPoint]>) {
    let _ = writeln!(out, "{title}");
    match points {
        None => {
            let _ = writeln!(out, "  unavailable (needs a date and an amount column)");
        }
        Some([]) => {
            let _ = writeln!(out, "  no rows match the current filters");
        }
        Some(points) => {
            let max = points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);
            let min = points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
            let last = points.len() - 1;
            let mut table = TextTable::new(["month", "value", "", "note"]).align(1, Align::Right);
            for (idx, point) in points.iter().enumerate() {
                let mut notes = Vec::new();
                if point.value == max {
                    notes.push("max");
                }
                if point.value == min {
                    notes.push("min");
                }
                if idx == last {
                    notes.push("last");
                }
                table.push_row(vec![
                    point.month.format("%b %Y").to_string(),
                    format_money(Some(point.value)),
                    bar(point.value, max),
                    notes.join(", "),
                ]);
            }
            out.push_str(&table.render());
        }
    }
    let _ = writeln!(out);
}

fn render_ranking(
    out: &mut String,
    title: &str,
    groups: Option<&[RankedGroup]>,
    missing: &str,
    format_value: fn(Option<f64>) -> String,
) {
    let _ = writeln!(out, "{title}");
    match groups {
        None => {
            let _ = writeln!(out, "  unavailable ({missing})");
        }
        Some([]) => {
            let _ = writeln!(out, "  no rows match the current filters");
        }
        Some(groups) => {
            let max = groups
                .iter()
                .filter_map(|g| g.value)
                .fold(0.0_f64, f64::max);
            let mut table = TextTable::new(["label", "value", ""]).align(1, Align::Right);
            for group in groups {
                table.push_row(vec![
                    group.label.clone().unwrap_or_else(|| "(missing)".to_string()),
                    format_value(group.value),
                    group.value.map(|v| bar(v, max)).unwrap_or_default(),
                ]);
            }
            out.push_str(&table.render());
        }
    }
    let _ = writeln!(out);
}

fn render_histogram(out: &mut String, bins: Option<&[HistogramBin]>) {
    let _ = writeln!(out, "Rating distribution");
    match bins {
        None => {
            let _ = writeln!(out, "  unavailable (no rating column)");
        }
        Some([]) => {
            let _ = writeln!(out, "  no ratings match the current filters");
        }
        Some(bins) => {
            let max = bins.iter().map(|b| b.count).max().unwrap_or(0) as f64;
            let mut table = TextTable::new(["range", "count", ""]).align(1, Align::Right);
            for bin in bins {
                table.push_row(vec![
                    format!("{:.2} - {:.2}", bin.lower, bin.upper),
                    bin.count.to_string(),
                    bar(bin.count as f64, max),
                ]);
            }
            out.push_str(&table.render());
        }
    }
    let _ = writeln!(out);
}

pub fn render_preview(out: &mut String, preview: &PreviewTable) {
    let _ = writeln!(out, "Preview ({} row(s))", preview.rows.len());
    let mut table = TextTable::new(preview.headers.iter().cloned());
    for row in &preview.rows {
        table.push_row(row.iter().map(|cell| cell.clone().unwrap_or_default()).collect());
    }
    out.push_str(&table.render());
}
