//! Read-only aggregates over the stored table.
//!
//! Each aggregate returns `None` ("unavailable") when the descriptor lacks the
//! role it needs; an error only ever means SQLite itself failed.

use chrono::NaiveDate;
use rusqlite::{Connection, params_from_iter, types::Value as SqlValue};
use serde::Serialize;

use crate::{
    data::display_sql_value,
    filter::Predicate,
    shape::DatasetDescriptor,
    store::{StoreError, quote_ident},
};

pub const DEFAULT_PREVIEW_ROWS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub rows: u64,
    pub total: Option<f64>,
    pub average: Option<f64>,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPoint {
    pub month: NaiveDate,
    pub value: f64,
}

/// One group of a top-N ranking. `label` is `None` for the missing-value group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGroup {
    pub label: Option<String>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub regions: Vec<String>,
    pub products: Vec<String>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreviewTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

pub fn summary(
    conn: &Connection,
    table: &str,
    descriptor: &DatasetDescriptor,
    predicate: &Predicate,
) -> Result<Summary, StoreError> {
    let mut select = vec!["COUNT(*)".to_string()];
    if let Some(amount) = descriptor.amount_col.as_deref() {
        let amount = quote_ident(amount);
        select.push(format!("SUM({amount})"));
        select.push(format!("AVG({amount})"));
    }
    if let Some(rating) = descriptor.rating_col.as_deref() {
        select.push(format!("AVG({})", quote_ident(rating)));
    }
    let sql = format!(
        "SELECT {} FROM {}{}",
        select.join(", "),
        quote_ident(table),
        predicate.where_sql()
    );
    let has_amount = descriptor.amount_col.is_some();
    let has_rating = descriptor.rating_col.is_some();
    let summary = conn.query_row(&sql, params_from_iter(predicate.params()), |row| {
        let rows: i64 = row.get(0)?;
        let (total, average) = if has_amount {
            (row.get::<_, Option<f64>>(1)?, row.get::<_, Option<f64>>(2)?)
        } else {
            (None, None)
        };
        let average_rating = if has_rating {
            row.get::<_, Option<f64>>(if has_amount { 3 } else { 1 })?
        } else {
            None
        };
        Ok(Summary {
            rows: rows as u64,
            total,
            average,
            average_rating,
        })
    })?;
    Ok(summary)
}

/// Amount per calendar month, using the shape's own aggregate. Rows with a
/// missing amount or date are left out.
pub fn monthly_series(
    conn: &Connection,
    table: &str,
    descriptor: &DatasetDescriptor,
    predicate: &Predicate,
) -> Result<Option<Vec<MonthlyPoint>>, StoreError> {
    let (Some(date), Some(amount)) = (
        descriptor.date_col.as_deref(),
        descriptor.amount_col.as_deref(),
    ) else {
        return Ok(None);
    };
    let scoped = predicate.and_not_null(amount).and_not_null(date);
    let sql = format!(
        "SELECT strftime('%Y-%m-01', {date}) AS month, {agg}({amount}) AS value \
         FROM {table}{where_sql} GROUP BY month ORDER BY month",
        date = quote_ident(date),
        agg = descriptor.monthly_aggregate.sql_function(),
        amount = quote_ident(amount),
        table = quote_ident(table),
        where_sql = scoped.where_sql(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(scoped.params()), |row| {
        Ok((row.get::<_, Option<String>>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut points = Vec::new();
    for row in rows {
        let (month, value) = row?;
        // strftime yields NULL for text that is not a date
        let Some(month) = month else { continue };
        let month = NaiveDate::parse_from_str(&month, "%Y-%m-%d")
            .map_err(|err| StoreError::InvalidData(format!("month bucket '{month}': {err}")))?;
        points.push(MonthlyPoint { month, value });
    }
    Ok(Some(points))
}

pub fn top_regions(
    conn: &Connection,
    table: &str,
    descriptor: &DatasetDescriptor,
    predicate: &Predicate,
    top_n: usize,
) -> Result<Option<Vec<RankedGroup>>, StoreError> {
    match descriptor.region_col.as_deref() {
        Some(region) => top_by(conn, table, region, descriptor, predicate, top_n).map(Some),
        None => Ok(None),
    }
}

pub fn top_products(
    conn: &Connection,
    table: &str,
    descriptor: &DatasetDescriptor,
    predicate: &Predicate,
    top_n: usize,
) -> Result<Option<Vec<RankedGroup>>, StoreError> {
    match descriptor.product_col.as_deref() {
        Some(product) => top_by(conn, table, product, descriptor, predicate, top_n).map(Some),
        None => Ok(None),
    }
}

/// Ranks groups by summed amount, or by row count when there is no amount
/// role. Ties are broken by the group key ascending.
fn top_by(
    conn: &Connection,
    table: &str,
    group: &str,
    descriptor: &DatasetDescriptor,
    predicate: &Predicate,
    top_n: usize,
) -> Result<Vec<RankedGroup>, StoreError> {
    let metric = match descriptor.amount_col.as_deref() {
        Some(amount) => format!("SUM({})", quote_ident(amount)),
        None => "COUNT(*)".to_string(),
    };
    let sql = format!(
        "SELECT {group} AS label, {metric} AS value FROM {table}{where_sql} \
         GROUP BY {group} ORDER BY value DESC, label ASC LIMIT ?",
        group = quote_ident(group),
        table = quote_ident(table),
        where_sql = predicate.where_sql(),
    );
    let mut params: Vec<SqlValue> = predicate.params().to_vec();
    params.push(SqlValue::Integer(i64::try_from(top_n).unwrap_or(i64::MAX)));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| {
        Ok(RankedGroup {
            label: display_sql_value(&row.get::<_, SqlValue>(0)?),
            value: row.get::<_, Option<f64>>(1)?,
        })
    })?;
    let mut groups = Vec::new();
    for row in rows {
        groups.push(row?);
    }
    Ok(groups)
}

/// Raw non-null ratings; binning is left to the presentation layer.
pub fn rating_distribution(
    conn: &Connection,
    table: &str,
    descriptor: &DatasetDescriptor,
    predicate: &Predicate,
) -> Result<Option<Vec<f64>>, StoreError> {
    let Some(rating) = descriptor.rating_col.as_deref() else {
        return Ok(None);
    };
    let scoped = predicate.and_not_null(rating);
    let sql = format!(
        "SELECT {} FROM {}{}",
        quote_ident(rating),
        quote_ident(table),
        scoped.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(scoped.params()), |row| row.get::<_, f64>(0))?;
    let mut ratings = Vec::new();
    for row in rows {
        ratings.push(row?);
    }
    Ok(Some(ratings))
}

/// Distinct role values and the date bounds over the whole table, for
/// populating filter controls.
pub fn filter_options(
    conn: &Connection,
    table: &str,
    descriptor: &DatasetDescriptor,
) -> Result<FilterOptions, StoreError> {
    let mut options = FilterOptions::default();
    if let Some(region) = descriptor.region_col.as_deref() {
        options.regions = distinct_values(conn, table, region)?;
    }
    if let Some(product) = descriptor.product_col.as_deref() {
        options.products = distinct_values(conn, table, product)?;
    }
    if let Some(date) = descriptor.date_col.as_deref() {
        let column = quote_ident(date);
        let (first, last): (Option<String>, Option<String>) = conn.query_row(
            &format!("SELECT MIN({column}), MAX({column}) FROM {}", quote_ident(table)),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        options.first_date = first.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
        options.last_date = last.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
    }
    Ok(options)
}

fn distinct_values(conn: &Connection, table: &str, column: &str) -> Result<Vec<String>, StoreError> {
    let column = quote_ident(column);
    let sql = format!(
        "SELECT DISTINCT CAST({column} AS TEXT) AS value FROM {} \
         WHERE {column} IS NOT NULL ORDER BY value",
        quote_ident(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

/// First `limit` rows matching the predicate, every column rendered as text.
pub fn preview(
    conn: &Connection,
    table: &str,
    predicate: &Predicate,
    limit: usize,
) -> Result<PreviewTable, StoreError> {
    let sql = format!(
        "SELECT * FROM {}{} LIMIT ?",
        quote_ident(table),
        predicate.where_sql()
    );
    let mut params: Vec<SqlValue> = predicate.params().to_vec();
    params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    let mut stmt = conn.prepare(&sql)?;
    let headers: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = headers.len();
    let rows = stmt.query_map(params_from_iter(params), |row| {
        (0..width)
            .map(|idx| row.get::<_, SqlValue>(idx).map(|v| display_sql_value(&v)))
            .collect::<rusqlite::Result<Vec<_>>>()
    })?;
    let mut preview = PreviewTable {
        headers,
        rows: Vec::new(),
    };
    for row in rows {
        preview.rows.push(row?);
    }
    Ok(preview)
}
