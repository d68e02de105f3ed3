//! Parameterized predicates over the stored table.
//!
//! Clause text only ever contains quoted role identifiers taken from a
//! [`DatasetDescriptor`] and `?` placeholders; user-supplied values travel
//! separately in [`Predicate::params`].

use chrono::NaiveDate;
use itertools::Itertools;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use crate::{data::format_date, shape::DatasetDescriptor, store::quote_ident};

/// Inclusive date range. Construction orders the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(first: NaiveDate, second: NaiveDate) -> Self {
        if first <= second {
            Self {
                start: first,
                end: second,
            }
        } else {
            Self {
                start: second,
                end: first,
            }
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// `" WHERE a AND b"`, or an empty string when there are no clauses.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.iter().join(" AND "))
        }
    }

    /// Copy of this predicate that also requires `column` to be non-null.
    pub fn and_not_null(&self, column: &str) -> Predicate {
        let mut widened = self.clone();
        widened
            .clauses
            .push(format!("{} IS NOT NULL", quote_ident(column)));
        widened
    }

    fn push_range(&mut self, column: &str, range: &DateRange) {
        self.clauses
            .push(format!("{} BETWEEN ? AND ?", quote_ident(column)));
        self.params.push(SqlValue::Text(format_date(range.start())));
        self.params.push(SqlValue::Text(format_date(range.end())));
    }

    fn push_membership(&mut self, column: &str, values: &[String]) {
        let placeholders = std::iter::repeat_n("?", values.len()).join(", ");
        self.clauses
            .push(format!("{} IN ({placeholders})", quote_ident(column)));
        self.params
            .extend(values.iter().map(|v| SqlValue::Text(v.clone())));
    }
}

/// Builds the conjunction of the filters the descriptor can honour. A filter on
/// a role the dataset lacks, or an empty selection, contributes no clause.
pub fn build_predicate(
    descriptor: &DatasetDescriptor,
    date_range: Option<&DateRange>,
    regions: &[String],
    products: &[String],
) -> Predicate {
    let mut predicate = Predicate::default();
    if let (Some(column), Some(range)) = (descriptor.date_col.as_deref(), date_range) {
        predicate.push_range(column, range);
    }
    if let Some(column) = descriptor.region_col.as_deref()
        && !regions.is_empty()
    {
        predicate.push_membership(column, regions);
    }
    if let Some(column) = descriptor.product_col.as_deref()
        && !products.is_empty()
    {
        predicate.push_membership(column, products);
    }
    predicate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Aggregate;

    fn descriptor() -> DatasetDescriptor {
        DatasetDescriptor {
            name: "shopping".into(),
            date_col: Some("purchase_date".into()),
            region_col: Some("location".into()),
            product_col: None,
            amount_col: Some("purchase_amount_usd".into()),
            rating_col: None,
            monthly_aggregate: Aggregate::Sum,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn no_selection_yields_empty_predicate() {
        let predicate = build_predicate(&descriptor(), None, &[], &[]);
        assert!(predicate.is_empty());
        assert_eq!(predicate.where_sql(), "");
        assert!(predicate.params().is_empty());
    }

    #[test]
    fn values_are_bound_not_interpolated() {
        let regions = vec!["O'Hare".to_string(), "Texas".to_string()];
        let range = DateRange::new(date(2024, 1, 1), date(2024, 6, 30));
        let predicate = build_predicate(&descriptor(), Some(&range), &regions, &[]);
        assert_eq!(
            predicate.where_sql(),
            " WHERE \"purchase_date\" BETWEEN ? AND ? AND \"location\" IN (?, ?)"
        );
        assert_eq!(
            predicate.params(),
            &[
                SqlValue::Text("2024-01-01".into()),
                SqlValue::Text("2024-06-30".into()),
                SqlValue::Text("O'Hare".into()),
                SqlValue::Text("Texas".into()),
            ]
        );
    }

    #[test]
    fn missing_role_omits_clause() {
        let products = vec!["Blouse".to_string()];
        let predicate = build_predicate(&descriptor(), None, &[], &products);
        assert!(predicate.is_empty());
    }

    #[test]
    fn reversed_range_is_reordered() {
        let range = DateRange::new(date(2024, 12, 1), date(2024, 1, 1));
        assert_eq!(range.start(), date(2024, 1, 1));
        assert_eq!(range.end(), date(2024, 12, 1));
    }

    #[test]
    fn and_not_null_keeps_params() {
        let regions = vec!["Texas".to_string()];
        let predicate = build_predicate(&descriptor(), None, &regions, &[]);
        let widened = predicate.and_not_null("purchase_amount_usd");
        assert_eq!(widened.clauses().len(), 2);
        assert_eq!(widened.params().len(), 1);
        assert_eq!(predicate.clauses().len(), 1);
    }
}
