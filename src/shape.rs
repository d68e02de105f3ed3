//! Dataset shape registry and detection.
//!
//! A [`ShapeDefinition`] pairs a matcher over the canonical column names with
//! a role-mapping function. The [`ShapeRegistry`] evaluates definitions in
//! registration order and turns the first match into a [`DatasetDescriptor`].
//! Nothing outside this module branches on a shape's name: the per-shape
//! behaviour (monthly aggregate, preparation hook) travels with the definition.

use std::{collections::BTreeSet, fmt};

use serde::Serialize;

use crate::{
    data::{self, Cell, StorageType},
    frame::NormalizedTable,
};

pub const UNKNOWN_SHAPE: &str = "unknown";

/// Aggregate applied to the amount role when bucketing by month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Sum,
    Avg,
}

impl Aggregate {
    pub fn sql_function(self) -> &'static str {
        match self {
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Sum => f.write_str("sum"),
            Aggregate::Avg => f.write_str("avg"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleColumns {
    pub date: Option<String>,
    pub region: Option<String>,
    pub product: Option<String>,
    pub amount: Option<String>,
    pub rating: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub date_col: Option<String>,
    pub region_col: Option<String>,
    pub product_col: Option<String>,
    pub amount_col: Option<String>,
    pub rating_col: Option<String>,
    pub monthly_aggregate: Aggregate,
}

impl DatasetDescriptor {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_SHAPE.to_string(),
            date_col: None,
            region_col: None,
            product_col: None,
            amount_col: None,
            rating_col: None,
            monthly_aggregate: Aggregate::Sum,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_SHAPE
    }

    /// Role columns that hold free text and receive text normalization.
    pub fn text_roles(&self) -> impl Iterator<Item = &str> {
        [self.region_col.as_deref(), self.product_col.as_deref()]
            .into_iter()
            .flatten()
    }
}

pub type Matcher = fn(&BTreeSet<String>) -> bool;
pub type RoleMapper = fn(&BTreeSet<String>) -> RoleColumns;
pub type Preparer = fn(&mut NormalizedTable);

#[derive(Clone)]
pub struct ShapeDefinition {
    pub name: &'static str,
    pub matches: Matcher,
    pub roles: RoleMapper,
    pub monthly_aggregate: Aggregate,
    /// Shape-specific step run before the generic role coercions, e.g. to
    /// synthesize a date column.
    pub prepare: Option<Preparer>,
}

impl fmt::Debug for ShapeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeDefinition")
            .field("name", &self.name)
            .field("monthly_aggregate", &self.monthly_aggregate)
            .finish()
    }
}

impl ShapeDefinition {
    pub fn describe(&self, columns: &BTreeSet<String>) -> DatasetDescriptor {
        let roles = (self.roles)(columns);
        let present = |col: Option<String>| col.filter(|c| columns.contains(c));
        DatasetDescriptor {
            name: self.name.to_string(),
            date_col: present(roles.date),
            region_col: present(roles.region),
            product_col: present(roles.product),
            amount_col: present(roles.amount),
            rating_col: present(roles.rating),
            monthly_aggregate: self.monthly_aggregate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShapeRegistry {
    shapes: Vec<ShapeDefinition>,
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ShapeRegistry {
    pub fn empty() -> Self {
        Self { shapes: Vec::new() }
    }

    /// Shopping first, then Airbnb listings.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(shopping_shape());
        registry.register(airbnb_shape());
        registry
    }

    /// Appends a shape at the lowest priority.
    pub fn register(&mut self, shape: ShapeDefinition) {
        self.shapes.push(shape);
    }

    pub fn find(&self, name: &str) -> Option<&ShapeDefinition> {
        self.shapes.iter().find(|shape| shape.name == name)
    }

    pub fn detect(&self, columns: &BTreeSet<String>) -> DatasetDescriptor {
        self.shapes
            .iter()
            .find(|shape| (shape.matches)(columns))
            .map(|shape| shape.describe(columns))
            .unwrap_or_else(DatasetDescriptor::unknown)
    }
}

fn first_present(columns: &BTreeSet<String>, preferences: &[&str]) -> Option<String> {
    preferences
        .iter()
        .find(|name| columns.contains(**name))
        .map(|name| name.to_string())
}

fn if_present(columns: &BTreeSet<String>, name: &str) -> Option<String> {
    columns.contains(name).then(|| name.to_string())
}

pub const SHOPPING_DATE_COLUMN: &str = "purchase_date";

pub fn shopping_shape() -> ShapeDefinition {
    ShapeDefinition {
        name: "shopping",
        matches: |cols| cols.contains("location") && cols.contains("item_purchased"),
        roles: |cols| RoleColumns {
            date: if_present(cols, SHOPPING_DATE_COLUMN),
            region: Some("location".to_string()),
            product: Some("item_purchased".to_string()),
            amount: first_present(cols, &["purchase_amount_usd", "purchase_amount"]),
            rating: if_present(cols, "review_rating"),
        },
        monthly_aggregate: Aggregate::Sum,
        prepare: Some(synthesize_purchase_date),
    }
}

pub fn airbnb_shape() -> ShapeDefinition {
    ShapeDefinition {
        name: "airbnb",
        matches: |cols| cols.contains("price") && cols.contains("room_type"),
        roles: |cols| RoleColumns {
            date: if_present(cols, "last_review"),
            region: first_present(cols, &["neighbourhood_group", "neighbourhood"]),
            product: Some("room_type".to_string()),
            amount: Some("price".to_string()),
            rating: if_present(cols, "review_rate_number"),
        },
        monthly_aggregate: Aggregate::Avg,
        prepare: None,
    }
}

/// Shopping records carry a season, not a date; map it onto a synthetic date.
fn synthesize_purchase_date(table: &mut NormalizedTable) {
    if table.has_column(SHOPPING_DATE_COLUMN) {
        return;
    }
    table.derive_column(SHOPPING_DATE_COLUMN, "season", StorageType::Date, |raw| {
        data::season_to_date(raw).map(Cell::Date)
    });
}
