//! Column-oriented in-memory table produced by ingestion and written to the store.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use rusqlite::types::Value as SqlValue;

use crate::data::{self, Cell, StorageType};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// `None` until a coercion or type inference settles the column.
    pub storage: Option<StorageType>,
    pub cells: Vec<Cell>,
}

impl Column {
    pub fn from_raw(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            storage: None,
            cells: values.iter().map(|v| Cell::from_raw(v)).collect(),
        }
    }

    pub fn storage_type(&self) -> StorageType {
        self.storage.unwrap_or(StorageType::Text)
    }

    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_missing()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable {
    columns: Vec<Column>,
    row_count: usize,
    /// Cells that held text before a coercion and ended up missing.
    coercion_losses: BTreeMap<String, usize>,
}

impl NormalizedTable {
    pub fn new(row_count: usize) -> Self {
        Self {
            columns: Vec::new(),
            row_count,
            coercion_losses: BTreeMap::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> BTreeSet<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn coercion_losses(&self) -> &BTreeMap<String, usize> {
        &self.coercion_losses
    }

    /// Adds a column, replacing any existing column with the same name in place.
    /// Returns `true` when a column was replaced.
    pub fn insert_column(&mut self, column: Column) -> bool {
        debug_assert_eq!(column.cells.len(), self.row_count);
        if let Some(existing) = self.columns.iter_mut().find(|c| c.name == column.name) {
            *existing = column;
            true
        } else {
            self.columns.push(column);
            false
        }
    }

    /// Retypes an untyped text column cell by cell. Missing cells stay missing;
    /// text the parser rejects becomes missing and is counted as a loss.
    pub fn coerce_column<F>(&mut self, name: &str, storage: StorageType, parse: F) -> bool
    where
        F: Fn(&str) -> Option<Cell>,
    {
        let Some(column) = self.columns.iter_mut().find(|c| c.name == name) else {
            return false;
        };
        if column.storage.is_some() {
            debug!("Column '{name}' already typed as {}", column.storage_type());
            return false;
        }
        let mut lost = 0usize;
        for cell in column.cells.iter_mut() {
            let replacement = match cell.as_text() {
                Some(raw) => parse(raw).unwrap_or_else(|| {
                    lost += 1;
                    Cell::Missing
                }),
                None => continue,
            };
            *cell = replacement;
        }
        column.storage = Some(storage);
        if lost > 0 {
            *self.coercion_losses.entry(name.to_string()).or_insert(0) += lost;
        }
        true
    }

    /// Builds a new typed column from an existing text column.
    pub fn derive_column<F>(&mut self, target: &str, source: &str, storage: StorageType, map: F) -> bool
    where
        F: Fn(&str) -> Option<Cell>,
    {
        let Some(source_column) = self.column(source) else {
            return false;
        };
        let cells = source_column
            .cells
            .iter()
            .map(|cell| cell.as_text().and_then(|raw| map(raw)).unwrap_or(Cell::Missing))
            .collect();
        self.insert_column(Column {
            name: target.to_string(),
            storage: Some(storage),
            cells,
        });
        true
    }

    /// Settles every still-untyped column by inspecting its values.
    pub fn infer_remaining_types(&mut self) {
        for column in self.columns.iter_mut().filter(|c| c.storage.is_none()) {
            let ty = data::infer_storage_type(column.cells.iter().filter_map(Cell::as_text));
            if ty != StorageType::Text {
                for cell in column.cells.iter_mut() {
                    if let Some(raw) = cell.as_text() {
                        *cell = data::parse_inferred(raw, ty);
                    }
                }
            }
            debug!("Inferred column '{}' as {ty}", column.name);
            column.storage = Some(ty);
        }
    }

    pub fn row_values(&self, row: usize) -> Vec<SqlValue> {
        self.columns
            .iter()
            .map(|column| {
                column
                    .cells
                    .get(row)
                    .map(Cell::to_sql)
                    .unwrap_or(SqlValue::Null)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NormalizedTable {
        let mut table = NormalizedTable::new(3);
        table.insert_column(Column::from_raw(
            "price",
            vec!["$10".into(), "".into(), "oops".into()],
        ));
        table.insert_column(Column::from_raw(
            "beds",
            vec!["1".into(), "2".into(), "NA".into()],
        ));
        table
    }

    #[test]
    fn coerce_column_counts_only_rejected_text() {
        let mut table = sample();
        assert!(table.coerce_column("price", StorageType::Real, |raw| {
            data::parse_money(raw).map(Cell::Float)
        }));
        let price = table.column("price").unwrap();
        assert_eq!(
            price.cells,
            vec![Cell::Float(10.0), Cell::Missing, Cell::Missing]
        );
        assert_eq!(table.coercion_losses().get("price"), Some(&1));
    }

    #[test]
    fn coerce_column_leaves_typed_columns_alone() {
        let mut table = sample();
        table.infer_remaining_types();
        assert!(!table.coerce_column("beds", StorageType::Real, |_| None));
        assert_eq!(
            table.column("beds").unwrap().storage,
            Some(StorageType::Integer)
        );
    }

    #[test]
    fn insert_column_replaces_same_name() {
        let mut table = sample();
        let replaced = table.insert_column(Column::from_raw(
            "price",
            vec!["a".into(), "b".into(), "c".into()],
        ));
        assert!(replaced);
        assert_eq!(table.columns().len(), 2);
        assert_eq!(table.columns()[0].cells[0], Cell::Text("a".into()));
    }
}
