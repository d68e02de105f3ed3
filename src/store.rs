//! SQLite-backed store holding the single normalized table of a session.

use std::{
    fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use thiserror::Error;

use crate::{
    frame::NormalizedTable,
    shape::{DatasetDescriptor, ShapeRegistry},
};

const STAGING_SUFFIX: &str = "__staging";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to prepare store location {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Store {path:?} could not be opened even after recreating it: {source}")]
    Unrecoverable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Table '{0}' has no columns")]
    EmptyTable(String),
    #[error("Table '{0}' does not exist; ingest a CSV file first")]
    MissingTable(String),
    #[error("Invalid store data: {0}")]
    InvalidData(String),
}

/// Quotes an identifier for interpolation into SQL text. Only identifiers
/// derived from canonical column names or validated table names reach here.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens a file-backed store. A file SQLite refuses is deleted and
    /// recreated once. A file that cannot be deleted, or a second failure, is
    /// returned as [`StoreError::Unrecoverable`].
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = match Self::try_open(path) {
            Ok(conn) => conn,
            Err(err) => {
                warn!("Store {path:?} is unusable ({err}); recreating it");
                if let Err(removal) = remove_store_files(path) {
                    warn!("Could not remove store {path:?}: {removal}");
                    return Err(StoreError::Unrecoverable {
                        path: path.to_path_buf(),
                        source: err,
                    });
                }
                Self::try_open(path).map_err(|source| StoreError::Unrecoverable {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        };
        debug!("Opened store {path:?}");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// SQLite opens lazily, so a probe query is what surfaces a corrupt file.
    fn try_open(path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Replaces `name` with the contents of `table`. The new table is built
    /// under a staging name and renamed into place inside one transaction.
    pub fn replace_table(&mut self, name: &str, table: &NormalizedTable) -> Result<(), StoreError> {
        if table.columns().is_empty() {
            return Err(StoreError::EmptyTable(name.to_string()));
        }
        let target = quote_ident(name);
        let staging = quote_ident(&format!("{name}{STAGING_SUFFIX}"));
        let column_defs = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.storage_type().sql_declaration()))
            .join(", ");
        let placeholders = std::iter::repeat_n("?", table.columns().len()).join(", ");

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {staging}; CREATE TABLE {staging} ({column_defs});"
        ))?;
        {
            let mut insert = tx.prepare(&format!("INSERT INTO {staging} VALUES ({placeholders})"))?;
            for row in 0..table.row_count() {
                insert.execute(params_from_iter(table.row_values(row)))?;
            }
        }
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {target}; ALTER TABLE {staging} RENAME TO {target};"
        ))?;
        tx.commit()?;
        info!(
            "Stored {} row(s) across {} column(s) in table '{name}'",
            table.row_count(),
            table.columns().len()
        );
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn require_table(&self, name: &str) -> Result<(), StoreError> {
        if self.table_exists(name)? {
            Ok(())
        } else {
            Err(StoreError::MissingTable(name.to_string()))
        }
    }

    /// Column names in table order.
    pub fn column_names(&self, name: &str) -> Result<Vec<String>, StoreError> {
        self.require_table(name)?;
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    pub fn row_count(&self, name: &str) -> Result<u64, StoreError> {
        self.require_table(name)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Re-derives the descriptor from the stored column set.
    pub fn descriptor(
        &self,
        registry: &ShapeRegistry,
        name: &str,
    ) -> Result<DatasetDescriptor, StoreError> {
        let columns = self.column_names(name)?.into_iter().collect();
        Ok(registry.detect(&columns))
    }
}

fn remove_store_files(path: &Path) -> std::io::Result<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        candidates.push(PathBuf::from(sidecar));
    }
    for candidate in candidates.iter().filter(|p| p.exists()) {
        fs::remove_file(candidate)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Column;

    fn table(values: &[&str]) -> NormalizedTable {
        let mut table = NormalizedTable::new(values.len());
        table.insert_column(Column::from_raw(
            "name",
            values.iter().map(|v| v.to_string()).collect(),
        ));
        table.infer_remaining_types();
        table
    }

    #[test]
    fn replace_table_swaps_contents() {
        let mut store = Store::open_in_memory().unwrap();
        store.replace_table("fact", &table(&["a", "b", "c"])).unwrap();
        assert_eq!(store.row_count("fact").unwrap(), 3);
        store.replace_table("fact", &table(&["d"])).unwrap();
        assert_eq!(store.row_count("fact").unwrap(), 1);
        assert!(!store.table_exists("fact__staging").unwrap());
    }

    #[test]
    fn replace_table_rejects_zero_columns() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store
            .replace_table("fact", &NormalizedTable::new(0))
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyTable(_)));
    }

    #[test]
    fn missing_table_is_reported() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.row_count("fact"),
            Err(StoreError::MissingTable(_))
        ));
    }

    #[test]
    fn store_that_cannot_be_recreated_is_unrecoverable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let occupied = dir.path().join("app.sqlite");
        fs::create_dir(&occupied).expect("create directory in place of store");
        let err = Store::open(&occupied).err().expect("open must fail");
        assert!(
            matches!(err, StoreError::Unrecoverable { ref path, .. } if path == &occupied),
            "unexpected error {err:?}"
        );
        assert!(occupied.is_dir());
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
