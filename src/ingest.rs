//! Upload ingestion: parse, canonicalize headers, detect the shape, coerce role
//! columns and replace the stored table.
//!
//! Cell-level problems never fail an upload; they degrade to missing values and
//! are tallied in the [`IngestReport`]. Only an unreadable or undecodable file,
//! or one without a header row, is fatal.

use std::{
    collections::BTreeSet,
    io::Read,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::NaiveDate;
use encoding_rs::Encoding;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::{
    data::{self, Cell, StorageType},
    frame::{Column, NormalizedTable},
    io_utils,
    shape::{DatasetDescriptor, ShapeRegistry},
    store::{Store, StoreError},
};

static STRIP_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid punctuation pattern"));
static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s-]+").expect("valid separator pattern"));

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to open upload {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("Row {row} is not valid {encoding} text")]
    Decode { row: usize, encoding: &'static str },
    #[error("Upload has no header row")]
    MissingHeader,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    /// Reference date for discarding implausible future dates.
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderCollision {
    pub canonical: String,
    pub kept: String,
    pub dropped: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub storage: StorageType,
    pub missing: usize,
    pub coerced_to_missing: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub table: String,
    pub descriptor: DatasetDescriptor,
    pub rows: usize,
    pub columns: Vec<ColumnSummary>,
    pub collisions: Vec<HeaderCollision>,
}

/// Result of parsing an upload and canonicalizing its headers.
#[derive(Debug, Clone)]
pub struct ParsedUpload {
    pub table: NormalizedTable,
    pub collisions: Vec<HeaderCollision>,
}

/// Trims, strips punctuation other than word characters, whitespace and
/// hyphens, collapses whitespace/hyphen runs into `_`, and lower-cases.
pub fn canonicalize_header(header: &str) -> String {
    let trimmed = header.trim();
    let stripped = STRIP_PUNCTUATION.replace_all(trimmed, "");
    let joined = SEPARATOR_RUNS.replace_all(&stripped, "_");
    joined.to_lowercase()
}

pub fn read_upload(path: &Path, options: &IngestOptions) -> Result<ParsedUpload, IngestError> {
    let reader = io_utils::open_input(path).map_err(|source| IngestError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_upload_from_reader(reader, options)
}

pub fn read_upload_from_reader<R: Read>(
    reader: R,
    options: &IngestOptions,
) -> Result<ParsedUpload, IngestError> {
    let mut reader = io_utils::open_csv_reader(reader, options.delimiter);
    let header_record = reader.byte_headers()?.clone();
    let headers = io_utils::decode_record(&header_record, options.encoding).ok_or(
        IngestError::Decode {
            row: 1,
            encoding: options.encoding.name(),
        },
    )?;
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestError::MissingHeader);
    }

    let width = headers.len();
    let mut values: Vec<Vec<String>> = vec![Vec::new(); width];
    let mut row_count = 0usize;
    let mut ragged = 0usize;
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record?;
        let mut decoded =
            io_utils::decode_record(&record, options.encoding).ok_or(IngestError::Decode {
                row: idx + 2,
                encoding: options.encoding.name(),
            })?;
        if decoded.len() != width {
            ragged += 1;
            decoded.resize(width, String::new());
        }
        for (column, value) in values.iter_mut().zip(decoded) {
            column.push(value);
        }
        row_count += 1;
    }
    if ragged > 0 {
        warn!("{ragged} row(s) did not match the header width and were padded or truncated");
    }

    let mut table = NormalizedTable::new(row_count);
    let mut collisions = Vec::new();
    let mut originals: Vec<(String, String)> = Vec::new();
    for (idx, (header, column_values)) in headers.iter().zip(values).enumerate() {
        let mut canonical = canonicalize_header(header);
        if canonical.is_empty() {
            canonical = format!("column_{}", idx + 1);
        }
        if table.insert_column(Column::from_raw(canonical.clone(), column_values)) {
            let previous = originals
                .iter_mut()
                .find(|(name, _)| *name == canonical)
                .map(|(_, original)| std::mem::replace(original, header.clone()))
                .unwrap_or_default();
            warn!("Headers '{previous}' and '{header}' both normalize to '{canonical}'; keeping '{header}'");
            collisions.push(HeaderCollision {
                canonical,
                kept: header.clone(),
                dropped: previous,
            });
        } else {
            originals.push((canonical, header.clone()));
        }
    }
    debug!("Parsed {row_count} row(s) with {} column(s)", table.columns().len());
    Ok(ParsedUpload { table, collisions })
}

/// Detects the shape and applies its coercions. Returns the descriptor
/// re-derived from the final column set.
pub fn normalize(
    table: &mut NormalizedTable,
    registry: &ShapeRegistry,
    today: NaiveDate,
) -> DatasetDescriptor {
    let initial = registry.detect(&table.column_names());
    if initial.is_unknown() {
        table.infer_remaining_types();
        return initial;
    }
    if let Some(prepare) = registry.find(&initial.name).and_then(|shape| shape.prepare) {
        prepare(table);
    }
    let descriptor = registry.detect(&table.column_names());
    coerce_roles(table, &descriptor, today);
    table.infer_remaining_types();
    descriptor
}

fn coerce_roles(table: &mut NormalizedTable, descriptor: &DatasetDescriptor, today: NaiveDate) {
    if let Some(amount) = descriptor.amount_col.as_deref() {
        table.coerce_column(amount, StorageType::Real, |raw| {
            data::parse_money(raw).map(Cell::Float)
        });
    }
    if let Some(date) = descriptor.date_col.as_deref() {
        table.coerce_column(date, StorageType::Date, |raw| {
            data::parse_loose_date(raw)
                .and_then(|d| data::discard_implausible_future(d, today))
                .map(Cell::Date)
        });
    }
    if let Some(rating) = descriptor.rating_col.as_deref() {
        table.coerce_column(rating, StorageType::Real, |raw| {
            data::parse_rating(raw).map(Cell::Float)
        });
    }
    let text_roles: BTreeSet<String> = descriptor.text_roles().map(str::to_string).collect();
    for column in &text_roles {
        table.coerce_column(column, StorageType::Text, |raw| {
            data::normalize_text(raw).map(Cell::Text)
        });
    }
}

/// Parses, normalizes and stores an upload, replacing `table_name`.
pub fn ingest_file(
    store: &mut Store,
    registry: &ShapeRegistry,
    path: &Path,
    table_name: &str,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    info!(
        "Ingesting {:?} with delimiter '{}'",
        path,
        io_utils::printable_delimiter(options.delimiter)
    );
    let parsed = read_upload(path, options)?;
    store_upload(store, registry, parsed, table_name, options.today)
}

pub fn store_upload(
    store: &mut Store,
    registry: &ShapeRegistry,
    parsed: ParsedUpload,
    table_name: &str,
    today: NaiveDate,
) -> Result<IngestReport, IngestError> {
    let ParsedUpload {
        mut table,
        collisions,
    } = parsed;
    let descriptor = normalize(&mut table, registry, today);
    if descriptor.is_unknown() {
        warn!("Dataset not recognized; storing canonical columns without shape coercions");
    } else {
        info!("Detected dataset shape '{}'", descriptor.name);
    }
    store.replace_table(table_name, &table)?;

    let losses = table.coercion_losses();
    let columns = table
        .columns()
        .iter()
        .map(|column| ColumnSummary {
            name: column.name.clone(),
            storage: column.storage_type(),
            missing: column.missing_count(),
            coerced_to_missing: losses.get(&column.name).copied().unwrap_or(0),
        })
        .collect();
    Ok(IngestReport {
        table: table_name.to_string(),
        descriptor,
        rows: table.row_count(),
        columns,
        collisions,
    })
}
