pub mod cli;
pub mod data;
pub mod filter;
pub mod frame;
pub mod ingest;
pub mod io_utils;
pub mod queries;
pub mod report;
pub mod session;
pub mod shape;
pub mod store;
pub mod table;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{
        Cli, Commands, DashboardArgs, FilterArgs, IngestArgs, OptionsArgs, OutputFormat,
        PreviewArgs, ReportArgs, ResetArgs, StoreArgs, UploadArgs,
    },
    filter::DateRange,
    ingest::{IngestOptions, IngestReport},
    session::{SelectionUpdate, SessionContext},
    shape::{DatasetDescriptor, ShapeRegistry},
    store::Store,
    table::{Align, TextTable},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("dataset_analytics", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let registry = ShapeRegistry::builtin();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args, &registry),
        Commands::Report(args) => handle_report(&args, &registry),
        Commands::Preview(args) => handle_preview(&args, &registry),
        Commands::Options(args) => handle_options(&args, &registry),
        Commands::Dashboard(args) => handle_dashboard(&args, &registry),
        Commands::Reset(args) => handle_reset(&args),
    }
}

fn open_store(args: &StoreArgs) -> Result<Store> {
    Store::open(&args.db).with_context(|| format!("Opening store {:?}", args.db))
}

fn ingest_options(upload: &UploadArgs) -> Result<IngestOptions> {
    Ok(IngestOptions {
        delimiter: io_utils::resolve_input_delimiter(&upload.input, upload.delimiter),
        encoding: io_utils::resolve_encoding(upload.input_encoding.as_deref())?,
        today: Local::now().date_naive(),
    })
}

fn ingest_upload(
    store: &mut Store,
    registry: &ShapeRegistry,
    upload: &UploadArgs,
    table: &str,
) -> Result<IngestReport> {
    let options = ingest_options(upload)?;
    ingest::ingest_file(store, registry, &upload.input, table, &options)
        .with_context(|| format!("Ingesting {:?}", upload.input))
}

fn handle_ingest(args: &IngestArgs, registry: &ShapeRegistry) -> Result<()> {
    let mut store = open_store(&args.store)?;
    let ingested = ingest_upload(&mut store, registry, &args.upload, &args.store.table)?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ingested)?),
        OutputFormat::Table => print!("{}", render_ingest_report(&ingested)),
    }
    if ingested.descriptor.is_unknown() {
        warn!("Dataset not recognized; report commands need a shopping or airbnb upload");
    }
    Ok(())
}

fn render_ingest_report(ingested: &IngestReport) -> String {
    let descriptor = &ingested.descriptor;
    let mut out = format!(
        "Dataset: {}\nRows: {}\n\n",
        descriptor.name,
        report::format_count(ingested.rows as u64)
    );
    let mut roles = TextTable::new(["role", "column"]);
    for (role, column) in [
        ("date", &descriptor.date_col),
        ("region", &descriptor.region_col),
        ("product", &descriptor.product_col),
        ("amount", &descriptor.amount_col),
        ("rating", &descriptor.rating_col),
    ] {
        roles.push_row(vec![
            role.to_string(),
            column.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    out.push_str(&roles.render());
    out.push('\n');

    let mut columns = TextTable::new(["column", "type", "missing", "coerced to missing"])
        .align(2, Align::Right)
        .align(3, Align::Right);
    for column in &ingested.columns {
        columns.push_row(vec![
            column.name.clone(),
            column.storage.to_string(),
            column.missing.to_string(),
            column.coerced_to_missing.to_string(),
        ]);
    }
    out.push_str(&columns.render());
    for collision in &ingested.collisions {
        out.push_str(&format!(
            "note: '{}' replaced '{}' as column '{}'\n",
            collision.kept, collision.dropped, collision.canonical
        ));
    }
    out
}

/// Merges command-line filters into the session (when one is given) and
/// returns the resolved selection.
fn resolve_selection(filters: &FilterArgs, session_path: Option<&Path>) -> Result<SessionContext> {
    let update = SelectionUpdate {
        date_range: filters.from.zip(filters.to).map(|(a, b)| DateRange::new(a, b)),
        regions: normalize_selection(&filters.regions),
        products: normalize_selection(&filters.products),
        top_n: filters.top.map(|n| n as usize),
    };
    match session_path {
        Some(path) => {
            let mut session = SessionContext::load(path)?;
            session.apply(update);
            session.save(path)?;
            debug!("Session {path:?} now holds {session:?}");
            Ok(session)
        }
        None => {
            let mut session = SessionContext::default();
            session.apply(update);
            Ok(session)
        }
    }
}

/// Filter values go through the same text normalization as the stored role
/// columns, so `entire home/apt` selects `Entire Home/Apt`.
fn normalize_selection(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .filter_map(|value| data::normalize_text(value))
            .unique()
            .collect(),
    )
}

fn require_known(descriptor: &DatasetDescriptor, store: &Store, table: &str) -> Result<()> {
    if descriptor.is_unknown() {
        let columns = store.column_names(table)?;
        bail!(
            "Dataset not recognized. Detected columns: {}",
            columns.join(", ")
        );
    }
    Ok(())
}

fn print_report(
    store: &Store,
    table: &str,
    descriptor: &DatasetDescriptor,
    selection: &SessionContext,
    rows: usize,
    format: OutputFormat,
) -> Result<()> {
    let predicate = selection.predicate(descriptor);
    let dashboard = report::build_report(
        store,
        table,
        descriptor,
        &predicate,
        selection.top_n,
        rows,
    )
    .with_context(|| format!("Querying table '{table}'"))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&dashboard)?),
        OutputFormat::Table => print!("{}", report::render_text(&dashboard)),
    }
    info!(
        "Reported on {} matching row(s) of '{table}'",
        dashboard.summary.rows
    );
    Ok(())
}

fn handle_report(args: &ReportArgs, registry: &ShapeRegistry) -> Result<()> {
    let store = open_store(&args.store)?;
    let descriptor = store.descriptor(registry, &args.store.table)?;
    require_known(&descriptor, &store, &args.store.table)?;
    let selection = resolve_selection(&args.filters, args.session.as_deref())?;
    print_report(
        &store,
        &args.store.table,
        &descriptor,
        &selection,
        args.rows,
        args.format,
    )
}

fn handle_preview(args: &PreviewArgs, registry: &ShapeRegistry) -> Result<()> {
    let store = open_store(&args.store)?;
    let table = &args.store.table;
    let descriptor = store.descriptor(registry, table)?;
    let selection = resolve_selection(&args.filters, args.session.as_deref())?;
    let predicate = selection.predicate(&descriptor);
    let preview = queries::preview(store.connection(), table, &predicate, args.rows)?;
    let mut out = String::new();
    report::render_preview(&mut out, &preview);
    print!("{out}");
    info!("Displayed {} row(s) from '{table}'", preview.rows.len());
    Ok(())
}

fn handle_options(args: &OptionsArgs, registry: &ShapeRegistry) -> Result<()> {
    let store = open_store(&args.store)?;
    let table = &args.store.table;
    let descriptor = store.descriptor(registry, table)?;
    let options = queries::filter_options(store.connection(), table, &descriptor)?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&options)?),
        OutputFormat::Table => {
            let dates = match (options.first_date, options.last_date) {
                (Some(first), Some(last)) => format!("{first} .. {last}"),
                _ => "unavailable".to_string(),
            };
            println!("Dataset: {}", descriptor.name);
            println!("Dates: {dates}");
            println!("Regions: {}", describe_values(descriptor.region_col.is_some(), &options.regions));
            println!("Products: {}", describe_values(descriptor.product_col.is_some(), &options.products));
        }
    }
    Ok(())
}

fn describe_values(available: bool, values: &[String]) -> String {
    if !available {
        "unavailable".to_string()
    } else if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}

fn handle_dashboard(args: &DashboardArgs, registry: &ShapeRegistry) -> Result<()> {
    let mut store = if args.ephemeral {
        Store::open_in_memory().context("Opening in-memory store")?
    } else {
        open_store(&args.store)?
    };
    let table = &args.store.table;
    let ingested = ingest_upload(&mut store, registry, &args.upload, table)?;
    require_known(&ingested.descriptor, &store, table)?;
    let selection = resolve_selection(&args.filters, args.session.as_deref())?;
    print_report(
        &store,
        table,
        &ingested.descriptor,
        &selection,
        args.rows,
        args.format,
    )
}

fn handle_reset(args: &ResetArgs) -> Result<()> {
    let mut session = SessionContext::load(&args.session)?;
    session.clear();
    session.save(&args.session)?;
    info!("Cleared filter selections in {:?}", args.session);
    Ok(())
}
