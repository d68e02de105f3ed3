use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{io_utils::parse_delimiter, queries::DEFAULT_PREVIEW_ROWS};

pub const DEFAULT_DB_PATH: &str = "database/app.sqlite";
pub const DEFAULT_TABLE: &str = "fact";

#[derive(Debug, Parser)]
#[command(author, version, about = "Detect, normalize and explore dataset CSV uploads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Normalize a CSV upload and replace the stored table with it
    Ingest(IngestArgs),
    /// Report KPIs, monthly series, rankings and ratings for the stored table
    Report(ReportArgs),
    /// Show the first rows of the stored table under the current filters
    Preview(PreviewArgs),
    /// List the values available for each filter
    Options(OptionsArgs),
    /// Ingest a CSV upload and report on it in a single pass
    Dashboard(DashboardArgs),
    /// Clear the filter selections held in a session file
    Reset(ResetArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// SQLite store file
    #[arg(long = "db", default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,
    /// Name of the table holding the upload
    #[arg(long, default_value = DEFAULT_TABLE, value_parser = parse_table_name)]
    pub table: String,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// CSV file to upload (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args, Default)]
pub struct FilterArgs {
    /// Keep rows dated on or after this day (YYYY-MM-DD); requires --to
    #[arg(long, value_parser = parse_date_arg, requires = "to")]
    pub from: Option<NaiveDate>,
    /// Keep rows dated on or before this day (YYYY-MM-DD); requires --from
    #[arg(long, value_parser = parse_date_arg, requires = "from")]
    pub to: Option<NaiveDate>,
    /// Keep only these regions (comma-separated or repeated)
    #[arg(long = "region", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub regions: Vec<String>,
    /// Keep only these products (comma-separated or repeated)
    #[arg(long = "product", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub products: Vec<String>,
    /// Number of groups in each ranking
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub top: Option<u32>,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub upload: UploadArgs,
    #[command(flatten)]
    pub store: StoreArgs,
    /// Output format for the ingestion summary
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Session file remembering filter selections between runs
    #[arg(long)]
    pub session: Option<PathBuf>,
    /// Maximum number of preview rows
    #[arg(long, default_value_t = DEFAULT_PREVIEW_ROWS)]
    pub rows: usize,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Session file remembering filter selections between runs
    #[arg(long)]
    pub session: Option<PathBuf>,
    /// Number of rows to display
    #[arg(long, default_value_t = DEFAULT_PREVIEW_ROWS)]
    pub rows: usize,
}

#[derive(Debug, Args)]
pub struct OptionsArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct DashboardArgs {
    #[command(flatten)]
    pub upload: UploadArgs,
    #[command(flatten)]
    pub store: StoreArgs,
    /// Keep the upload in a private in-memory store instead of --db
    #[arg(long)]
    pub ephemeral: bool,
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Session file remembering filter selections between runs
    #[arg(long)]
    pub session: Option<PathBuf>,
    /// Maximum number of preview rows
    #[arg(long, default_value_t = DEFAULT_PREVIEW_ROWS)]
    pub rows: usize,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Session file to clear
    #[arg(long)]
    pub session: PathBuf,
}

pub fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|err| format!("Expected a YYYY-MM-DD date: {err}"))
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn parse_table_name(value: &str) -> Result<String, String> {
    let mut chars = value.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(value.to_string())
    } else {
        Err(format!(
            "Table name '{value}' must start with a letter or underscore and contain only letters, digits and underscores"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn table_names_are_restricted() {
        assert!(parse_table_name("fact").is_ok());
        assert!(parse_table_name("_t2").is_ok());
        assert!(parse_table_name("2t").is_err());
        assert!(parse_table_name("fact; DROP").is_err());
        assert!(parse_table_name("").is_err());
    }

    #[test]
    fn from_requires_to() {
        let result = Cli::try_parse_from(["dataset-analytics", "report", "--from", "2024-01-01"]);
        assert!(result.is_err());
        let parsed = Cli::try_parse_from([
            "dataset-analytics",
            "report",
            "--from",
            "2024-01-01",
            "--to",
            "2024-02-01",
            "--region",
            "Texas,Ohio",
            "--region",
            "Maine",
        ])
        .unwrap();
        match parsed.command {
            Commands::Report(args) => {
                assert_eq!(args.filters.regions, vec!["Texas", "Ohio", "Maine"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
