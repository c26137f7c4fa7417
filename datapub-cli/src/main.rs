//! Command line tool for the DataPub platform.
//!
//! Every subcommand is a thin adapter between files on disk and one
//! client operation. Logs go to stderr, data output goes to stdout.

mod files;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use datapub_client::{roundtrip, DatapubClient, InsertMethod};
use datapub_core::{
    ClientConfig, DatapubResult, DEFAULT_API_VERSION, DEFAULT_BATCH_SIZE, DEFAULT_HOST,
    DEFAULT_INSERT_RETRIES, DEFAULT_PROTOCOL, DEFAULT_SCHEMA,
};

#[derive(Parser)]
#[command(name = "datapub", version)]
#[command(about = "Publish and manage tabular data on the DataPub platform")]
struct Cli {
    /// API token; falls back to the DATAPUB_API_TOKEN environment variable
    #[arg(short, long, global = true)]
    token: Option<String>,

    #[arg(long, global = true, default_value = DEFAULT_PROTOCOL)]
    protocol: String,

    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, global = true, default_value = DEFAULT_API_VERSION)]
    api_version: String,

    /// Schema used when a command does not name one
    #[arg(short, long, global = true, default_value = DEFAULT_SCHEMA)]
    schema: String,

    /// Records per upload batch; 0 sends everything in one batch
    #[arg(short, long, global = true, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Additional attempts per batch after a server-side failure
    #[arg(long, global = true, default_value_t = DEFAULT_INSERT_RETRIES)]
    insert_retries: u32,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a table from the definition embedded in a metadata document
    Create {
        table: String,
        /// Metadata JSON file whose first resource carries the schema
        metadata_file: PathBuf,
        /// Also upload the metadata document after creating the table
        #[arg(short = 'm', long)]
        upload_metadata: bool,
    },
    /// Drop a table
    Drop { table: String },
    /// Upload records from a JSON or CSV file
    Insert {
        table: String,
        data_file: PathBuf,
        /// CSV field delimiter
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,
        /// Wrap each batch in an advanced-API transaction
        #[arg(long)]
        advanced: bool,
    },
    /// Download rows into a JSON or CSV file, or print them as JSON
    Select {
        table: String,
        data_file: Option<PathBuf>,
        /// Row filter like "id>10"; repeatable
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
        /// CSV field delimiter
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,
    },
    /// Read or write a table's metadata document
    #[command(subcommand)]
    Metadata(MetadataCommand),
    /// Move a table into another schema
    Move {
        table: String,
        target_schema: String,
    },
    /// Print a table's row count
    Count { table: String },
    /// Delete all rows from a table
    Delete { table: String },
    /// List all visible tables
    List,
    /// Create a throwaway table and run every operation against it
    Test {
        /// Schema the throwaway table is created in
        #[arg(default_value = "sandbox")]
        test_schema: String,
    },
}

#[derive(Subcommand)]
enum MetadataCommand {
    /// Save a table's metadata to a file, or print it
    Get {
        table: String,
        metadata_file: Option<PathBuf>,
    },
    /// Upload a metadata document
    Set {
        table: String,
        metadata_file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run(cli: Cli) -> DatapubResult<()> {
    let config = ClientConfig {
        protocol: cli.protocol,
        host: cli.host,
        api_version: cli.api_version,
        token: cli.token,
        default_schema: cli.schema,
        batch_size: cli.batch_size,
        insert_retries: cli.insert_retries,
    };
    let client = DatapubClient::new(config)?;

    match cli.command {
        Command::Create {
            table,
            metadata_file,
            upload_metadata,
        } => {
            let metadata = files::read_json(&metadata_file)?;
            let definition = files::definition_from_metadata(&metadata)?;
            client.create_table(&table, &definition, None)?;
            if upload_metadata {
                client.set_metadata(&table, &metadata, None)?;
            }
            tracing::info!(table = %table, "table created");
        }
        Command::Drop { table } => {
            client.drop_table(&table, None)?;
            tracing::info!(table = %table, "table dropped");
        }
        Command::Insert {
            table,
            data_file,
            delimiter,
            advanced,
        } => {
            let records = files::read_records(&data_file, delimiter)?;
            let method = if advanced {
                InsertMethod::Advanced
            } else {
                InsertMethod::Api
            };
            let count = client.insert_into_table(&table, &records, None, None, method)?;
            tracing::info!(table = %table, rows = count, "insert complete");
        }
        Command::Select {
            table,
            data_file,
            filters,
            delimiter,
        } => {
            let records = client.select_from_table(&table, None, &filters)?;
            match data_file {
                Some(path) => files::write_records(&records, &path, delimiter)?,
                None => files::print_json(&records)?,
            }
            tracing::info!(table = %table, rows = records.len(), "select complete");
        }
        Command::Metadata(MetadataCommand::Get {
            table,
            metadata_file,
        }) => {
            let metadata = client.get_metadata(&table, None)?;
            match metadata_file {
                Some(path) => files::write_json(&metadata, &path)?,
                None => files::print_json(&metadata)?,
            }
        }
        Command::Metadata(MetadataCommand::Set {
            table,
            metadata_file,
        }) => {
            let metadata = files::read_json(&metadata_file)?;
            client.set_metadata(&table, &metadata, None)?;
            tracing::info!(table = %table, "metadata updated");
        }
        Command::Move {
            table,
            target_schema,
        } => {
            client.move_table(&table, &target_schema, None)?;
            tracing::info!(table = %table, target = %target_schema, "table moved");
        }
        Command::Count { table } => {
            let count = client.count_rows(&table, None)?;
            println!("{count}");
        }
        Command::Delete { table } => {
            client.delete_from_table(&table, None)?;
            tracing::info!(table = %table, "rows deleted");
        }
        Command::List => {
            for table in client.list_tables()? {
                println!("{table}");
            }
        }
        Command::Test { test_schema } => {
            roundtrip(&client, Some(&test_schema))?;
            tracing::info!("round trip test passed");
        }
    }
    Ok(())
}
