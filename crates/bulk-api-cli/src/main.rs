//! Bulk API CLI
//!
//! Command-line interface for exploring the Bulk API data catalog. The
//! client is configured from the environment (`BULK_API_TOKEN`,
//! `BULK_API_URL`, `BULK_API_EXPIRATION_TIME`, ...).

use bulk_api_client::{BulkClient, ListParams, QueryParams};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "bulk-api")]
#[command(version, about = "Bulk API catalog CLI", long_about = None)]
struct Cli {
    /// Log every request (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the apps of the catalog
    Apps,

    /// List the models of an app
    Models {
        /// App label
        app: String,
    },

    /// Run a paged query and print the merged result as CSV
    Query {
        /// App label
        app: String,

        /// Model name
        model: String,

        /// Fields to select, as a YAML list
        #[arg(long)]
        fields: Option<String>,

        /// Row filter, as a YAML mapping
        #[arg(long)]
        filter: Option<String>,

        /// Field to order by; prefix with '-' for descending
        #[arg(long)]
        order: Option<String>,

        /// Rows per page
        #[arg(long)]
        page_size: Option<i64>,

        /// Only distinct rows
        #[arg(long)]
        distinct: bool,

        /// Neither read nor write the response cache
        #[arg(long)]
        no_cache: bool,

        /// Write CSV here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List one page of records as JSON
    List {
        /// App label
        app: String,

        /// Model name
        model: String,

        /// Page number
        #[arg(short, long, default_value_t = 1)]
        page: i64,
    },

    /// Show one record as JSON
    Get {
        /// App label
        app: String,

        /// Model name
        model: String,

        /// Primary key
        pk: String,
    },

    /// Delete one record
    Delete {
        /// App label
        app: String,

        /// Model name
        model: String,

        /// Primary key
        pk: String,
    },

    /// Download a file from the download area
    Download {
        /// File path below download/, or a full download URL
        name: String,

        /// Target directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Local file name (default: last segment of NAME)
        #[arg(long = "as")]
        local_name: Option<String>,
    },

    /// Remove every cached query page
    ClearCache,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> CliResult {
    let client = BulkClient::from_env().await?;
    tracing::debug!(base_url = %client.base_url(), "Client ready");

    match command {
        Commands::Apps => {
            for label in client.app_labels() {
                println!("{}", label);
            }
        }
        Commands::Models { app } => {
            for name in client.app(&app)?.model_names().await? {
                println!("{}", name);
            }
        }
        Commands::Query {
            app,
            model,
            fields,
            filter,
            order,
            page_size,
            distinct,
            no_cache,
            output,
        } => {
            let params = query_params(fields, filter, order, page_size)
                .distinct(distinct)
                .skip_cache(no_cache);
            let table = client.model(&app, &model).await?.query(params).await?;
            match output {
                Some(path) => {
                    table.write_csv(std::fs::File::create(&path)?)?;
                    eprintln!("Wrote {} rows to {}", table.len(), path.display());
                }
                None => table.write_csv(std::io::stdout().lock())?,
            }
        }
        Commands::List { app, model, page } => {
            let records = client
                .model(&app, &model)
                .await?
                .list(ListParams::new().page(page))
                .await?;
            let mut rows = Vec::with_capacity(records.len());
            for record in &records {
                rows.push(serde_json::Value::Object(record.data().await?));
            }
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Get { app, model, pk } => {
            let record = client.model(&app, &model).await?.get(&pk).await?;
            println!("{}", record);
            println!("{}", serde_json::to_string_pretty(&record.data().await?)?);
        }
        Commands::Delete { app, model, pk } => {
            let model = client.model(&app, &model).await?;
            let record = model.record(model.record_uri(&pk));
            record.delete().await?;
            println!("Deleted {}", record);
        }
        Commands::Download {
            name,
            dir,
            local_name,
        } => {
            let path = client
                .download_file(&name, &dir, local_name.as_deref())
                .await?;
            println!("{}", path.display());
        }
        Commands::ClearCache => {
            client.clear_cache().await?;
            println!("Cache cleared");
        }
    }

    Ok(())
}

fn query_params(
    fields: Option<String>,
    filter: Option<String>,
    order: Option<String>,
    page_size: Option<i64>,
) -> QueryParams {
    let mut params = QueryParams::new();
    if let Some(fields) = fields {
        params = params.fields(fields);
    }
    if let Some(filter) = filter {
        params = params.filter(filter);
    }
    if let Some(order) = order {
        params = params.order(order);
    }
    if let Some(page_size) = page_size {
        params = params.page_size(page_size);
    }
    params
}
