mod anomaly;
mod catalog;
mod client;
mod config;
mod pdf_extract;
mod pipeline;
mod rate_limit;
mod server;
mod store_cache;
mod store_db;
mod sync;

use anomaly::{AnomalySummary, anomaly_level};
use catalog::{ClassificationTables, ProductRecord};
use clap::{Parser, Subcommand};
use client::BackendClient;
use config::{Config, DEFAULT_CONFIG_PATH};
use pipeline::{JobStatus, prepare_batch, run_upload};
use serde_json::json;
use std::path::{Path, PathBuf};
use store_db::{CatalogStore, GlobalRole, StoreRole};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "store_counts")]
#[command(about = "Weekly count-sheet ingestion and catalog backend")]
struct Cli {
    #[arg(long, global = true, env = "STORE_COUNTS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST backend
    Serve,
    /// Extract, parse and classify a PDF locally and print the result
    Inspect {
        pdf: PathBuf,
        /// Include the extracted page text
        #[arg(long, default_value_t = false)]
        text: bool,
    },
    /// Run the full pipeline and sync the products to the backend
    Upload {
        pdf: PathBuf,
        #[arg(long)]
        store: Option<String>,
        /// Extra attempts for the metadata step when only it fails
        #[arg(long, default_value_t = 1)]
        metadata_retries: usize,
    },
    /// Show the backend's current metadata and anomaly summary
    Status {
        #[arg(long)]
        store: Option<String>,
    },
    CreateStore {
        code: String,
        name: String,
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long, default_value_t = false)]
        inactive: bool,
    },
    /// Insert a user and print a fresh session token
    CreateUser {
        email: String,
        #[arg(long, default_value = "associate")]
        role: GlobalRole,
    },
    Grant {
        email: String,
        store_code: String,
        role: StoreRole,
    },
    /// Persist the default store code into the config file
    UseStore { code: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(&cfg).await,
        Commands::Inspect { pdf, text } => inspect(&cfg, &pdf, text),
        Commands::Upload {
            pdf,
            store,
            metadata_retries,
        } => upload(&cfg, &pdf, store, metadata_retries).await,
        Commands::Status { store } => status(&cfg, store).await,
        Commands::CreateStore {
            code,
            name,
            timezone,
            inactive,
        } => {
            let store = open_db(&cfg)?.create_store(&code, &name, timezone.as_deref(), !inactive)?;
            println!("{}", serde_json::to_string_pretty(&store)?);
            Ok(())
        }
        Commands::CreateUser { email, role } => {
            let db = open_db(&cfg)?;
            let user = db.create_user(&email, role)?;
            let token = db.create_session(&user.id)?;
            info!(user_id = %user.id, role = %user.role, "User created");
            println!("{token}");
            Ok(())
        }
        Commands::Grant {
            email,
            store_code,
            role,
        } => {
            let db = open_db(&cfg)?;
            let user = db
                .get_user_by_email(&email)?
                .ok_or_else(|| format!("no user with email '{email}'"))?;
            let store = db
                .get_store_by_code(&store_code)?
                .ok_or_else(|| format!("no store with code '{store_code}'"))?;
            db.grant_store_access(&user.id, &store.id, role)?;
            Ok(())
        }
        Commands::UseStore { code } => {
            Config::update_store_code(&cli.config, &code)?;
            info!(store = %code, config = %cli.config.display(), "Default store updated");
            Ok(())
        }
    }
}

fn load_tables(cfg: &Config) -> Result<ClassificationTables, Box<dyn std::error::Error>> {
    let tables = match &cfg.catalog.tables_path {
        Some(path) => ClassificationTables::load(path)?,
        None => ClassificationTables::builtin(),
    };
    info!(
        conversions = tables.conversion_count(),
        groups = tables.group_count(),
        "Classification tables loaded"
    );
    Ok(tables)
}

fn open_db(cfg: &Config) -> Result<CatalogStore, Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(&cfg.db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(CatalogStore::new(&cfg.db_path)?)
}

async fn serve(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_db(cfg)?;
    let (stores, products, uploads) = db.get_counts()?;
    info!(stores, products, uploads, "Database statistics");

    let state = server::AppState::new(db, load_tables(cfg)?, cfg);
    server::serve(&cfg.server, state).await
}

fn inspect(cfg: &Config, pdf: &Path, with_text: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(pdf)?;
    let parsed = pdf_extract::extract_document(&bytes)?;
    let batch = prepare_batch(&parsed, &load_tables(cfg)?);

    let products: Vec<_> = batch
        .products
        .iter()
        .map(|p| json!({ "product": p, "anomaly": anomaly_level(p) }))
        .collect();
    let mut report = json!({
        "metadata": batch.metadata,
        "products": products,
        "skippedRows": batch.skipped,
        "anomalies": batch.anomalies,
    });
    if with_text {
        report["text"] = json!(parsed.text);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn upload(
    cfg: &Config,
    pdf: &Path,
    store: Option<String>,
    metadata_retries: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let tables = load_tables(cfg)?;
    let client = BackendClient::from_config(&cfg.client).with_store_code(store);
    if !client.is_reachable().await {
        return Err(format!("backend at {} is not reachable", cfg.client.base_url).into());
    }

    let (status_tx, _status_rx) = watch::channel(JobStatus::Reading);
    let (batch, report) = run_upload(pdf, &tables, &client, &status_tx, metadata_retries).await?;
    for item in &report.item_errors {
        warn!(index = item.index, error = %item.error, "Product rejected by backend");
    }
    let summary = json!({
        "productsSynced": report.products_synced,
        "rejected": report.item_errors.len(),
        "skippedRows": batch.skipped.len(),
        "anomalies": batch.anomalies,
        "metadata": report.metadata,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn status(cfg: &Config, store: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let client = BackendClient::from_config(&cfg.client).with_store_code(store);
    let metadata = client.fetch_pdf_metadata().await?;
    let products: Vec<ProductRecord> = client
        .fetch_products()
        .await?
        .into_iter()
        .map(|p| p.record)
        .collect();

    let report = json!({
        "metadata": metadata,
        "products": products.len(),
        "anomalies": AnomalySummary::from_products(&products),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
