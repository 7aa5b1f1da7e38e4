// Vacina Insights - CLI
//
//   vacina import <csv>...      CSV exports → SQLite + WAL
//   vacina normalize <json>     add tx_insumo_norm / tx_sigla_norm to a JSON array
//   vacina forecast <insumo>    projection for one vaccine
//   vacina mappings             canonical vaccine names
//   vacina init-config          write a default vacina.toml

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vacina_insights::api::PrevisaoParams;
use vacina_insights::config::DEFAULT_CONFIG_FILE;
use vacina_insights::{db, Config, Normalizer, RuleSet, Service};

#[derive(Parser, Debug)]
#[command(name = "vacina", version, about = "Vaccine distribution normalization and forecasting")]
struct Args {
    /// Configuration file (defaults to ./vacina.toml when present)
    #[arg(short, long, global = true, env = "VACINA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import CSV exports into the SQLite store
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Database file (overrides data.database_path)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Normalize a JSON array of distribution rows
    Normalize {
        input: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Forecast the next year for one vaccine
    Forecast {
        insumo: String,

        #[arg(long)]
        uf: Option<String>,

        /// Forecast a single month (1-12)
        #[arg(long)]
        mes: Option<String>,
    },

    /// List canonical vaccine names
    Mappings,

    /// Write a default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Command::InitConfig = args.command {
        if let Err(e) = handle_init_config() {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        error!("Command failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() {
        bail!("{} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = Config::resolve(args.config.as_deref())?;
    info!("Vacina Insights v{}", vacina_insights::VERSION);

    match args.command {
        Command::Import { files, db } => run_import(&config, &files, db),
        Command::Normalize { input, output } => run_normalize(&config, &input, output.as_deref()),
        Command::Forecast { insumo, uf, mes } => run_forecast(&config, insumo, uf, mes).await,
        Command::Mappings => {
            let normalizer = load_normalizer(&config)?;
            for name in normalizer.labels().canonical_names() {
                println!("{}", name);
            }
            Ok(())
        }
        Command::InitConfig => handle_init_config(),
    }
}

fn load_normalizer(config: &Config) -> Result<Normalizer> {
    match &config.mappings.path {
        Some(path) => {
            let labels = RuleSet::from_file(path)?;
            Ok(Normalizer::new(labels, RuleSet::builtin_regions()))
        }
        None => Ok(Normalizer::builtin()),
    }
}

fn run_import(config: &Config, files: &[PathBuf], db_override: Option<PathBuf>) -> Result<()> {
    let db_path = db_override
        .or_else(|| config.data.database_path.clone())
        .context("No database configured: pass --db or set data.database_path / DATABASE_URL")?;

    let conn = Connection::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    db::setup_database(&conn, &config.data.table)?;
    info!(path = %db_path.display(), "Database initialized with WAL mode");

    let mut rejected = 0;
    let mut inserted = 0;
    let mut duplicates = 0;
    for file in files {
        let (records, file_rejected) = db::load_csv(file)?;
        let stats = db::insert_records(&conn, &config.data.table, &records)?;
        info!(
            file = %file.display(),
            loaded = records.len(),
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            rejected = file_rejected,
            "File imported"
        );
        rejected += file_rejected;
        inserted += stats.inserted;
        duplicates += stats.duplicates;
    }

    let count = db::verify_count(&conn, &config.data.table)?;
    println!("✓ Inserted: {}", inserted);
    println!("✓ Duplicates skipped: {}", duplicates);
    println!("✓ Invalid rows rejected: {}", rejected);
    println!("✓ Database contains {} records", count);
    Ok(())
}

/// Copy every object, adding the normalized label and UF next to the raw ones
fn normalize_rows(rows: Vec<Value>, normalizer: &Normalizer) -> Vec<Value> {
    let text = |row: &serde_json::Map<String, Value>, upper: &str, lower: &str| {
        row.get(upper)
            .or_else(|| row.get(lower))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    rows.into_iter()
        .map(|row| match row {
            Value::Object(mut obj) => {
                let label = text(&obj, "TX_INSUMO", "tx_insumo").unwrap_or_default();
                let region = text(&obj, "TX_SIGLA", "tx_sigla").unwrap_or_default();
                obj.insert("tx_insumo_norm".into(), Value::String(normalizer.normalize_label(&label)));
                obj.insert("tx_sigla_norm".into(), Value::String(normalizer.normalize_region(&region)));
                Value::Object(obj)
            }
            other => other,
        })
        .collect()
}

fn run_normalize(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let rows: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array", input.display()))?;

    let normalizer = load_normalizer(config)?;
    let total = rows.len();
    let normalized = normalize_rows(rows, &normalizer);
    let json = serde_json::to_string_pretty(&normalized)?;

    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(rows = total, output = %path.display(), "Normalized rows written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn run_forecast(config: &Config, insumo: String, uf: Option<String>, mes: Option<String>) -> Result<()> {
    let service = Service::from_config(config)?;
    let response = service
        .previsao(&PrevisaoParams {
            insumo_nome: Some(insumo),
            uf,
            mes,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
