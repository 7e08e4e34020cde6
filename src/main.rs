use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use excel_sync::app::ports::{ConfigStorePort, DocumentStorePort};
use excel_sync::app::SyncOrchestrator;
use excel_sync::config::AppConfig;
use excel_sync::constants::{parse_column_list, DEFAULT_DOCUMENTS_TABLE, DEFAULT_TARGET_TABLE};
use excel_sync::domain::{DocumentContent, DocumentRecord, SyncConfig, TableRef};
use excel_sync::infra::{CalamineReader, SqliteConfigStore, SqliteWarehouse};
use excel_sync::observability::{self, metrics};
use excel_sync::pipeline::processing::materialize::inspect;
use excel_sync::pipeline::processing::materialize::layout::SheetSelector;

#[derive(Parser)]
#[command(name = "excel_sync")]
#[command(about = "Change-gated sync of tracked Excel files into warehouse tables")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics after the command completes
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage persisted sync configurations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run a persisted sync configuration
    Run { id: String },
    /// Run an ad-hoc configuration without persisting it
    RunOnce {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Evaluate only the change gate of a configuration
    Gate { id: String },
    /// Run only the quality audit of a configuration
    Audit {
        id: String,
        /// Required columns (comma-separated)
        #[arg(long)]
        required_columns: Option<String>,
    },
    /// Show what the tracked file would load, without writing anything
    Preview {
        id: String,
        #[arg(long, default_value_t = 10)]
        rows: usize,
        /// Show sheet names and the first rows as-is, with no header assumed
        #[arg(long)]
        raw: bool,
    },
    /// Suggest a type for each column under a chosen header row
    Analyze {
        id: String,
        /// Zero-based header row (defaults to the layout's header row)
        #[arg(long)]
        header_row: Option<usize>,
        /// Sheet to analyze (defaults to the layout's sheet)
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Manage the documents table
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create a configuration
    Add {
        id: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List all configurations
    List,
    /// Show one configuration
    Show { id: String },
    /// Delete a configuration
    Delete { id: String },
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// Store a local workbook as the newest version of a file
    Put {
        #[arg(long)]
        catalog: String,
        #[arg(long)]
        schema: String,
        #[arg(long, default_value = DEFAULT_DOCUMENTS_TABLE)]
        table: String,
        /// Workbook on disk
        #[arg(long)]
        file: PathBuf,
        /// Name stored in the documents table (defaults to the file's name)
        #[arg(long)]
        name: Option<String>,
        /// RFC 3339 modification time (defaults to the file's mtime)
        #[arg(long)]
        last_modified: Option<String>,
    },
}

#[derive(clap::Args)]
struct TargetArgs {
    #[arg(long)]
    catalog: String,
    #[arg(long)]
    schema: String,
    #[arg(long)]
    file_name: String,
    #[arg(long, default_value = DEFAULT_DOCUMENTS_TABLE)]
    documents_table: String,
    #[arg(long, default_value = DEFAULT_TARGET_TABLE)]
    target_table: String,
}

impl TargetArgs {
    fn into_config(self, id: &str) -> SyncConfig {
        SyncConfig::new(id, &self.catalog, &self.schema, &self.file_name)
            .with_documents_table(&self.documents_table)
            .with_target_table(&self.target_table)
    }
}

struct Services {
    warehouse: Arc<SqliteWarehouse>,
    configs: SqliteConfigStore,
    orchestrator: SyncOrchestrator,
}

impl Services {
    fn open(config: &AppConfig) -> anyhow::Result<Self> {
        let db_path = &config.warehouse.database_path;
        let warehouse = Arc::new(
            SqliteWarehouse::open(db_path)
                .with_context(|| format!("opening warehouse {}", db_path.display()))?,
        );
        let configs = SqliteConfigStore::open(db_path)?;
        let orchestrator = SyncOrchestrator::from_ports(
            warehouse.clone(),
            warehouse.clone(),
            Arc::new(CalamineReader::new()),
            config.layout.clone(),
            config.quality.required_columns.clone(),
        );
        Ok(Self {
            warehouse,
            configs,
            orchestrator,
        })
    }

    async fn require_config(&self, id: &str) -> anyhow::Result<SyncConfig> {
        match self.configs.get(id).await? {
            Some(config) => Ok(config),
            None => bail!("Configuration '{}' not found", id),
        }
    }

    async fn require_document(&self, config: &SyncConfig) -> anyhow::Result<DocumentRecord> {
        let docs = config.documents_ref()?;
        match self.warehouse.latest_document(&docs, &config.file_name).await? {
            Some(document) => Ok(document),
            None => bail!("Excel file {} not found in {}", config.file_name, docs),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn file_mtime(path: &Path) -> anyhow::Result<DateTime<Utc>> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

async fn execute(command: Commands, services: &Services) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => match action {
            ConfigAction::Add { id, target } => {
                let config = target.into_config(&id);
                services.configs.create(&config).await?;
                print_json(&config)?;
            }
            ConfigAction::List => print_json(&services.configs.list().await?)?,
            ConfigAction::Show { id } => print_json(&services.require_config(&id).await?)?,
            ConfigAction::Delete { id } => {
                if !services.configs.delete(&id).await? {
                    bail!("Configuration '{}' not found", id);
                }
                print_json(&json!({ "message": "Configuration deleted successfully" }))?;
            }
        },
        Commands::Run { id } => {
            let result = services
                .orchestrator
                .run_by_id(&services.configs, &id)
                .await?;
            print_json(&result)?;
        }
        Commands::RunOnce { target } => {
            let id = format!("{}.{}.{}", target.catalog, target.schema, target.target_table);
            let config = target.into_config(&id);
            config.validate()?;
            print_json(&services.orchestrator.run(&config).await)?;
        }
        Commands::Gate { id } => {
            let config = services.require_config(&id).await?;
            print_json(&services.orchestrator.gate().evaluate(&config).await)?;
        }
        Commands::Audit { id, required_columns } => {
            let config = services.require_config(&id).await?;
            let auditor = services.orchestrator.auditor();
            let report = match required_columns {
                Some(list) => auditor.audit_with(&config, &parse_column_list(&list)).await,
                None => auditor.audit(&config).await,
            };
            print_json(&report)?;
        }
        Commands::Preview { id, rows, raw: true } => {
            let config = services.require_config(&id).await?;
            let document = services.require_document(&config).await?;
            let materializer = services.orchestrator.materializer();
            let sheets = materializer.sheet_names(&document)?;
            let selector = materializer.layout().selector();
            let grid = materializer.read_grid(&document, &selector)?;
            let raw_data = inspect::raw_rows(&grid, rows);
            let selected = match &selector {
                SheetSelector::Named(name) => Some(name.clone()),
                SheetSelector::First => sheets.first().cloned(),
            };
            let column_count = if raw_data.is_empty() { 0 } else { grid.width() };
            print_json(&json!({
                "file_path": document.file_name,
                "sheets": sheets,
                "selected_sheet": selected,
                "raw_data": raw_data,
                "total_rows": raw_data.len(),
                "column_count": column_count,
                "recommended_table_name": inspect::recommended_table_name(&document.file_name),
            }))?;
        }
        Commands::Preview { id, rows, raw: false } => {
            let config = services.require_config(&id).await?;
            let document = services.require_document(&config).await?;
            let load = services.orchestrator.materializer().prepare(&document)?;
            let sample: Vec<Vec<String>> = load
                .rows
                .iter()
                .take(rows)
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect();
            print_json(&json!({
                "file_name": document.file_name,
                "last_modified": document.last_modified,
                "supplier_id": load.supplier_id,
                "columns": load.columns,
                "total_rows": load.rows.len(),
                "sample_rows": sample,
                "content_sha256": load.content_sha256,
            }))?;
        }
        Commands::Analyze {
            id,
            header_row,
            sheet,
        } => {
            let config = services.require_config(&id).await?;
            let document = services.require_document(&config).await?;
            let materializer = services.orchestrator.materializer();
            let selector = match sheet {
                Some(name) => SheetSelector::Named(name),
                None => materializer.layout().selector(),
            };
            let header_row = header_row.unwrap_or(materializer.layout().header_row as usize);
            let grid = materializer.read_grid(&document, &selector)?;
            print_json(&inspect::analyze_columns(&grid, header_row)?)?;
        }
        Commands::Documents { action } => match action {
            DocumentsAction::Put {
                catalog,
                schema,
                table,
                file,
                name,
                last_modified,
            } => {
                let table_ref = TableRef::new(&catalog, &schema, &table)?;
                let bytes = std::fs::read(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let name = match name {
                    Some(n) => n,
                    None => file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .context("file path has no file name")?,
                };
                let last_modified = match last_modified {
                    Some(raw) => DateTime::parse_from_rfc3339(&raw)
                        .with_context(|| format!("invalid --last-modified '{}'", raw))?
                        .with_timezone(&Utc),
                    None => file_mtime(&file)?,
                };
                services.warehouse.put_document(
                    &table_ref,
                    &name,
                    &last_modified,
                    &DocumentContent::Binary(bytes),
                )?;
                info!("Stored {} in {}", name, table_ref);
                print_json(&json!({
                    "file_name": name,
                    "table": table_ref.to_string(),
                    "last_modified": last_modified,
                }))?;
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let _log_guard = observability::init_logging(&config.logging.directory)?;

    if cli.print_metrics {
        if let Err(e) = metrics::init() {
            error!("Metrics disabled: {}", e);
        }
    }

    let services = Services::open(&config)?;
    let outcome = execute(cli.command, &services).await;

    if cli.print_metrics {
        if let Some(rendered) = metrics::render() {
            println!("{}", rendered);
        }
    }
    outcome
}
