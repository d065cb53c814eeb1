//! Mimic CLI
//!
//! Generate sample payloads from schemas, validate payloads, and run workflows.
//!
//! Usage:
//!   mimic generate api.yaml --pointer /components/schemas/Pet --seed 7
//!   mimic validate payload.json --schema pet.json
//!   mimic run workflows.yaml --http "POST /orders/1"
//!   mimic schedule workflows.yaml

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use mimic::config::{file_url, FileReader, Reader, WorkflowFile};
use mimic::schema::{RegistryBuilder, SchemaId, SchemaRegistry};
use mimic::workflow::{Event, RunOptions, Runtime, Scheduler};
use mimic::{GenerationRequest, Generator, GeneratorOptions, MediaType, SchemaHandle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mimic")]
#[command(author, version, about = "Schema-driven API mocking toolkit")]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "MIMIC_LOG_LEVEL")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a sample payload for a schema
    Generate {
        /// Schema or OpenAPI document (YAML or JSON)
        schema: PathBuf,

        /// JSON pointer of the schema inside the document
        #[arg(long, short, default_value = "")]
        pointer: String,

        /// Media type of the output
        #[arg(long, short, default_value = "application/json")]
        media: String,

        /// Seed for reproducible output
        #[arg(long, short)]
        seed: Option<u64>,

        /// Depth at which recursive objects and arrays stop
        #[arg(long, default_value = "8")]
        max_depth: usize,

        /// Property name hint for the root value
        #[arg(long)]
        name: Option<String>,
    },

    /// Decode a payload and validate it against a schema
    Validate {
        /// Payload file
        payload: PathBuf,

        /// Schema or OpenAPI document (YAML or JSON)
        #[arg(long)]
        schema: PathBuf,

        /// JSON pointer of the schema inside the document
        #[arg(long, short, default_value = "")]
        pointer: String,

        /// Media type of the payload
        #[arg(long, short, default_value = "application/json")]
        media: String,
    },

    /// Run workflows matching one event and print the summary as JSON
    Run {
        /// Workflow files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// HTTP event as "METHOD /path"
        #[arg(long, conflicts_with_all = ["smtp", "workflow"])]
        http: Option<String>,

        /// SMTP event recipient address
        #[arg(long, conflicts_with = "workflow")]
        smtp: Option<String>,

        /// Start a workflow by name
        #[arg(long)]
        workflow: Option<String>,

        /// Abort the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Register schedule triggers and run until interrupted
    Schedule {
        /// Workflow files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let result = match cli.command {
        Commands::Generate {
            schema,
            pointer,
            media,
            seed,
            max_depth,
            name,
        } => run_generate(&schema, &pointer, &media, seed, max_depth, name),
        Commands::Validate {
            payload,
            schema,
            pointer,
            media,
        } => run_validate(&payload, &schema, &pointer, &media),
        Commands::Run {
            files,
            http,
            smtp,
            workflow,
            timeout,
        } => run_workflows(&files, http, smtp, workflow, timeout).await,
        Commands::Schedule { files } => run_schedule(&files).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Schema commands
// ============================================================================

fn load_schema(path: &Path, pointer: &str) -> anyhow::Result<(SchemaRegistry, SchemaId)> {
    let url = file_url(path)?;
    let reader = FileReader::new();
    let document = reader.read(&url)?;
    let mut builder = RegistryBuilder::new();
    let key = builder.load_document(url.as_str(), document.value)?;
    let id = builder
        .schema_at(key.as_str(), pointer)
        .with_context(|| format!("No schema at '{}' in {}", pointer, path.display()))?;
    builder.link(&reader)?;
    Ok((builder.build(), id))
}

fn run_generate(
    path: &Path,
    pointer: &str,
    media: &str,
    seed: Option<u64>,
    max_depth: usize,
    name: Option<String>,
) -> anyhow::Result<ExitCode> {
    let media = MediaType::parse(media)?;
    let (registry, id) = load_schema(path, pointer)?;
    let options = GeneratorOptions {
        seed,
        max_depth,
        ..GeneratorOptions::default()
    };
    let mut generator = Generator::new(&registry, options);
    info!("Generating with seed {}", generator.seed());

    let mut request = GenerationRequest::new(id);
    if let Some(name) = name {
        request = request.named(name);
    }
    let value = generator.generate(&request)?;
    let bytes = SchemaHandle::new(&registry, Some(id)).marshal(&value, &media)?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(ExitCode::SUCCESS)
}

fn run_validate(payload: &Path, path: &Path, pointer: &str, media: &str) -> anyhow::Result<ExitCode> {
    let media = MediaType::parse(media)?;
    let (registry, id) = load_schema(path, pointer)?;
    let body =
        std::fs::read(payload).with_context(|| format!("Failed to read payload {}", payload.display()))?;
    match SchemaHandle::new(&registry, Some(id)).unmarshal(&body, &media) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("invalid payload: {}", e);
            Ok(ExitCode::from(2))
        }
    }
}

// ============================================================================
// Workflow commands
// ============================================================================

fn load_workflows(files: &[PathBuf]) -> anyhow::Result<Vec<(String, WorkflowFile)>> {
    files
        .iter()
        .map(|path| Ok((path.display().to_string(), WorkflowFile::from_file(path)?)))
        .collect()
}

fn parse_event(http: Option<String>, smtp: Option<String>, workflow: Option<String>) -> anyhow::Result<Event> {
    if let Some(http) = http {
        let Some((method, path)) = http.trim().split_once(char::is_whitespace) else {
            bail!("Expected --http \"METHOD /path\", got '{}'", http);
        };
        return Ok(Event::http(method, path.trim()));
    }
    if let Some(recipient) = smtp {
        return Ok(Event::Smtp { recipient });
    }
    match workflow {
        Some(workflow) => Ok(Event::Manual { workflow }),
        None => bail!("One of --http, --smtp or --workflow is required"),
    }
}

async fn run_workflows(
    files: &[PathBuf],
    http: Option<String>,
    smtp: Option<String>,
    workflow: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let event = parse_event(http, smtp, workflow)?;
    let workflows: Vec<_> = load_workflows(files)?
        .into_iter()
        .flat_map(|(_, file)| file.workflows)
        .collect();

    let mut options = RunOptions::default();
    if let Some(seconds) = timeout {
        options = options.with_deadline(Duration::from_secs(seconds));
    }
    let summary = Runtime::new().dispatch(&workflows, event, options).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.workflows.is_empty() {
        info!("No workflow matched the event");
    }
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_schedule(files: &[PathBuf]) -> anyhow::Result<ExitCode> {
    let scheduler = Scheduler::new(Arc::new(Runtime::new()));
    let mut total = 0;
    for (key, file) in load_workflows(files)? {
        total += scheduler.replace(&key, &file.workflows)?;
    }
    if total == 0 {
        bail!("No schedule triggers found");
    }
    info!("Scheduler running {} jobs, press Ctrl-C to stop", total);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    scheduler.shutdown().await;
    Ok(ExitCode::SUCCESS)
}
