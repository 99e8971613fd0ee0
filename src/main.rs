//! graphgate - HTTP gateway for the graphrag command-line tool.
//!
//! Usage:
//!   graphgate serve               Serve the HTTP API
//!   graphgate init <name>         Create a knowledge base
//!   graphgate index <name>        Index a knowledge base and wait for it
//!   graphgate query <name> <text> Query an indexed knowledge base

use clap::{Args, Parser, Subcommand};
use graphgate::api::{ApiConfig, create_api_state, start_server};
use graphgate::{
    Gateway, GatewayConfig, IndexRequest, InitRequest, QueryRequest, StreamEvent, TaskStatus,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// graphgate - HTTP gateway for the graphrag command-line tool
#[derive(Parser)]
#[command(name = "graphgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to a graphgate YAML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the knowledge bases
    #[arg(long, global = true, env = "KB_ROOT", value_name = "DIR")]
    kb_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Maximum concurrent graphrag processes
        #[arg(short = 'j', long)]
        max_jobs: Option<usize>,
    },

    /// Create a knowledge base and run `graphrag init` in it
    Init {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Index a knowledge base and wait for the result
    Index {
        #[arg(value_name = "NAME")]
        name: String,

        #[arg(long)]
        verbose: bool,

        /// Do not use the LLM cache
        #[arg(long)]
        nocache: bool,

        /// Resume the given run
        #[arg(long, value_name = "TIMESTAMP")]
        resume: Option<String>,

        #[arg(long, default_value = "rich")]
        reporter: String,

        /// Artifact formats to emit
        #[arg(long, value_delimiter = ',', default_value = "parquet")]
        emit: Vec<String>,
    },

    /// Query an indexed knowledge base
    Query {
        #[arg(value_name = "NAME")]
        name: String,

        #[arg(value_name = "TEXT")]
        text: String,

        /// Search method
        #[arg(short, long, default_value = "global")]
        method: String,

        #[arg(long)]
        community_level: Option<u32>,

        /// Print the answer as it is produced
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.common)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            max_jobs,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(max) = max_jobs {
                config.limits.max_concurrent_jobs = max;
            }
            config.validate()?;
            serve(config).await?;
        }
        Commands::Init { name } => {
            let gateway = open_gateway(&config)?;
            gateway.init(&InitRequest::new(name.as_str())).await?;
            info!("Knowledge base '{}' initialised", name);
        }
        Commands::Index {
            name,
            verbose,
            nocache,
            resume,
            reporter,
            emit,
        } => {
            let gateway = open_gateway(&config)?;
            let req = IndexRequest {
                verbose,
                nocache,
                resume,
                reporter,
                emit,
                ..IndexRequest::new(name)
            };
            index(&gateway, &req).await?;
        }
        Commands::Query {
            name,
            text,
            method,
            community_level,
            stream,
        } => {
            let gateway = open_gateway(&config)?;
            let mut req = QueryRequest::new(name, text, method);
            req.community_level = community_level;
            query(&gateway, &req, stream).await?;
        }
    }

    Ok(())
}

fn load_config(common: &CommonArgs) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut config = match &common.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            GatewayConfig::from_file(path)?
        }
        None => GatewayConfig::default(),
    };
    if let Some(kb_root) = &common.kb_root {
        config.kb_root = kb_root.clone();
    }
    Ok(config)
}

fn open_gateway(config: &GatewayConfig) -> std::io::Result<Gateway> {
    let gateway = Gateway::new(config);
    gateway.knowledge_bases().ensure_root()?;
    Ok(gateway)
}

/// Serve the HTTP API until Ctrl+C.
async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = open_gateway(&config)?;
    info!(
        "Knowledge bases under {} (max {} concurrent jobs)",
        config.kb_root.display(),
        config.limits.max_concurrent_jobs
    );

    let server = start_server(
        ApiConfig::from(&config.server),
        create_api_state(gateway.clone()),
    )
    .await?;
    info!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
        result = server => {
            if let Err(e) = result {
                error!("API server task failed: {}", e);
            }
        }
    }

    gateway.shutdown().await;
    info!("Goodbye!");
    Ok(())
}

/// Submit an index job and poll it to completion.
async fn index(gateway: &Gateway, req: &IndexRequest) -> Result<(), Box<dyn std::error::Error>> {
    let task_id = gateway.submit_index(req)?;
    info!("Indexing '{}' (task: {})", req.root, task_id);

    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling index job");
                gateway.shutdown().await;
                break gateway.index_status(&task_id);
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let status = gateway.index_status(&task_id);
                if status.is_terminal() {
                    break status;
                }
            }
        }
    };

    match status {
        TaskStatus::Succeeded => {
            info!("Index of '{}' succeeded", req.root);
            Ok(())
        }
        TaskStatus::Failed(reason) => {
            error!("Index of '{}' failed: {}", req.root, reason);
            Err(reason.into())
        }
        other => Err(format!("index job ended in state '{}'", other.as_str()).into()),
    }
}

/// Run a query and print the answer.
async fn query(
    gateway: &Gateway,
    req: &QueryRequest,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !stream {
        println!("{}", gateway.query(req).await?);
        return Ok(());
    }

    let mut events = gateway.query_stream(req).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next_event().await {
        match event {
            StreamEvent::Delta(text) => {
                writeln!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            StreamEvent::Error(reason) => return Err(reason.into()),
            StreamEvent::Done => break,
        }
    }
    Ok(())
}
