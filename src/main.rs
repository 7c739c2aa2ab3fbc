//! bucketfs command-line front end.
//!
//! Runs one file manager command (or a bucket administration task) against
//! the configured object store and prints the JSON result on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use bucketfs::audit::TracingAuditSink;
use bucketfs::buckets::BucketAdmin;
use bucketfs::config::{load_config, Config, ConnectionConfig, LayeredSource, LoggingConfig};
use bucketfs::dispatcher::{CommandRequest, ConnectorSettings, Dispatcher, UploadedFile};
use bucketfs::pool::{ClientPool, PoolSettings};
use bucketfs::storage::factory;
use bucketfs::vfs::BucketFs;
use clap::{Parser, Subcommand};
use tracing::info;

/// Command-line arguments for bucketfs.
#[derive(Parser, Debug)]
#[command(
    name = "bucketfs",
    version,
    about = "Filesystem view over S3-compatible object stores"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bucket to operate on.
    #[arg(short, long, global = true)]
    bucket: Option<String>,

    /// User id recorded in audit entries.
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Override a connection setting, e.g. `--set bucketfs.endpoint=http://host:9000`.
    #[arg(long = "set", value_parser = parse_key_value, global = true)]
    overrides: Vec<(String, String)>,

    /// Print Prometheus metrics to stderr before exiting.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a file manager command (open, ls, mkdir, upload, ...).
    Run {
        cmd: String,

        /// Target node id.
        #[arg(short, long)]
        target: Option<String>,

        /// Additional target ids (for rm).
        #[arg(long)]
        targets: Vec<String>,

        /// Command parameter as key=value.
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,

        /// Local file to upload.
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },
    /// Create a bucket.
    MakeBucket { name: String },
    /// Delete a bucket.
    RemoveBucket {
        name: String,

        /// Delete every object in the bucket first.
        #[arg(long)]
        force: bool,
    },
    /// List buckets.
    Buckets,
    /// Connect, probe the store and print pool statistics.
    Stats,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    Ok((key.trim().to_string(), value.to_string()))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    if cli.metrics {
        bucketfs::metrics::init_metrics()?;
    }

    let mut source = LayeredSource::new().with_file_layer(config.store.to_layer());
    for (key, value) in &cli.overrides {
        source.set_override(key.clone(), value.clone());
    }
    let connection = ConnectionConfig::from_source(&source)?;
    info!("Store connection: {}", connection);

    let pool = ClientPool::new(
        factory::for_backend(&config.store.backend)?,
        PoolSettings::from(&config.pool),
    );

    let output = match cli.command {
        Command::Run {
            cmd,
            target,
            targets,
            params,
            files,
        } => {
            let bucket = cli
                .bucket
                .ok_or_else(|| anyhow::anyhow!("--bucket is required for 'run'"))?;
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow::anyhow!("invalid upload path {}", path.display()))?;
                uploads.push(UploadedFile {
                    name: name.to_string(),
                    data: tokio::fs::read(path).await?.into(),
                });
            }

            let fs = BucketFs::new(pool.get(&connection).await?, bucket)?;
            let dispatcher = Dispatcher::new(fs, ConnectorSettings::from_config(&config.connector)?)
                .with_audit(Arc::new(TracingAuditSink));
            let request = CommandRequest {
                cmd,
                target,
                targets,
                params: params.into_iter().collect(),
                uploads,
                user_id: cli.user,
            };
            serde_json::Value::Object(dispatcher.run(request).await)
        }
        Command::MakeBucket { name } => {
            BucketAdmin::new(pool.get(&connection).await?)
                .create_bucket(&name)
                .await?;
            serde_json::json!({ "created": name })
        }
        Command::RemoveBucket { name, force } => {
            BucketAdmin::new(pool.get(&connection).await?)
                .delete_bucket(&name, force)
                .await?;
            serde_json::json!({ "removed": name })
        }
        Command::Buckets => {
            let buckets = BucketAdmin::new(pool.get(&connection).await?)
                .list_buckets()
                .await?;
            serde_json::json!({ "buckets": buckets })
        }
        Command::Stats => {
            let reachable = pool.warmup(&connection).await;
            serde_json::json!({
                "endpoint": connection.endpoint(),
                "reachable": reachable,
                "pool": pool.stats().await,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    if cli.metrics {
        if let Some(text) = bucketfs::metrics::render() {
            eprintln!("{text}");
        }
    }
    Ok(())
}
