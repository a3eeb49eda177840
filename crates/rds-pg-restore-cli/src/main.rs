//! rds-pg-restore CLI - restore a PostgreSQL database from an RDS Parquet export.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rds_pg_restore::{
    Config, LocalSource, RestoreError, RestoreRunner, S3Source, Source,
};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "rds-pg-restore")]
#[command(about = "Restore a PostgreSQL database from an AWS RDS snapshot exported to Parquet")]
#[command(version)]
struct Cli {
    /// Path to a YAML or JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local directory with the exported snapshot (required unless --s3-bucket is given)
    #[arg(long)]
    dir: Option<String>,

    /// ARN of the S3 bucket and path of the exported snapshot
    #[arg(long = "s3-bucket")]
    s3_bucket: Option<String>,

    /// AWS access key (required when using an S3 bucket)
    #[arg(long)]
    aws_access_key: Option<String>,

    /// AWS secret key (required when using an S3 bucket)
    #[arg(long)]
    aws_secret_key: Option<String>,

    /// AWS region (required when using an S3 bucket)
    #[arg(long)]
    aws_region: Option<String>,

    /// Database instance (subfolder) in the exported snapshot to restore
    #[arg(long = "source-db")]
    source_db: Option<String>,

    /// List database instances (subfolders) in the exported cluster and exit
    #[arg(long)]
    list: bool,

    /// Truncate all tables in the destination database before loading the data
    #[arg(long)]
    truncate_all: bool,

    /// Comma-separated table names to include (with or without schema names)
    #[arg(long)]
    include_tables: Option<String>,

    /// Comma-separated table names to exclude (with or without schema names)
    #[arg(long)]
    exclude_tables: Option<String>,

    /// Comma-separated table name prefixes to ignore when missing in the
    /// destination database; useful for partitioned tables
    #[arg(long = "ignore-missing-tables")]
    ignore_missing_tables: Option<String>,

    /// Skip tables that are not empty in the target database, allowing
    /// incremental loading
    #[arg(long)]
    skip_not_empty: bool,

    /// Database host
    #[arg(long)]
    db_host: Option<String>,

    /// Database port
    #[arg(long)]
    db_port: Option<u16>,

    /// Database name
    #[arg(long)]
    db_name: Option<String>,

    /// Database username
    #[arg(long)]
    db_user: Option<String>,

    /// Database password
    #[arg(long)]
    db_password: Option<String>,

    /// Database SSL mode: disable, require, verify-ca, verify-full
    #[arg(long)]
    db_sslmode: Option<String>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Output the JSON result to stdout
    #[arg(long)]
    output_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), RestoreError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(RestoreError::Config)?;

    let config = build_config(&cli)?;
    let source = build_source(&config)?;

    let runner = RestoreRunner::new(config);

    if cli.list {
        let databases = runner.list_databases(source.as_ref())?;
        for database in databases {
            println!("{}", database);
        }
        return Ok(());
    }

    let result = runner.run(source.as_ref()).await?;

    if cli.output_json {
        println!("{}", result.to_json()?);
    } else {
        println!("\nRestore completed!");
        println!("  Run ID: {}", result.run_id);
        println!("  Duration: {:.2}s", result.duration_seconds);
        println!(
            "  Tables: {} loaded, {} skipped, {} total",
            result.tables_loaded, result.tables_skipped, result.tables_total
        );
        println!("  Rows: {}", result.rows_loaded);
        println!("  Throughput: {} rows/sec", result.rows_per_second);
    }

    Ok(())
}

/// Load the optional config file and apply the flag overrides.
fn build_config(cli: &Cli) -> Result<Config, RestoreError> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!(path = %path.display(), "loaded configuration file");
            config
        }
        None => Config::default(),
    };

    if let Some(dir) = &cli.dir {
        config.source.local_dir = Some(dir.clone());
    }
    if let Some(bucket) = &cli.s3_bucket {
        config.source.bucket_path = Some(bucket.clone());
    }
    if let Some(key) = &cli.aws_access_key {
        config.source.aws_access_key = Some(key.clone());
    }
    if let Some(secret) = &cli.aws_secret_key {
        config.source.aws_secret_key = Some(secret.clone());
    }
    if let Some(region) = &cli.aws_region {
        config.source.aws_region = Some(region.clone());
    }
    if let Some(source_db) = &cli.source_db {
        config.source.source_database = source_db.clone();
    }
    if let Some(host) = &cli.db_host {
        config.target.host = host.clone();
    }
    if let Some(port) = cli.db_port {
        config.target.port = port;
    }
    if let Some(database) = &cli.db_name {
        config.target.database = database.clone();
    }
    if let Some(user) = &cli.db_user {
        config.target.user = user.clone();
    }
    if let Some(password) = &cli.db_password {
        config.target.password = password.clone();
    }
    if let Some(ssl_mode) = &cli.db_sslmode {
        config.target.ssl_mode = ssl_mode.clone();
    }
    if let Some(tables) = &cli.include_tables {
        config.restore.include_tables = split_list(tables);
    }
    if let Some(tables) = &cli.exclude_tables {
        config.restore.exclude_tables = split_list(tables);
    }
    if let Some(prefixes) = &cli.ignore_missing_tables {
        config.restore.ignore_missing_table_prefixes = split_list(prefixes);
    }
    if cli.skip_not_empty {
        config.restore.skip_not_empty = true;
    }
    if cli.truncate_all {
        config.restore.truncate_all = true;
    }

    if cli.list {
        // Listing only needs the source; database parameters may be absent.
        if config.source.local_dir.is_none() && config.source.bucket_path.is_none() {
            return Err(RestoreError::Config(
                "an RDS export local path or remote bucket is required".to_string(),
            ));
        }
    } else {
        config.validate()?;
    }

    Ok(config)
}

fn build_source(config: &Config) -> Result<Box<dyn Source>, RestoreError> {
    match (&config.source.local_dir, &config.source.bucket_path) {
        (Some(dir), _) => {
            info!(dir = %dir, "using the local directory source");
            Ok(Box::new(LocalSource::new(dir)?))
        }
        (None, Some(bucket)) => {
            info!(bucket = %bucket, "using the S3 bucket source");
            Ok(Box::new(S3Source::new(bucket.clone())))
        }
        (None, None) => Err(RestoreError::Config(
            "an RDS export local path or remote bucket is required".to_string(),
        )),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
