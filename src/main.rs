//! nested-tx
//!
//! Runs SQL statements as nested units of work inside one outermost
//! transaction: they commit together or not at all.
//!
//! ```sh
//! # Validate config (~/.config/nested-tx/config.toml) and exit
//! nested-tx --check
//!
//! # Two statements, one transaction
//! nested-tx --database-url "sqlite://./app.db?mode=rwc" \
//!     -e "INSERT INTO accounts (owner, balance) VALUES ('alice', 100)" \
//!     -e "UPDATE accounts SET balance = balance - 10 WHERE owner = 'alice'"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use uuid::Uuid;

use nested_tx::config::AppConfig;
use nested_tx::infrastructure::logging::{self, init_tracing};
use nested_tx::{
    default_config_path, AppError, AppResult, Context, DatabaseConfig, SeaOrmSessionProvider,
    TransactionManager,
};

/// Run SQL statements inside one nested transaction chain.
#[derive(Parser, Debug)]
#[command(
    name = "nested-tx",
    version,
    about = "Run SQL statements as nested units of work in one transaction",
    long_about = "Every -e statement runs as a nested unit of work inside one outermost \
                  transaction. A failing statement rolls back all of them.\n\n\
                  Default config: ~/.config/nested-tx/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "NESTED_TX_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database URL.
    #[arg(long)]
    database_url: Option<String>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit.
    #[arg(long)]
    check: bool,

    /// SQL statement to execute. Repeatable; runs in order.
    #[arg(short = 'e', long = "execute", value_name = "SQL")]
    execute: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let (config, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    let mut config = config.with_env_overrides();

    // ── Apply CLI overrides ────────────────────────────────────
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }
    match &load_error {
        None => info!("Configuration loaded from {}", config_path.display()),
        Some(e) => {
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
        }
    }

    // ── Config validation mode ─────────────────────────────────
    if cli.check {
        if load_error.is_some() {
            return ExitCode::FAILURE;
        }
        println!("Configuration is valid");
        println!("   Config file       : {}", config_path.display());
        println!("   Database          : {}", config.database.url);
        println!("   Log level         : {}", config.logging.level);
        println!("   Swallowed failure : {:?}", config.transaction.swallowed_failure);
        return ExitCode::SUCCESS;
    }

    // ── Database ───────────────────────────────────────────────
    let provider = match SeaOrmSessionProvider::connect(&DatabaseConfig::from(&config.database)).await {
        Ok(provider) => provider,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let manager = TransactionManager::new(provider, config.transaction.swallowed_failure);

    let result = run_statements(&manager, &cli.execute).await;

    if let Err(e) = manager.close().await {
        warn!("Failed to close database: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Transaction rolled back");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_statements(
    manager: &TransactionManager<SeaOrmSessionProvider>,
    statements: &[String],
) -> AppResult<()> {
    if statements.is_empty() {
        info!("Nothing to execute");
        return Ok(());
    }

    let trace_id = Uuid::new_v4().to_string();
    let ctx = logging::with_trace_id(&Context::background(), trace_id.clone());
    let ctx = logging::with_span(&ctx, tracing::info_span!("execute", trace_id = %trace_id));

    let nested = manager.clone();
    manager
        .run_nested(&ctx, |ctx, _session| async move {
            for (index, sql) in statements.iter().enumerate() {
                let rows = nested
                    .run_nested(&ctx, |_ctx, session| async move {
                        let result = session.execute_unprepared(sql).await?;
                        Ok::<_, AppError>(result.rows_affected())
                    })
                    .await?;
                println!("[{}] {} row(s) affected", index + 1, rows);
            }
            Ok(())
        })
        .await
}
