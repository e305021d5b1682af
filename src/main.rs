use chrono::Utc;
use pr_bench::api;
use pr_bench::db::{self, SqlJobStore};
use pr_bench::dispatch::Dispatcher;
use pr_bench::logging::{FileLogger, setup_logging};
use pr_bench::orchestrator::RunOrchestrator;
use pr_bench::{AppState, load_config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{self, error, info};

const DEFAULT_CONFIG_PATH: &str = "bench_config.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path = PathBuf::from(
        std::env::var("BENCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    let config = match load_config(&config_path) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(FileLogger::new);
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let pool = match db::init_db(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let job_store = SqlJobStore::new(pool);

    let orchestrator = match RunOrchestrator::new(Arc::clone(&config), job_store.clone()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let dispatcher = Dispatcher::new(
        orchestrator,
        job_store.clone(),
        config.runner.max_concurrent_jobs,
    );

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        job_store,
        dispatcher,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    let app = api::router(state);

    info!("Listening on {}", config.bind_address);
    info!("Using config at {:?}", config_path);
    info!("Serving results from {}", config.runs_dir().display());
    let listener = match tokio::net::TcpListener::bind(&config.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
