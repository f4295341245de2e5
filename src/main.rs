use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use recurd::api::{self, AppState};
use recurd::audit::TracingAuditLog;
use recurd::config::{CliArgs, Config};
use recurd::scheduler::Scheduler;
use recurd_core::StorageBackend;
use recurd_memory::InMemoryStorage;
use recurd_sqlite::SqliteStorage;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let storage: Arc<dyn StorageBackend> = match config.storage.backend.as_str() {
        "sqlite" => {
            let storage = SqliteStorage::new(&config.storage.path).unwrap_or_else(|e| {
                eprintln!("Failed to open database {}: {}", config.storage.path, e);
                std::process::exit(1);
            });
            tracing::info!(path = %config.storage.path, "Using SQLite storage");
            Arc::new(storage)
        }
        _ => {
            tracing::info!("Using in-memory storage");
            Arc::new(InMemoryStorage::new())
        }
    };

    let audit = Arc::new(TracingAuditLog);
    let scheduler = Arc::new(Scheduler::new(storage.clone(), audit.clone()));
    let state = AppState {
        storage,
        scheduler,
        audit,
    };
    let app = api::router(state, Arc::new(config.auth.clone()));

    let addr = config.listen_addr();
    tracing::info!(%addr, "API listening");

    if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
