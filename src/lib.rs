//! Poll voting service for the campus portal.
//!
//! Votes go through [`ledger::VoteLedger`], which is the only code that inserts
//! vote rows or moves option counters. Reads go through [`tally::TallyReader`].
//! Both rely on the database alone for consistency, so any number of server
//! processes can share one store.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod state;
pub mod tally;

use tokio::net::TcpListener;
use tokio::signal;
use log::info;

use config::Config;
use db::Database;
use state::AppState;

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing database...");
    let database = Database::connect(&config).await?;
    let state = AppState::new(database, config.retry);

    let app = handlers::router(state);

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Server running on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
