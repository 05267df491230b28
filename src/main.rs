use campus_polls::config::Config;
use log::error;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Config::from_env also loads .env, but RUST_LOG may live there too
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = campus_polls::start_server(config).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
