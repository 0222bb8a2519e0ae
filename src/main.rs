use clap::Parser;
use carecrm::cli::{
    Args, build_config, init_logging, load_jwt_secret, open_database, should_load_dotenv,
};
use carecrm::{create_app, run_server, spawn_background_tasks};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if should_load_dotenv(std::env::var("ENV").ok().as_deref()) {
        // A missing .env file is normal outside development
        dotenvy::dotenv().ok();
    }

    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let config = build_config(&args, db, jwt_secret);
    let tasks = spawn_background_tasks(&config);
    let app = create_app(&config, &tasks.hub);

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, env = %args.environment, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    // The hub stops with the listener so open WebSockets are closed and do
    // not hold the graceful shutdown open.
    let shutdown = tasks.shutdown_handle();
    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        shutdown.trigger();
    };

    let result = run_server(app, listener, signal).await;
    tasks.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
