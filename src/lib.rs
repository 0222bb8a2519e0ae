pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod hub;
pub mod jwt;
pub mod notifier;
pub mod rate_limit;
pub mod reminders;

use api::create_api_router;
use auth::ReplayPolicy;
use axum::Router;
use db::Database;
use hub::{Hub, WsTimeouts};
use jwt::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS, JwtConfig};
use notifier::Notifier;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Default period of the expired refresh token purge.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default period of the due reminder scan.
pub const DEFAULT_REMINDER_INTERVAL: Duration = Duration::from_secs(60);

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Handling of refresh tokens presented after rotation
    pub replay_policy: ReplayPolicy,
    pub reaper_interval: Duration,
    pub reminder_interval: Duration,
    /// WebSocket write, pong and ping timings
    pub ws_timeouts: WsTimeouts,
}

impl ServerConfig {
    /// Config with default lifetimes and intervals.
    pub fn new(db: Database, jwt_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            db,
            jwt_secret: jwt_secret.into(),
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECS),
            replay_policy: ReplayPolicy::default(),
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            reminder_interval: DEFAULT_REMINDER_INTERVAL,
            ws_timeouts: WsTimeouts::default(),
        }
    }

    fn jwt_config(&self) -> JwtConfig {
        JwtConfig::new(
            &self.jwt_secret,
            self.access_ttl.as_secs(),
            self.refresh_ttl.as_secs(),
        )
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig, hub: &Hub) -> Router {
    let jwt = Arc::new(config.jwt_config());

    create_api_router(
        config.db.clone(),
        jwt,
        hub.clone(),
        config.replay_policy,
        config.ws_timeouts,
    )
    .layer(TraceLayer::new_for_http())
}

/// Flips the shared shutdown channel. Cloneable so it can be moved into the
/// server's shutdown future.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        // Only fails when every receiver is gone, which means nothing is left to stop
        let _ = self.0.send(true);
    }
}

/// The hub dispatcher, token reaper and reminder scanner, all stopped by one
/// shutdown channel.
pub struct BackgroundTasks {
    pub hub: Hub,
    shutdown: ShutdownHandle,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Signal shutdown and wait for every task to exit.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }
        info!("Background tasks stopped");
    }
}

/// Start the hub and the periodic jobs. Both jobs run their first cycle
/// immediately.
pub fn spawn_background_tasks(config: &ServerConfig) -> BackgroundTasks {
    let (tx, rx) = watch::channel(false);

    let (hub, hub_handle) = Hub::start(rx.clone());
    let reaper =
        cleanup::spawn_cleanup_scheduler(config.db.clone(), config.reaper_interval, rx.clone());
    let scanner = reminders::spawn_reminder_scanner(
        config.db.clone(),
        Notifier::new(config.db.clone(), hub.clone()),
        config.reminder_interval,
        rx,
    );

    BackgroundTasks {
        hub,
        shutdown: ShutdownHandle(Arc::new(tx)),
        handles: vec![
            ("hub", hub_handle),
            ("reaper", reaper),
            ("reminder-scanner", scanner),
        ],
    }
}

/// Serve `app` on `listener` until `shutdown` resolves. Peer addresses are
/// recorded for per-IP rate limiting.
pub async fn run_server(
    app: Router,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the server task, the actual address and the background tasks; the
/// server stops when the background tasks are shut down.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(JoinHandle<()>, SocketAddr, BackgroundTasks), std::io::Error> {
    let tasks = spawn_background_tasks(&config);
    let app = create_app(&config, &tasks.hub);

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let mut stop = tasks.shutdown.0.subscribe();
    let handle = tokio::spawn(async move {
        let signal = async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        };
        run_server(app, listener, signal).await.ok();
    });

    Ok((handle, local_addr, tasks))
}
