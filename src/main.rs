use clap::Parser;
use cutout_relay::api::middleware::request_id::REQUEST_ID_HEADER;
use cutout_relay::config::RelayConfig;
use cutout_relay::infrastructure::{engine, storage};
use cutout_relay::services::cleanup::CleanupScheduler;
use cutout_relay::services::pipeline::Pipeline;
use cutout_relay::{AppState, create_app};
use dotenvy::dotenv;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3333)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cutout_relay=info,tower_http=info,metrics=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Cutout Relay...");

    let config = RelayConfig::from_env();
    info!(
        "⚙️  Config: Max Size={}MB, Engine={} ({}), Timeout={}s, Cleanup after {}s",
        config.max_file_size / 1024 / 1024,
        config.engine_type,
        config.engine_url,
        config.engine_timeout_secs,
        config.cleanup_delay_secs
    );

    // 2. Setup Infrastructure
    let storage = storage::setup_storage(&config).await?;
    let engine = engine::setup_engine(&config).await?;

    // 3. Setup Graceful Shutdown Channel & Cleanup Worker
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (cleanup, worker) = CleanupScheduler::new(config.cleanup_delay(), shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());
    info!("👷 Cleanup worker initialized.");

    // 4. Initialize API Service
    let pipeline = Arc::new(Pipeline::new(storage, engine, cleanup, &config));
    let state = AppState {
        pipeline,
        config: config.clone(),
    };

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Server running at http://{}", addr);
    info!("📖 Swagger UI documentation: http://{}/swagger-ui", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    // 5. Stop the cleanup worker; it deletes whatever is still queued
    info!("🛑 Shutting down relay...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        error!("❌ Cleanup worker ended abnormally: {}", e);
    }

    info!("👋 Relay exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
