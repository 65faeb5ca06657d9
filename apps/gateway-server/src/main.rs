use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use gateway_config::GatewayConfig;
use gateway_core::GatewayState;
use gateway_registry::ClientRegistry;

/// How long to wait for live connections to tear down after a shutdown
/// signal before giving up and letting the listener close anyway (§5).
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn init_telemetry(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = GatewayConfig::from_env()?;
    init_telemetry(&config.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");

    let registry = Arc::new(ClientRegistry::new(&config.data_dir));
    registry.load().await?;

    let addr: SocketAddr = config.bind_addr().parse()?;
    let state = GatewayState::new(registry, config);
    let gc_handle = Arc::clone(&state.rate_limiter).spawn_gc();

    let app = gateway_core::build_app(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, protocol = gateway_protocol::PROTOCOL_VERSION, "listening");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)));

    serve.await?;
    gc_handle.abort();
    Ok(())
}

/// Waits for SIGINT/SIGTERM, then broadcasts `server_shutdown` to every live
/// WebSocket connection and waits for them to tear down before returning —
/// axum's own graceful shutdown only stops the listener, it never touches
/// already-upgraded connections (§5).
async fn shutdown_signal(state: Arc<GatewayState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, broadcasting close to live connections");

    state.request_shutdown();
    state.await_drain(SHUTDOWN_DRAIN_TIMEOUT).await;
}
