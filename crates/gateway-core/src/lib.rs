//! The gateway runtime: authentication, rate limiting, connection
//! lifecycle, and the streaming generation multiplexer (C2-C7).

mod challenge;
mod connection;
mod error;
mod generation;
mod rate_limit;
mod server;
mod signature;
mod time;
mod upstream;
mod ws;

use std::{sync::Arc, time::Duration};

use gateway_config::GatewayConfig;
use gateway_registry::ClientRegistry;
use tokio::sync::broadcast;

pub use challenge::ChallengeStore;
pub use connection::{Connection, ConnectionManager, ConnectionState, SharedConnectionManager};
pub use error::CoreError;
pub use generation::{Generation, GenerationTable, StopOutcome};
pub use rate_limit::{CheckResult, RateLimiter};
pub use server::{build_app, health_handler};
pub use upstream::{UpstreamClient, UpstreamEvent};

/// Interval at which [`GatewayState::await_drain`] polls the connection count.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared state for one running gateway instance, constructed once at
/// startup and handed to every connection task (§9 "no global singletons").
pub struct GatewayState {
    pub registry: Arc<ClientRegistry>,
    pub challenges: ChallengeStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub connections: Arc<ConnectionManager>,
    pub generations: Arc<GenerationTable>,
    pub upstream: Arc<UpstreamClient>,
    pub config: GatewayConfig,
    shutdown: broadcast::Sender<()>,
}

impl GatewayState {
    pub fn new(registry: Arc<ClientRegistry>, config: GatewayConfig) -> Arc<Self> {
        let upstream = Arc::new(UpstreamClient::new(config.ollama_api_url.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.max_auth_attempts,
            std::time::Duration::from_millis(config.auth_window_ms),
        ));
        let (shutdown, _) = broadcast::channel(16);
        Arc::new(Self {
            registry,
            challenges: ChallengeStore::new(),
            rate_limiter,
            connections: Arc::new(ConnectionManager::new()),
            generations: Arc::new(GenerationTable::new()),
            upstream,
            config,
            shutdown,
        })
    }

    /// Subscribe to the shutdown broadcast; every live connection holds one
    /// of these (§5 "broadcasts close to live connections").
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Tell every live connection to close with `server_shutdown`.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Poll until every connection has torn down or `timeout` elapses (§5
    /// "waits for in-flight teardowns before exit").
    pub async fn await_drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.connections.count().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
