use anyhow::Context;
use clap::Parser;
use sessiongate::{
    AppState, DisconnectCallback, GatewayConfig, HttpWebhookDelivery, InMemoryInstanceRepository,
    RateLimitScope, RateLimiter, WatchdogSupervisor, WebhookQueue, WebhookWorkerPool,
    build_router, connect_store,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Multi-tenant messaging session gateway
#[derive(Debug, Parser)]
#[command(name = "sessiongate", version, about)]
struct Cli {
    /// HTTP listen address (overrides SESSIONGATE_LISTEN)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Redis URL for cross-process coordination (overrides SESSIONGATE_REDIS_URL)
    #[arg(long)]
    redis_url: Option<String>,

    /// Number of webhook delivery workers
    #[arg(long)]
    workers: Option<usize>,

    /// Skip IP rate limiting for private and loopback addresses
    #[arg(long)]
    skip_private_ips: bool,

    /// Take client addresses from X-Forwarded-For / X-Real-IP (only behind a trusted proxy)
    #[arg(long)]
    trust_forwarded_headers: bool,

    /// Disable both rate limiters
    #[arg(long)]
    no_rate_limit: bool,
}

impl Cli {
    fn apply(self, mut config: GatewayConfig) -> GatewayConfig {
        if let Some(addr) = self.listen {
            config = config.listen_addr(addr);
        }
        if let Some(url) = self.redis_url {
            config = config.redis_url(&url);
        }
        if let Some(workers) = self.workers {
            config = config.webhook_workers(workers);
        }
        if self.skip_private_ips {
            config.ip_rate_limit.skip_private_ips = true;
        }
        if self.trust_forwarded_headers {
            config.ip_rate_limit.trust_forwarded_headers = true;
        }
        if self.no_rate_limit {
            config.ip_rate_limit.enabled = false;
            config.token_rate_limit.enabled = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().apply(GatewayConfig::from_env()?);
    config.validate()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store = connect_store(&config.redis, shutdown_rx.clone()).await?;
    let instances = Arc::new(InMemoryInstanceRepository::new());
    let queue = WebhookQueue::new(Arc::clone(&store), config.webhook.queue_key.clone());

    let on_disconnect: DisconnectCallback = Arc::new(|instance_id: &str| {
        warn!(instance_id = %instance_id, "instance disconnected, session needs reconnect");
    });
    let watchdogs = Arc::new(
        WatchdogSupervisor::new(instances.clone(), config.watchdog.poll_interval)
            .with_on_disconnect(on_disconnect),
    );

    let delivery = HttpWebhookDelivery::new(instances.clone(), config.webhook.delivery_timeout)?;
    let workers = WebhookWorkerPool::new(
        queue.clone(),
        Arc::new(delivery),
        config.webhook.workers,
        config.webhook.dequeue_timeout,
    )
    .spawn(shutdown_rx);

    let state = AppState {
        instances,
        queue,
        watchdogs: Arc::clone(&watchdogs),
        ip_limiter: Arc::new(RateLimiter::new(
            Arc::clone(&store),
            RateLimitScope::Ip,
            config.ip_rate_limit.clone(),
        )),
        token_limiter: Arc::new(RateLimiter::new(
            store,
            RateLimitScope::Token,
            config.token_rate_limit.clone(),
        )),
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, workers = config.webhook.workers, "gateway listening");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await
    .context("http server")?;

    let _ = shutdown_tx.send(true);
    watchdogs.stop_all().await;
    if let Err(err) = workers.await {
        warn!(error = %err, "webhook worker pool ended abnormally");
    }
    info!("gateway stopped");
    Ok(())
}
