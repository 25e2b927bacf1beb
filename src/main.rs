use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_bridge::{
    agent::{AgentQueue, AgentRpcClient},
    broker::BrokerClient,
    config::Config,
    crypto::CryptoContext,
    health::HealthRecorder,
    local_api::local_api_router,
    logbuf::{LogBuffer, LogBufferLayer, DEFAULT_LOG_CAPACITY},
    outbound::OutboundClient,
    pipeline::Pipeline,
    policy::{ContentPolicy, StaticPolicy},
    poller::Poller,
    threads::ThreadRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let log_buffer = LogBuffer::new(DEFAULT_LOG_CAPACITY);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(LogBufferLayer::new(log_buffer.clone()))
        .init();

    config.validate().context("configuration rejected")?;
    let keys = config.key_material().context("key material rejected")?;
    let crypto = Arc::new(CryptoContext::new(
        keys.box_secret,
        keys.signing_seed,
        keys.broker_box_public,
        keys.broker_signing_public,
    )?);

    let health = Arc::new(HealthRecorder::new(config.health_path.clone()));
    let broker = BrokerClient::new(
        config.broker_url.clone(),
        config.workspace_id.clone(),
        config.broker_token.clone(),
        crypto.clone(),
    )?;
    let threads = ThreadRegistry::new(config.thread_capacity);
    let outbound = OutboundClient::new(broker.clone(), threads.clone(), health.clone());

    let transport = Arc::new(AgentRpcClient::new(config.agent_socket.clone()));
    let queue = AgentQueue::spawn(transport, health.clone());

    let policy: Arc<dyn ContentPolicy> = Arc::new(StaticPolicy::new(
        config.allowed_user_set(),
        config.user_rate_per_minute,
    ));
    let pipeline = Arc::new(Pipeline::new(
        crypto.clone(),
        policy,
        queue,
        threads.clone(),
        outbound.clone(),
        health.clone(),
        config.source_label.clone(),
    ));
    let mut poller = Poller::new(
        broker,
        pipeline,
        crypto,
        health.clone(),
        config.dedupe_ttl(),
        config.max_messages,
        config.wait_seconds,
        config.poll_interval(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Local API is loopback-only by construction; the guard middleware
    // re-checks the peer address on every request.
    let app = local_api_router(
        outbound,
        health,
        log_buffer,
        config.api_rate_per_minute,
    );
    let bind_addr = SocketAddr::from(([127, 0, 0, 1], config.api_port));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind local API on {bind_addr}"))?;
    tracing::info!(
        %bind_addr,
        workspace_id = %config.workspace_id,
        broker_url = %config.broker_url,
        poll_interval_ms = config.poll_interval_ms,
        wait_seconds = config.wait_seconds,
        max_messages = config.max_messages,
        agent_socket = %config.agent_socket.display(),
        "bridge starting"
    );

    let mut api_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = api_shutdown.changed().await;
        })
        .await
    });

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
        result = poller.run(shutdown_rx) => result,
    };

    let _ = shutdown_tx.send(true);
    let _ = server.await;

    // A fatal poll error (expired token, bad keys) exits non-zero.
    result.context("poll loop stopped")?;
    Ok(())
}
