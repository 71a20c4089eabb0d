use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ringline::config::Config;
use ringline::dispatch::{DeliveryChannel, LogChannel};
use ringline::server::{AppState, build_router};
use ringline::store::{CallStore, MemoryStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ringline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let store: Arc<dyn CallStore> = Arc::new(MemoryStore::new());
    let channel: Arc<dyn DeliveryChannel> = Arc::new(LogChannel::new());
    let app_state = AppState::assemble(&config, store, channel);

    let shutdown = CancellationToken::new();
    let loops = app_state.queue().start(shutdown.clone());

    let app = build_router(app_state);

    tracing::info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("bind listener");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .expect("server error");

    // Let in-flight dispatch batches finish before exiting.
    shutdown.cancel();
    for handle in loops {
        let _ = handle.await;
    }
}
