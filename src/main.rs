use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use otp_relay::{
    app::build_router,
    cleanup,
    clock::ExpiryPolicy,
    config::Config,
    keepalive,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    if config.image_ttl != config.session_ttl {
        tracing::warn!(
            "⚠️ Image TTL ({}s) differs from session TTL ({}s): image codes may outlive or \
             lose their objects",
            config.image_ttl.as_secs(),
            config.session_ttl_secs()
        );
    }

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    if let Some(exchange) = &state.exchange {
        let store = exchange.store().clone();
        match store.rebuild_expiry(state.clock.now()).await {
            Ok(n) => tracing::info!("✅ Re-applied session expiry to {} keys", n),
            Err(e) => tracing::error!("❌ Failed to rebuild session expiry: {}", e),
        }

        cleanup::spawn_store_reaper(
            store,
            state.limiter.clone(),
            state.clock.clone(),
            config.store_sweep_interval,
        );
        tracing::info!(
            "✅ Session reaper started (every {}s)",
            config.store_sweep_interval.as_secs()
        );
    }

    if let Some(objects) = &state.objects {
        cleanup::spawn_object_sweep(
            objects.clone(),
            state.temp_prefix().to_string(),
            ExpiryPolicy::new(config.image_ttl),
            state.clock.clone(),
            config.image_sweep_interval,
        );
        tracing::info!(
            "✅ Object sweep started (every {}s)",
            config.image_sweep_interval.as_secs()
        );
    }

    if let Some(url) = &config.keepalive_url {
        keepalive::spawn_keepalive(state.http.clone(), url.clone(), config.keepalive_interval);
        tracing::info!("✅ Keepalive pinging {}", url);
    }

    let app = build_router(state);

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
