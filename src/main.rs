use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info, warn};

use axionik_checkout as app;
use app::events::{EventHandler, LoggingEventHandler};
use app::store::{Clock, InMemoryStore, KeyValueStore, RedisStore, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::load_config().context("failed to load configuration")?;
    app::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Store backend
    let store: Arc<dyn KeyValueStore> = if cfg.uses_redis() {
        info!(redis_url = %cfg.redis_url, "Connecting to Redis store");
        Arc::new(
            RedisStore::connect(&cfg.redis_url, cfg.store_timeout())
                .await
                .context("failed to connect to Redis")?,
        )
    } else {
        warn!("Using in-memory store; state is lost on restart and not shared between replicas");
        Arc::new(InMemoryStore::new())
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = app::events::EventSender::new(event_tx);
    let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(LoggingEventHandler)];
    tokio::spawn(app::events::process_events(event_rx, handlers));

    let gateways = app::payments::registry_from_config(&cfg, clock.clone())
        .context("failed to initialise payment gateways")?;
    let services = app::handlers::AppServices::new(
        store.clone(),
        clock,
        gateways,
        event_sender.clone(),
        &cfg,
    );

    if cfg.seed_catalog {
        services
            .catalog
            .seed_demo()
            .await
            .context("failed to seed demo catalog")?;
    }

    if cfg.reservation_sweep_interval_secs > 0 {
        tokio::spawn(sweep_reservations(
            services.clone(),
            Duration::from_secs(cfg.reservation_sweep_interval_secs),
        ));
    }

    let app_state = app::AppState {
        config: cfg.clone(),
        store,
        event_sender,
        services,
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.cors_allow_any_origin || cfg.is_development() {
        info!("Using permissive CORS because explicit origins were not configured");
        CorsLayer::permissive()
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        anyhow::bail!("missing CORS configuration");
    };

    let router = app::app_router(app_state)
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    // Bind and serve
    let ip: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address: {}", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("axionik-checkout listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Periodically writes back stock records whose holds have lapsed, so
/// abandoned checkouts free stock even for products nobody touches.
async fn sweep_reservations(services: app::handlers::AppServices, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let product_ids = match services.catalog.product_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Reservation sweep could not list products");
                continue;
            }
        };
        if let Err(e) = services.ledger.sweep_expired(&product_ids).await {
            warn!(error = %e, "Reservation sweep failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
