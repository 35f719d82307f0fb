use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use storefront_api as api;
use api::services::gateway::{PaymentGateway, SslCommerzGateway};
use api::services::uploads::{ImageStore, LocalImageStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let sessions = Arc::new(api::auth::SessionService::new(
        api::auth::SessionConfig::from(&cfg),
        db_arc.clone(),
    ));

    if cfg.payment.is_live {
        info!("payment gateway running against the live environment");
    } else {
        warn!("payment gateway running in sandbox mode");
    }
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        SslCommerzGateway::new(cfg.payment.clone()).context("failed to build gateway client")?,
    );

    tokio::fs::create_dir_all(&cfg.upload_dir)
        .await
        .with_context(|| format!("failed to create upload dir {}", cfg.upload_dir))?;
    let images: Arc<dyn ImageStore> =
        Arc::new(LocalImageStore::new(&cfg.upload_dir, cfg.max_upload_bytes));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        event_sender.clone(),
        sessions.clone(),
        gateway,
        images,
        &cfg,
    );

    let cors = api::cors_layer(&cfg).context("invalid CORS configuration")?;
    let port = cfg.port;
    let host = cfg.host.clone();

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: Arc::new(cfg),
        event_sender,
        sessions,
        services,
    };
    let app = api::build_router(app_state, cors);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
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
}
