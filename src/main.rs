use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use bakehouse_api::{
    auth::{JwtIdentityProvider, SessionGate},
    config,
    db,
    events,
    handlers::AppServices,
    payments::HostedCheckoutClient,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(app_config.log_level(), app_config.log_json);

    info!(
        environment = %app_config.environment,
        "Starting bakehouse-api v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Arc::new(
        db::establish_connection_from_app_config(&app_config)
            .await
            .context("failed to connect to database")?,
    );

    if app_config.auto_migrate {
        db::run_migrations(&db)
            .await
            .context("failed to run migrations")?;
    }

    let (event_sender, event_rx) = events::channel(1024);
    let event_sender = Some(Arc::new(event_sender));
    tokio::spawn(events::process_events(event_rx));

    let identity_provider = Arc::new(
        JwtIdentityProvider::new(
            &app_config.identity_jwt_secret,
            app_config.identity_issuer.clone(),
            app_config.identity_api_url.clone(),
            app_config.identity_api_key.clone(),
            app_config.provider_timeout(),
        )
        .map_err(|e| anyhow::anyhow!("failed to build identity provider: {}", e))?,
    );
    let session_gate = Arc::new(SessionGate::new(db.clone(), identity_provider));

    let payment_provider = Arc::new(
        HostedCheckoutClient::new(
            app_config.payment_api_url.clone(),
            app_config.payment_secret_key.clone(),
            app_config.provider_timeout(),
        )
        .map_err(|e| anyhow::anyhow!("failed to build payment client: {}", e))?,
    );

    let config = Arc::new(app_config);
    let services = AppServices::new(
        db.clone(),
        &config,
        payment_provider,
        event_sender.clone(),
    );

    let state = AppState {
        db,
        config: config.clone(),
        services,
        session_gate,
        event_sender,
    };

    let app = bakehouse_api::app_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C; shutting down"),
        _ = terminate => info!("Received SIGTERM; shutting down"),
    }
}
