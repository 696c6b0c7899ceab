use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use realtime_presence::config::Settings;
use realtime_presence::context::RealtimeContext;
use realtime_presence::server::{create_app, AppState};
use realtime_presence::session::Session;
use realtime_presence::snapshot::HttpRosterSource;
use realtime_presence::telemetry::init_tracing;
use realtime_presence::transport::WsConnector;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;
    init_tracing(&settings.log);
    tracing::info!("Configuration loaded");

    let session = Session::from_config(&settings.session)?;
    tracing::info!(subject_id = %session.subject_id(), "Session ready");

    let context = Arc::new(RealtimeContext::create(
        &settings.realtime,
        session,
        Arc::new(WsConnector::new()),
    )?);

    // Seed the roster; deltas still apply to an empty roster if this fails
    let source = HttpRosterSource::new(&settings.api, context.session())?;
    match context.load_snapshot(&source).await {
        Ok(count) => tracing::info!(count = count, "Initial roster loaded"),
        Err(e) => tracing::warn!(error = %e, url = %source.url(), "Failed to load initial roster"),
    }

    context.connect();

    if settings.status.enabled {
        let app = create_app(AppState::new(context.clone()));

        let addr = settings.status_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Status server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal_handler())
            .await?;
    } else {
        shutdown_signal_handler().await;
    }

    // Announce offline and close the channel
    context.shutdown(SHUTDOWN_TIMEOUT).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
