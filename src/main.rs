use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use security_audit::server::{router, AppState};
use security_audit::{SecurityConfig, SecurityMonitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "security_audit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting security audit service");

    // Load configuration
    let config = SecurityConfig::load()?;
    info!("Configuration loaded");

    // Open the ledger and verify it before accepting events
    let monitor = Arc::new(SecurityMonitor::open(&config).await?);
    if monitor.is_trust_suspended() {
        error!("Audit ledger failed verification; ledger-derived checks are suspended");
    }
    info!(
        "Audit ledger ready with {} entries",
        monitor.ledger().len().await
    );

    // Daily retention sweep
    let retention_monitor = monitor.clone();
    let retention_days = config.ledger.retention_days;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(86400));
        loop {
            interval.tick().await;
            match retention_monitor.clear_old_events(retention_days).await {
                Ok(removed) if removed > 0 => info!("Retention sweep removed {} entries", removed),
                Ok(_) => {}
                Err(e) => error!("Retention sweep failed: {}", e),
            }
        }
    });
    info!("Retention sweep started ({} days)", retention_days);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = router(AppState {
        monitor: monitor.clone(),
        config,
    });

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    monitor.close().await?;
    info!("Shut down cleanly");
    Ok(())
}
