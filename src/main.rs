use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use rural_sports_backend::api::{self, AppState};
use rural_sports_backend::config::AppConfig;
use rural_sports_backend::database::{
    init_pool_from_config, run_migrations, CommerceStore, MemoryStore, PgStore,
};
use rural_sports_backend::health::HealthChecker;
use rural_sports_backend::logging::init_tracing;
use rural_sports_backend::payments::{CashfreeGateway, PaymentGateway};
use rural_sports_backend::services::{
    CartService, CheckoutService, FulfillmentService, LogNotifier, Notifier, WebhookReconciler,
};
use rural_sports_backend::workers::pending_order_monitor::PendingOrderMonitor;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Rural Sports backend service"
    );

    let store: Arc<dyn CommerceStore> = match &config.database {
        Some(db_config) => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(db_config).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            run_migrations(&pool).await?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("⏭️  Skipping database (SKIP_EXTERNALS=true), using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    info!(base_url = %config.gateway.base_url, "💳 Initializing Cashfree gateway...");
    let gateway: Arc<dyn PaymentGateway> = Arc::new(CashfreeGateway::new(config.gateway.clone())?);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new());

    let reconciler = WebhookReconciler::new(
        store.clone(),
        gateway.clone(),
        notifier,
        config.webhook.clone(),
    );

    info!("🏥 Initializing health checker...");
    let health_checker = HealthChecker::new(store.clone());
    info!("✅ Health checker initialized");

    let state = AppState {
        store: store.clone(),
        cart: CartService::new(store.clone()),
        checkout: CheckoutService::new(store.clone(), gateway.clone(), config.checkout.clone()),
        reconciler: reconciler.clone(),
        fulfillment: FulfillmentService::new(store.clone()),
        health_checker,
    };

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut monitor_handle = None;
    if config.monitor.enabled {
        info!(
            poll_interval_secs = config.monitor.poll_interval.as_secs(),
            pending_ttl_secs = config.monitor.pending_ttl.as_secs(),
            "Starting pending order monitor"
        );
        let worker = PendingOrderMonitor::new(
            store.clone(),
            gateway.clone(),
            reconciler,
            config.monitor.clone(),
        );
        monitor_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else {
        info!("Pending order monitor disabled (PENDING_MONITOR_ENABLED=false)");
    }

    info!("🛣️  Setting up application routes...");
    let app = api::router(state);
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║          🏟️  RURAL SPORTS BACKEND SERVER IS RUNNING          ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🌐 Server Address:  http://{}", addr);
    println!("║  🗄️  Storage:         {}", store.backend());
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  GET    /health                     - Health check           ║");
    println!("║  GET    /api/cart                   - View cart              ║");
    println!("║  POST   /api/orders                 - Create pending order   ║");
    println!("║  POST   /api/orders/{{id}}/payment    - Start payment          ║");
    println!("║  POST   /api/tickets/{{id}}/scan      - Gate scan              ║");
    println!("║  POST   /webhooks/cashfree          - Payment callbacks      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = monitor_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for monitor worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
