mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use escrow_api::auth::bootstrap_admin;
use escrow_api::clock::{Clock, SystemClock};
use escrow_api::gateway::PaymentGateway;
use escrow_api::lifecycle::TransactionManager;
use escrow_api::password_reset::PasswordResetEngine;
use escrow_api::payfast::HttpItnValidator;
use escrow_api::routes;
use escrow_api::state::{AppState, AppStateInner};
use escrow_db::Database;
use escrow_notify::dispatcher::Dispatcher;
use escrow_notify::otp::{LogOtpSink, OtpSink, RelayOtpSink};

use crate::config::{Config, Environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "escrow=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Fix the environment (or your .env file) and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    db.health_check()?;
    info!("Database ready at {}", config.db_path.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    if let Some((email, password)) = &config.admin {
        bootstrap_admin(&db, email, password, clock.now())?;
    }

    let http = reqwest::Client::builder()
        .user_agent(concat!("escrow/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let sink: Arc<dyn OtpSink> = match &config.mail_relay_url {
        Some(url) => {
            info!("Reset codes delivered through mail relay");
            Arc::new(RelayOtpSink::new(http.clone(), url.clone()))
        }
        None => {
            warn!("ESCROW_MAIL_RELAY_URL not set; reset codes are not delivered anywhere");
            Arc::new(LogOtpSink)
        }
    };
    if config.environment == Environment::Development {
        warn!("Development mode: reset responses include the code");
    }

    // Shared state
    let dispatcher = Dispatcher::new();
    let transactions = TransactionManager::new(db.clone(), clock.clone(), dispatcher.clone());
    let validator = Arc::new(HttpItnValidator::new(http, &config.payfast));
    let payments = PaymentGateway::new(
        config.payfast.clone(),
        validator,
        transactions.clone(),
        config.hold_funds,
    );
    let resets = PasswordResetEngine::new(db.clone(), clock.clone(), sink, config.reset.clone());

    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        clock,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: chrono::Duration::hours(config.token_ttl_hours),
        dispatcher,
        resets,
        transactions,
        payments,
        frontend_url: config.frontend_url.clone(),
    });

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Escrow server listening on {}", config.addr);
    if config.hold_funds {
        info!("Paid transactions wait for delivery confirmation");
    }

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(db) {
        Ok(db) => db.close()?,
        Err(_) => warn!("Database still referenced at shutdown; leaving it to drop"),
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
