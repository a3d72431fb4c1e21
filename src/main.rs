use std::sync::Arc;

use signup_orchestrator::api::{self, AppState};
use signup_orchestrator::collaborators::Collaborators;
use signup_orchestrator::config::{CollaboratorMode, ServiceConfig};
use signup_orchestrator::store::{AccountStore, LibSqlBackend};
use signup_orchestrator::verification::spawn_expiry_sweep;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    let config = ServiceConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // Initialize tracing, optionally mirrored to a daily log file
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "signup.log"));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("Signup orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}", config.port);
    eprintln!(
        "   Collaborators: {}",
        match config.mode {
            CollaboratorMode::Live => "live",
            CollaboratorMode::Fake => "fake",
        }
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    for tenant in &config.tenants {
        db.upsert_tenant(tenant).await?;
        tracing::info!(tenant = %tenant.id, prefix = %tenant.account_prefix, "Tenant registered");
    }

    // ── Services ─────────────────────────────────────────────────────────
    let collaborators = Collaborators::from_config(&config)?;
    let state = AppState::build(
        db,
        &collaborators,
        config.verification.clone(),
        config.onboarding.clone(),
        config.payment_webhook_secret.clone(),
    );

    let _sweep_handle = spawn_expiry_sweep(
        Arc::clone(&state.engine),
        config.verification.sweep_interval,
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
