mod api;
mod middleware;
mod reconcile;
mod scheduler;

use std::net::SocketAddr;
use std::sync::Arc;

use crashkart_gateway::{GatewayClient, GatewayConfig, GatewayError};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(crashkart_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = crashkart_db::PoolConfig::from_app_config(&config);
    let pool = crashkart_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = crashkart_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let gateway = match GatewayConfig::from_app_config(&config) {
        Ok(gateway_config) => Some(GatewayClient::new(&gateway_config)?),
        Err(GatewayError::MissingCredentials) if !config.is_production() => {
            tracing::warn!("gateway credentials not set; online checkout disabled");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let _scheduler = scheduler::build_scheduler(pool.clone(), Arc::clone(&config)).await?;

    let auth = AuthState::from_env(matches!(
        config.env,
        crashkart_core::Environment::Development
    ))?;
    let app = build_app(
        AppState {
            pool,
            config: Arc::clone(&config),
            gateway,
        },
        auth,
        default_rate_limit_state().trusting_forwarded_for(config.trust_forwarded_for),
    );

    tracing::info!(addr = %config.bind_addr, env = %config.env, "crashkart-server listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
