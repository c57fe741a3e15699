//! Tap Rounds Back binary entrypoint wiring the REST surface, the sweeper and the storage backend.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tap_rounds_back::{
    clock::SystemClock,
    config::{AppConfig, StorageBackend},
    dao::round_store::memory::MemoryRoundStore,
    routes,
    services::sweeper,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    info!(
        round_secs = config.round_duration.as_secs(),
        cooldown_secs = config.cooldown_duration.as_secs(),
        storage = ?config.storage,
        "configuration ready"
    );
    let port = config.port;

    let app_state = AppState::new(config, Arc::new(SystemClock));
    install_storage(&app_state).await;
    tokio::spawn(sweeper::run(app_state.clone()));

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the configured round store. MongoDB is connected in the background; the
/// service stays degraded until it answers.
async fn install_storage(state: &SharedState) {
    match state.config().storage {
        StorageBackend::Memory => {
            warn!("using the in-memory round store; rounds are lost on restart");
            state
                .set_round_store(Arc::new(MemoryRoundStore::new(state.clock())))
                .await;
        }
        #[cfg(feature = "mongo-store")]
        StorageBackend::Mongo => {
            tokio::spawn(run_mongo_supervisor(state.clone()));
        }
        #[cfg(not(feature = "mongo-store"))]
        StorageBackend::Mongo => {
            warn!("built without `mongo-store`; falling back to the in-memory round store");
            state
                .set_round_store(Arc::new(MemoryRoundStore::new(state.clock())))
                .await;
        }
    }
}

#[cfg(feature = "mongo-store")]
async fn run_mongo_supervisor(state: SharedState) {
    use tap_rounds_back::{
        dao::round_store::{
            RoundStore,
            mongodb::{MongoConfig, MongoRoundStore},
        },
        services::storage_supervisor,
    };

    let uri = state.config().mongo_uri.clone();
    let db_name = state.config().mongo_db.clone();
    let clock = state.clock();

    storage_supervisor::run(state, move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        let clock = clock.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoRoundStore::connect(config, clock).await?;
            Ok(Arc::new(store) as Arc<dyn RoundStore>)
        }
    })
    .await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
