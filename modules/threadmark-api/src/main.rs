use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Router};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pgarchive_client::ArchiveClient;
use threadmark_common::Config;
use threadmark_resolver::{CheckpointStore, OriginRegistry};

mod rest;

pub struct AppState {
    pub registry: OriginRegistry,
    pub archive: ArchiveClient,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        .route("/api/threads/{thread_ref}", get(rest::api_thread))
        .route("/api/new-subjects", get(rest::api_new_subjects))
        .route("/api/active-subjects", get(rest::api_active_subjects))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("threadmark=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let store = CheckpointStore::new(config.checkpoint_path());
    let registry = match store.load()? {
        Some(checkpoint) => {
            info!(
                session_id = %checkpoint.session_id,
                complete = checkpoint.is_complete(),
                "Loaded checkpoint"
            );
            OriginRegistry::restore(checkpoint.registry)
        }
        None => {
            warn!(path = %store.path().display(), "No checkpoint yet, serving an empty registry");
            OriginRegistry::new()
        }
    };
    let (origins, cross_references) = registry.counts();
    info!(origins, cross_references, "Registry ready");

    let state = Arc::new(AppState {
        registry,
        archive: ArchiveClient::new(
            &config.archive_base_url,
            &config.archive_list,
            config.expand_timeout,
        )?,
    });

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Threadmark API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
