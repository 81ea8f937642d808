//! Streaming table query API: compiles `field[.mode]=value` requests
//! into columnar scans and streams JSON or CSV rows with cursor
//! trailers.

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use axum::{extract::Request, routing::get, Router, ServiceExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tower_http::{cors::CorsLayer, normalize_path::NormalizePathLayer, trace};
use tracing::Level;

use kyklos_core::{CancelToken, Domain, ServeError};

pub mod coerce;
pub mod compile;
pub mod encode;
mod error;
pub mod registry;
mod routes;
pub mod stream;
pub mod test_support;

pub use error::Error;

/// Hard ceiling applied when the caller sends no limit (or zero).
pub const DEFAULT_MAX_LIMIT: u32 = 50_000;

#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub permissive_cors: Option<bool>,
    /// Clamp for caller-supplied limits; also the implied limit when the
    /// request has none.
    pub max_limit: Option<u32>,
    /// Per-request deadline; the stream stops within one row after it
    /// fires.
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    pub fn max_limit(&self) -> u32 {
        self.max_limit.unwrap_or(DEFAULT_MAX_LIMIT)
    }
}

#[derive(Clone)]
pub struct Facade<D: Domain> {
    pub inner: D,
    pub registry: Arc<registry::TableRegistry>,
    pub config: Config,
    pub cancel: CancellationToken,
}

impl<D: Domain> Deref for Facade<D> {
    type Target = D;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub fn build_router_with_facade<D: Domain>(facade: Facade<D>) -> Router {
    Router::new()
        .route("/health", get(routes::health::naked::<D>))
        .route("/tables/{entity}", get(routes::tables::stream::<D>))
        .with_state(facade)
        .layer(
            trace::TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
}

pub struct Driver;

impl<D: Domain, C: CancelToken> kyklos_core::Driver<D, C> for Driver {
    type Config = Config;

    async fn run(cfg: Self::Config, domain: D, cancel: C) -> Result<(), ServeError> {
        // bridge the generic cancel handle into the per-request tokens
        let local = CancellationToken::new();
        {
            let upstream = cancel.clone();
            let local = local.clone();
            tokio::spawn(async move {
                upstream.cancelled().await;
                local.cancel();
            });
        }

        let facade = Facade {
            inner: domain,
            registry: Arc::new(registry::TableRegistry::standard()),
            config: cfg.clone(),
            cancel: local,
        };

        let app = build_router_with_facade(facade).layer(if cfg.permissive_cors.unwrap_or_default()
        {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        });
        let app = NormalizePathLayer::trim_trailing_slash().layer(app);

        let listener = tokio::net::TcpListener::bind(cfg.listen_address)
            .await
            .map_err(ServeError::BindError)?;

        tracing::info!(address = %cfg.listen_address, "serving table queries");

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(ServeError::ShutdownError)?;

        Ok(())
    }
}
