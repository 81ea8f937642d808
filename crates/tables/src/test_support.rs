//! Helpers for driving the router in tests without a listener.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use kyklos_testing::ToyDomain;

use crate::{build_router_with_facade, registry::TableRegistry, Config, Facade};

pub struct TestApp {
    router: Router,
    cancel: CancellationToken,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub trailers: HeaderMap,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).expect("utf8 response body")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json response body")
    }

    pub fn trailer(&self, name: &str) -> Option<&str> {
        self.trailers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_domain(ToyDomain::new())
    }

    pub fn with_domain(domain: ToyDomain) -> Self {
        let config = Config {
            listen_address: "[::]:0".parse().expect("invalid listen address"),
            permissive_cors: None,
            max_limit: None,
            request_timeout_secs: None,
        };
        let cancel = CancellationToken::new();
        let facade = Facade {
            inner: domain,
            registry: Arc::new(TableRegistry::standard()),
            config,
            cancel: cancel.clone(),
        };
        Self {
            router: build_router_with_facade(facade),
            cancel,
        }
    }

    /// Cancel every in-flight request spawned through this app.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .expect("failed to build request");

        let res = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("request failed");

        let status = res.status();
        let collected = res
            .into_body()
            .collect()
            .await
            .expect("failed to read response body");
        let trailers = collected.trailers().cloned().unwrap_or_default();
        let body = collected.to_bytes().to_vec();

        TestResponse {
            status,
            body,
            trailers,
        }
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}
