//! # Telemetry module
//!
//! This module expose telemetry measurements mainly metrics and health checks
//! through an http router

use std::{collections::BTreeMap, time::Instant};

use hyper::{
    header::{self, HeaderValue},
    Body, Method, Request, Response, StatusCode,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::info;

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static SERVER_REQUEST_SUCCESS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_operator_server_request_success",
            "number of successful request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'kubernetes_operator_server_request_success' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_FAILURE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_operator_server_request_failure",
            "number of failed request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'kubernetes_operator_server_request_failure' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_operator_server_request_duration",
            "duration of request handled by the server",
        ),
        &["method", "path", "status", "unit"]
    )
    .expect("metrics 'kubernetes_operator_server_request_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "metrics")]
    #[error("{0}")]
    Metrics(metrics::Error),
    #[error("failed to serialize payload, {0}")]
    Serialize(serde_json::Error),
}

// -----------------------------------------------------------------------------
// Helper methods

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn router(req: Request<Body>) -> Result<Response<Body>, Error> {
    let begin = Instant::now();

    // -------------------------------------------------------------------------
    // Basic routing
    let result = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz" | "/livez" | "/readyz") => healthz(&req).await,
        #[cfg(feature = "metrics")]
        (&Method::GET, "/metrics") => metrics::handler(&req).await.map_err(Error::Metrics),
        _ => not_found(&req).await,
    };

    // -------------------------------------------------------------------------
    // Recover error as a json payload
    let (res, success) = match result {
        Ok(res) => (res, true),
        Err(err) => (failure(&err)?, false),
    };

    access(&req, &res, success, Instant::now().duration_since(begin).as_micros());
    Ok(res)
}

/// returns the response sent when a handler fails
fn failure(err: &Error) -> Result<Response<Body>, Error> {
    let mut map = BTreeMap::new();
    map.insert("error".to_string(), err.to_string());

    let mut res = Response::default();
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    *res.body_mut() = Body::from(serde_json::to_string_pretty(&map).map_err(Error::Serialize)?);

    Ok(res)
}

/// log the request and measure it
fn access(req: &Request<Body>, res: &Response<Body>, success: bool, duration: u128) {
    let host = match req.uri().host() {
        Some(host) => host.to_string(),
        None => req
            .headers()
            .get(header::HOST)
            .map(|header| String::from_utf8_lossy(header.as_bytes()).to_string())
            .unwrap_or_else(|| String::from("<none>")),
    };

    info!(
        method = req.method().as_str(),
        host = host,
        path = req.uri().path(),
        status = res.status().as_u16(),
        duration = duration as u64,
        "Receive request"
    );

    #[cfg(feature = "metrics")]
    {
        let status = res.status().as_u16().to_string();
        let labels = [req.method().as_str(), req.uri().path(), &status];
        if success {
            SERVER_REQUEST_SUCCESS.with_label_values(&labels).inc();
        } else {
            SERVER_REQUEST_FAILURE.with_label_values(&labels).inc();
        }

        SERVER_REQUEST_DURATION
            .with_label_values(&[labels[0], labels[1], labels[2], "us"])
            .inc_by(duration as f64);
    }

    #[cfg(not(feature = "metrics"))]
    let _ = success;
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn healthz(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NO_CONTENT;

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn not_found(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NOT_FOUND;

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .expect("request to be built")
    }

    #[tokio::test]
    async fn health_endpoints_answer_no_content() {
        for path in ["/healthz", "/livez", "/readyz"] {
            let res = router(request(Method::GET, path))
                .await
                .expect("request to be handled");

            assert_eq!(res.status(), StatusCode::NO_CONTENT, "path '{path}'");
        }
    }

    #[tokio::test]
    async fn unknown_endpoints_answer_not_found() {
        let res = router(request(Method::GET, "/databases"))
            .await
            .expect("request to be handled");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = router(request(Method::POST, "/healthz"))
            .await
            .expect("request to be handled");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn metrics_are_exposed() {
        let res = router(request(Method::GET, "/metrics"))
            .await
            .expect("request to be handled");

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key(header::CONTENT_TYPE));
    }
}
