//! # Metrics module
//!
//! This module expose the prometheus registry of the operator, that is the
//! reconciliation, dispatch, gateway and server counters

use hyper::{
    header::{self, HeaderValue, InvalidHeaderValue},
    Body, Request, Response, StatusCode,
};
use prometheus::{gather, Encoder, TextEncoder};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to encode metrics, {0}")]
    Encode(prometheus::Error),
    #[error("failed to parse header value given by prometheus, {0}")]
    InvalidHeader(InvalidHeaderValue),
}

// -----------------------------------------------------------------------------
// Helper methods

/// returns the metrics gathered from the default registry in the prometheus
/// text format
pub fn encode() -> Result<(String, Vec<u8>), Error> {
    let encoder = TextEncoder::new();
    let mut buf = vec![];

    encoder.encode(&gather(), &mut buf).map_err(Error::Encode)?;
    Ok((encoder.format_type().to_string(), buf))
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn handler(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let (format, buf) = encode()?;
    let mut res = Response::default();

    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&format).map_err(Error::InvalidHeader)?,
    );

    *res.status_mut() = StatusCode::OK;
    *res.body_mut() = Body::from(buf);

    Ok(res)
}
