//! # Server module
//!
//! This module provides the server exposing the health and metrics endpoints
//! based on the crate [`hyper`].

use std::{convert::Infallible, net::SocketAddr};

use hyper::{
    service::{make_service_fn, service_fn},
    Server,
};
use tracing::info;

use crate::svc::telemetry::router;

// -----------------------------------------------------------------------------
// Error

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to bind on socket '{0}', {1}")]
    Bind(SocketAddr, hyper::Error),
    #[error("failed to listen on socket '{0}', {1}")]
    Serve(SocketAddr, hyper::Error),
}

// -----------------------------------------------------------------------------
// helpers

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn serve(addr: SocketAddr) -> Result<(), Error> {
    let builder = Server::try_bind(&addr).map_err(|err| Error::Bind(addr, err))?;
    let service = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(router)) });

    info!(addr = addr.to_string(), "Begin to listen on address");
    builder
        .serve(service)
        .await
        .map_err(|err| Error::Serve(addr, err))
}
