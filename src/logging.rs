//! # Logging module
//!
//! This module provides logging facilities and helpers, it also wires the
//! optional error tracker and distributed tracing exporters

#[cfg(feature = "tracker")]
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt};

use crate::svc::cfg::Configuration;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing::subscriber::SetGlobalDefaultError),
    #[cfg(feature = "tracker")]
    #[error("failed to parse sentry data source name, {0}")]
    Dsn(sentry_types::ParseDsnError),
    #[cfg(feature = "trace")]
    #[error("failed to install jaeger pipeline, {0}")]
    Jaeger(opentelemetry::trace::TraceError),
}

// -----------------------------------------------------------------------------
// Guard structure

/// keeps exporters alive, they are flushed once dropped
#[derive(Default)]
pub struct Guard {
    #[cfg(feature = "tracker")]
    sentry: Option<sentry::ClientInitGuard>,
    #[cfg(feature = "trace")]
    jaeger: bool,
}

impl Drop for Guard {
    fn drop(&mut self) {
        #[cfg(feature = "trace")]
        if self.jaeger {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

pub const fn level(verbosity: usize) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn initialize(config: &Configuration, verbosity: usize) -> Result<Guard, Error> {
    #[allow(unused_mut)]
    let mut guard = Guard::default();

    let registry = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level(verbosity)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_names(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true),
        );

    #[cfg(feature = "tracker")]
    let registry = {
        let layer = match &config.sentry.dsn {
            Some(dsn) => {
                let dsn = sentry_types::Dsn::from_str(dsn).map_err(Error::Dsn)?;

                guard.sentry = Some(sentry::init(sentry::ClientOptions {
                    dsn: Some(dsn),
                    release: sentry::release_name!(),
                    ..Default::default()
                }));

                Some(sentry_tracing::layer())
            }
            None => None,
        };

        registry.with(layer)
    };

    #[cfg(feature = "trace")]
    let registry = {
        let layer = match &config.jaeger.endpoint {
            Some(endpoint) => {
                let tracer = opentelemetry_jaeger::new_collector_pipeline()
                    .with_endpoint(endpoint)
                    .with_service_name(env!("CARGO_PKG_NAME"))
                    .with_reqwest()
                    .install_batch(opentelemetry::runtime::Tokio)
                    .map_err(Error::Jaeger)?;

                guard.jaeger = true;
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            None => None,
        };

        registry.with(layer)
    };

    #[cfg(not(any(feature = "tracker", feature = "trace")))]
    let _ = config;

    tracing::subscriber::set_global_default(registry).map_err(Error::GlobalDefaultSubscriber)?;

    Ok(guard)
}
