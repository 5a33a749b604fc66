//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{io, net::AddrParseError, path::PathBuf, process::abort, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};

use crate::svc::{
    cfg::Configuration,
    crd::database,
    database::Dispatcher,
    k8s::{client, gateway::KubeGateway, Context, Watcher},
    telemetry::server,
};

pub mod crd;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(crd::Error),
    #[error("failed to run daemon, {0}")]
    Daemon(DaemonError),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with custom resource definition
    #[clap(name = "custom-resource-definition", aliases = &["crd"])]
    #[clap(subcommand)]
    CustomResourceDefinition(crd::CustomResourceDefinition),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition(crd) => crd
                .execute(config)
                .await
                .map_err(Error::CustomResourceDefinition)
                .map_err(|err| {
                    Error::Execution("custom-resource-definition".into(), Arc::new(err))
                }),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[clap(version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[clap(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to handle termintion signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to parse listen address '{0}', {1}")]
    Listen(String, AddrParseError),
}

// -----------------------------------------------------------------------------
// daemon function

#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub async fn daemon(
    kubeconfig: Option<PathBuf>,
    config: Arc<Configuration>,
) -> Result<(), DaemonError> {
    let addr = config
        .operator
        .listen()
        .map_err(|err| DaemonError::Listen(config.operator.listen.to_owned(), err))?;

    // -------------------------------------------------------------------------
    // Create a new kubernetes client from path if defined, or via the
    // environment or defaults locations
    let kube_client = client::try_new(kubeconfig)
        .await
        .map_err(DaemonError::Client)?;

    // -------------------------------------------------------------------------
    // Create the dispatcher shared by every reconciliation, it owns the
    // per-instance locks
    let gateway = Arc::new(KubeGateway::new(
        kube_client.to_owned(),
        config.operator.request_timeout(),
    ));

    let dispatcher = Dispatcher::new(gateway, &config);
    let context = Arc::new(Context::new(kube_client, dispatcher, config));

    // -------------------------------------------------------------------------
    // Create reconcilers and the telemetry server
    let handles = vec![
        tokio::spawn(async move {
            let reconciler = database::Reconciler::default();

            info!("Start to listen for events of database instance custom resource");
            if let Err(err) = reconciler.watch(context).await {
                error!(
                    error = err.to_string(),
                    "Could not reconcile database instance custom resource"
                );
            }

            abort();
        }),
        tokio::spawn(async move {
            if let Err(err) = server::serve(addr).await {
                error!(error = err.to_string(), "Could not serve telemetry endpoints");
            }

            abort();
        }),
    ];

    // -------------------------------------------------------------------------
    // Wait for termination signal
    tokio::signal::ctrl_c()
        .await
        .map_err(DaemonError::SigTerm)?;

    info!("Receive termination signal, stop reconcilers");

    // -------------------------------------------------------------------------
    // Cancel reconcilers
    handles.iter().for_each(|handle| handle.abort());

    for handle in handles {
        if let Err(err) = handle.await {
            if !err.is_cancelled() {
                error!(
                    error = err.to_string(),
                    "Could not wait for the task to complete"
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_interface_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn verbosity_counts_occurrences() {
        let args = Args::try_parse_from([env!("CARGO_PKG_NAME"), "-vvv", "--check"])
            .expect("arguments to be parsed");

        assert_eq!(args.verbosity, 3);
        assert!(args.check);
        assert!(args.command.is_none());
    }

    #[test]
    fn crd_alias_is_accepted() {
        let args = Args::try_parse_from([env!("CARGO_PKG_NAME"), "crd", "v"])
            .expect("arguments to be parsed");

        assert!(matches!(
            args.command,
            Some(Command::CustomResourceDefinition(
                crd::CustomResourceDefinition::View
            ))
        ));
    }
}
