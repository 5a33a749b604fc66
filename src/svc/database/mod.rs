//! # Database module
//!
//! This module provide the reconciliation of a database instance into the four
//! children which run it: a persistent volume on network attached storage, the
//! claim binding it, the workload and the service exposing it.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use crate::svc::k8s::{gateway, gateway::Cascade};

pub mod desired;
pub mod dispatch;
pub mod reconciler;
pub mod status;

pub use desired::{Children, ValidationError};
pub use dispatch::{Dispatcher, Event};
pub use reconciler::InstanceReconciler;

// -----------------------------------------------------------------------------
// Constants

pub const APP: &str = "mysql";
pub const DEFAULT_IMAGE: &str = "mysql:8.0";
pub const DEFAULT_STORAGE_SIZE: &str = "1Gi";
pub const PORT: i32 = 3306;
pub const PORT_NAME: &str = "mysql";
pub const CONTAINER_NAME: &str = "mysql";
pub const VOLUME_NAME: &str = "mysql-storage";
pub const DATA_DIRECTORY: &str = "/var/lib/mysql";
pub const ADMIN_USER: &str = "admin";
pub const FINALIZER: &str = "example.org/database-instance";

pub const LABEL_APP: &str = "app";
pub const LABEL_INSTANCE: &str = "instance";

// -----------------------------------------------------------------------------
// Child enumeration

/// the kinds of object owned by a database instance
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum Child {
    Volume,
    Claim,
    Workload,
    Endpoint,
}

impl Display for Child {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Volume => write!(f, "StorageVolume"),
            Self::Claim => write!(f, "StorageClaim"),
            Self::Workload => write!(f, "Workload"),
            Self::Endpoint => write!(f, "NetworkEndpoint"),
        }
    }
}

impl Child {
    pub const CREATION_ORDER: [Self; 4] =
        [Self::Volume, Self::Claim, Self::Workload, Self::Endpoint];
    pub const DELETION_ORDER: [Self; 4] =
        [Self::Workload, Self::Endpoint, Self::Claim, Self::Volume];

    /// returns the name of the child of the given instance
    pub fn name(&self, instance: &str) -> String {
        match self {
            Self::Volume => format!("{APP}-pv-{instance}"),
            Self::Claim => format!("{APP}-pvc-{instance}"),
            Self::Workload => format!("{APP}-{instance}"),
            Self::Endpoint => format!("{APP}-service-{instance}"),
        }
    }

    /// returns the kubernetes kind of the child
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Volume => "PersistentVolume",
            Self::Claim => "PersistentVolumeClaim",
            Self::Workload => "Deployment",
            Self::Endpoint => "Service",
        }
    }

    /// the workload waits for its pods to be gone before being removed
    pub fn cascade(&self) -> Cascade {
        match self {
            Self::Workload => Cascade::Foreground,
            _ => Cascade::Background,
        }
    }

    /// persistent volumes are cluster wide objects
    pub fn namespaced(&self) -> bool {
        !matches!(self, Self::Volume)
    }
}

/// returns the labels carried by every child of the instance
pub fn labels(instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), APP.to_string()),
        (LABEL_INSTANCE.to_string(), instance.to_string()),
    ])
}

// -----------------------------------------------------------------------------
// ReconcilerError enumeration

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerError {
    #[error("invalid database instance, {0}")]
    Validation(ValidationError),
    #[error("failed to create {0} '{1}', {2}")]
    Terminal(Child, String, gateway::Error),
    #[error("failed to update workload '{0}', {1}")]
    Retryable(String, gateway::Error),
    #[error("failed to execute request on kubernetes api, {0}")]
    Gateway(gateway::Error),
    #[error("failed to compute diff between the original and modified object, {0}")]
    Diff(serde_json::Error),
    #[error("failed to reconcile resource, {0}")]
    Reconcile(String),
}

impl From<ValidationError> for ReconcilerError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<gateway::Error> for ReconcilerError {
    fn from(err: gateway::Error) -> Self {
        Self::Gateway(err)
    }
}

impl ReconcilerError {
    /// returns if the reconciliation should be attempted again after the
    /// retry delay
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(..) | Self::Gateway(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_names_derive_from_instance() {
        assert_eq!(Child::Volume.name("orders"), "mysql-pv-orders");
        assert_eq!(Child::Claim.name("orders"), "mysql-pvc-orders");
        assert_eq!(Child::Workload.name("orders"), "mysql-orders");
        assert_eq!(Child::Endpoint.name("orders"), "mysql-service-orders");
    }

    #[test]
    fn deletion_starts_with_the_workload() {
        assert_eq!(Child::DELETION_ORDER[0], Child::Workload);
        assert_eq!(Child::Workload.cascade(), Cascade::Foreground);
        assert_eq!(Child::Claim.cascade(), Cascade::Background);

        let mut creation = Child::CREATION_ORDER.to_vec();
        let mut deletion = Child::DELETION_ORDER.to_vec();
        creation.sort();
        deletion.sort();
        assert_eq!(creation, deletion);
    }

    #[test]
    fn retryable_errors() {
        let err = gateway::Error::NotFound("Deployment".into(), "mysql-orders".into());
        assert!(ReconcilerError::Retryable("mysql-orders".into(), err).is_retryable());

        let err = gateway::Error::NotFound("Deployment".into(), "mysql-orders".into());
        assert!(!ReconcilerError::Terminal(Child::Workload, "mysql-orders".into(), err)
            .is_retryable());

        let err = ValidationError::Missing("database");
        assert!(!ReconcilerError::from(err).is_retryable());
    }
}
