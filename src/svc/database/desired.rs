//! # Desired module
//!
//! This module compute the children of a database instance from its
//! declared fields. The computation does not talk to the cluster and always
//! returns the same children for the same instance and storage settings.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment},
        core::v1::{
            Container, ContainerPort, EnvVar, ExecAction, NFSVolumeSource, PersistentVolume,
            PersistentVolumeClaim, PersistentVolumeClaimSpec,
            PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, PodSpec, PodTemplateSpec,
            Probe, ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
};
use kube::api::ObjectMeta;

use crate::svc::{
    cfg::Storage,
    crd::database::DatabaseInstance,
    database::{self, Child},
    k8s::resource,
};

// -----------------------------------------------------------------------------
// Constants

pub const ACCESS_MODE: &str = "ReadWriteOnce";
pub const RECLAIM_POLICY: &str = "Retain";
pub const VOLUME_MODE: &str = "Filesystem";
pub const STORAGE_RESOURCE: &str = "storage";
pub const QUANTITY_SUFFIXES: [&str; 16] = [
    "", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "n", "u", "m", "k", "M", "G", "T", "P", "E",
];

// -----------------------------------------------------------------------------
// ValidationError enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum ValidationError {
    #[error("field '{0}' is required and must not be empty")]
    Missing(&'static str),
    #[error("storage size '{0}' is not a valid quantity")]
    InvalidQuantity(String),
    #[error("{0}")]
    Identity(resource::Error),
}

// -----------------------------------------------------------------------------
// Children structure

/// the four objects owned by a database instance, manifests embed the
/// credentials of the instance so this structure does not implement
/// [`Debug`](std::fmt::Debug)
#[derive(PartialEq, Clone)]
pub struct Children {
    pub volume: PersistentVolume,
    pub claim: PersistentVolumeClaim,
    pub workload: Deployment,
    pub endpoint: Service,
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns if the given string is a storage quantity such as `1Gi`, `500M`
/// or `5e2`. The kubernetes quantity grammar is followed, except that a
/// negative size is refused.
pub fn is_quantity(size: &str) -> bool {
    let unsigned = size.strip_prefix('+').unwrap_or(size);
    let (number, suffix) = split_number(unsigned);

    if !is_number(number) {
        return false;
    }

    if QUANTITY_SUFFIXES.contains(&suffix) {
        return true;
    }

    // decimal exponent, e.g. `1e3` or `5E-2`
    match suffix.strip_prefix(['e', 'E']) {
        Some(exponent) => {
            let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            !exponent.is_empty() && exponent.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// split the leading digits and decimal point from the suffix
fn split_number(value: &str) -> (&str, &str) {
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());

    value.split_at(split)
}

/// `<digits>`, `<digits>.<digits>`, `<digits>.` or `.<digits>`
fn is_number(number: &str) -> bool {
    number.matches('.').count() <= 1 && number.chars().any(|c| c.is_ascii_digit())
}

fn required<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ValidationError::Missing(field)),
    }
}

/// returns the children of the database instance
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn build(instance: &DatabaseInstance, storage: &Storage) -> Result<Children, ValidationError> {
    let (namespace, name) =
        resource::namespaced_name(instance).map_err(ValidationError::Identity)?;

    let spec = &instance.spec;
    let database = required("database", spec.database.as_deref())?;
    let password = required("password", spec.password.as_ref().map(|p| p.expose()))?;
    let size = match spec.storage_size.as_deref() {
        None | Some("") => database::DEFAULT_STORAGE_SIZE,
        Some(size) if is_quantity(size) => size,
        Some(size) => return Err(ValidationError::InvalidQuantity(size.to_string())),
    };

    let labels = database::labels(&name);
    let owner = resource::owner_reference(instance).map(|owner| vec![owner]);
    let metadata = |child: Child| ObjectMeta {
        name: Some(child.name(&name)),
        namespace: child.namespaced().then(|| namespace.to_owned()),
        labels: Some(labels.to_owned()),
        owner_references: child.namespaced().then(|| owner.to_owned()).flatten(),
        ..Default::default()
    };

    let capacity = BTreeMap::from([(STORAGE_RESOURCE.to_string(), Quantity(size.to_string()))]);

    // -------------------------------------------------------------------------
    // Storage volume

    let volume = PersistentVolume {
        metadata: metadata(Child::Volume),
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            capacity: Some(capacity.to_owned()),
            persistent_volume_reclaim_policy: Some(RECLAIM_POLICY.to_string()),
            storage_class_name: Some(storage.class_name.to_owned()),
            volume_mode: Some(VOLUME_MODE.to_string()),
            nfs: Some(NFSVolumeSource {
                server: storage.server.to_owned(),
                path: format!("{}/{}", storage.base_path.trim_end_matches('/'), name),
                read_only: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    // -------------------------------------------------------------------------
    // Storage claim

    let claim = PersistentVolumeClaim {
        metadata: metadata(Child::Claim),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            resources: Some(ResourceRequirements {
                requests: Some(capacity),
                ..Default::default()
            }),
            storage_class_name: Some(storage.class_name.to_owned()),
            volume_name: Some(Child::Volume.name(&name)),
            ..Default::default()
        }),
        ..Default::default()
    };

    // -------------------------------------------------------------------------
    // Workload

    let env = |name: &str, value: &str| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    };

    let probe = |initial_delay_seconds: i32, period_seconds: i32| Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "mysqladmin".to_string(),
                "ping".to_string(),
                "-h".to_string(),
                "localhost".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..Default::default()
    };

    let container = Container {
        name: database::CONTAINER_NAME.to_string(),
        image: Some(instance.image()),
        env: Some(vec![
            env("MYSQL_ROOT_PASSWORD", password),
            env("MYSQL_DATABASE", database),
            env("MYSQL_USER", database::ADMIN_USER),
            env("MYSQL_PASSWORD", password),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: database::PORT,
            name: Some(database::PORT_NAME.to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: database::VOLUME_NAME.to_string(),
            mount_path: database::DATA_DIRECTORY.to_string(),
            ..Default::default()
        }]),
        readiness_probe: Some(probe(30, 10)),
        liveness_probe: Some(probe(300, 30)),
        ..Default::default()
    };

    let workload = Deployment {
        metadata: metadata(Child::Workload),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.to_owned()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::Int(0)),
                    max_surge: Some(IntOrString::Int(1)),
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.to_owned()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: database::VOLUME_NAME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: Child::Claim.name(&name),
                            read_only: None,
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    // -------------------------------------------------------------------------
    // Network endpoint

    let endpoint = Service {
        metadata: metadata(Child::Endpoint),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(database::PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: database::PORT,
                target_port: Some(IntOrString::Int(database::PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(Children {
        volume,
        claim,
        workload,
        endpoint,
    })
}
