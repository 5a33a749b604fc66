//! # Reconciler module
//!
//! This module converge the children of a database instance toward their
//! desired state through a [`Gateway`].

use std::sync::Arc;

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolume, PersistentVolumeClaim, Service},
};
use tracing::{debug, error, info, warn};

use crate::svc::{
    cfg::Storage,
    crd::database::{DatabaseInstance, Status},
    database::{
        desired::{self, Children, ValidationError},
        status::{self, Replicas},
        Child, ReconcilerError,
    },
    k8s::gateway::{self, Creation, Deletion, Gateway},
};

// -----------------------------------------------------------------------------
// InstanceReconciler structure

pub struct InstanceReconciler<G> {
    gateway: Arc<G>,
    storage: Storage,
}

impl<G> InstanceReconciler<G>
where
    G: Gateway,
{
    pub fn new(gateway: Arc<G>, storage: Storage) -> Self {
        Self { gateway, storage }
    }

    /// returns the children the instance should have
    pub fn desired(&self, instance: &DatabaseInstance) -> Result<Children, ValidationError> {
        desired::build(instance, &self.storage)
    }

    async fn create_child(
        &self,
        child: Child,
        children: &Children,
    ) -> Result<Creation, gateway::Error> {
        match child {
            Child::Volume => self.gateway.create(&children.volume).await,
            Child::Claim => self.gateway.create(&children.claim).await,
            Child::Workload => self.gateway.create(&children.workload).await,
            Child::Endpoint => self.gateway.create(&children.endpoint).await,
        }
    }

    async fn delete_child(
        &self,
        child: Child,
        namespace: &str,
        instance: &str,
    ) -> Result<Deletion, gateway::Error> {
        let name = child.name(instance);
        let cascade = child.cascade();

        match child {
            Child::Volume => {
                self.gateway
                    .delete::<PersistentVolume>(None, &name, cascade)
                    .await
            }
            Child::Claim => {
                self.gateway
                    .delete::<PersistentVolumeClaim>(Some(namespace), &name, cascade)
                    .await
            }
            Child::Workload => {
                self.gateway
                    .delete::<Deployment>(Some(namespace), &name, cascade)
                    .await
            }
            Child::Endpoint => {
                self.gateway
                    .delete::<Service>(Some(namespace), &name, cascade)
                    .await
            }
        }
    }

    /// create every child in order, an existing child counts as created. On
    /// failure, children created by this call are deleted again and the
    /// failure is returned as terminal. Children which already existed are
    /// left untouched.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self, children)))]
    pub async fn create(
        &self,
        namespace: &str,
        name: &str,
        children: &Children,
    ) -> Result<(), ReconcilerError> {
        let mut created = vec![];

        for child in Child::CREATION_ORDER {
            let child_name = child.name(name);

            match self.create_child(child, children).await {
                Ok(creation) => {
                    info!(
                        namespace = namespace,
                        name = name,
                        child = child.to_string(),
                        kind = child.kind(),
                        child_name = &child_name,
                        created = creation == Creation::Created,
                        "Ensure child of database instance exists",
                    );

                    if creation == Creation::Created {
                        created.push(child);
                    }
                }
                Err(err) => {
                    error!(
                        namespace = namespace,
                        name = name,
                        child = child.to_string(),
                        kind = child.kind(),
                        child_name = &child_name,
                        error = err.to_string(),
                        "Failed to create child of database instance, rollback",
                    );

                    self.rollback(namespace, name, &created).await;
                    return Err(ReconcilerError::Terminal(child, child_name, err));
                }
            }
        }

        Ok(())
    }

    /// delete the given children in reverse order, failures are only logged
    async fn rollback(&self, namespace: &str, name: &str, created: &[Child]) {
        for child in created.iter().rev() {
            if let Err(err) = self.delete_child(*child, namespace, name).await {
                warn!(
                    namespace = namespace,
                    name = name,
                    child = child.to_string(),
                    kind = child.kind(),
                    error = err.to_string(),
                    "Failed to delete child of database instance during rollback",
                );
            }
        }
    }

    /// set the image of the workload, any failure is retryable
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn update(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
    ) -> Result<(), ReconcilerError> {
        let workload = Child::Workload.name(name);
        let image = image.to_string();

        info!(
            namespace = namespace,
            name = name,
            workload = &workload,
            image = &image,
            "Update image of database instance workload",
        );

        self.gateway
            .update::<Deployment, _>(Some(namespace), &workload, move |deployment| {
                let container = deployment
                    .spec
                    .as_mut()
                    .and_then(|spec| spec.template.spec.as_mut())
                    .and_then(|spec| spec.containers.first_mut());

                if let Some(container) = container {
                    container.image = Some(image);
                }
            })
            .await
            .map(|_| ())
            .map_err(|err| ReconcilerError::Retryable(workload, err))
    }

    /// attempt to delete every child, returns the failures
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn delete(&self, namespace: &str, name: &str) -> Vec<(Child, gateway::Error)> {
        let mut failures = vec![];

        for child in Child::DELETION_ORDER {
            match self.delete_child(child, namespace, name).await {
                Ok(Deletion::Deleted) => {
                    info!(
                        namespace = namespace,
                        name = name,
                        child = child.to_string(),
                        kind = child.kind(),
                        "Delete child of database instance",
                    );
                }
                Ok(Deletion::NotFound) => {
                    debug!(
                        namespace = namespace,
                        name = name,
                        child = child.to_string(),
                        kind = child.kind(),
                        "Child of database instance is already gone",
                    );
                }
                Err(err) => {
                    error!(
                        namespace = namespace,
                        name = name,
                        child = child.to_string(),
                        kind = child.kind(),
                        error = err.to_string(),
                        "Failed to delete child of database instance",
                    );

                    failures.push((child, err));
                }
            }
        }

        failures
    }

    /// returns the status of the instance given by its workload
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn observe(&self, namespace: &str, name: &str) -> Status {
        let workload = Child::Workload.name(name);

        match self.gateway.get::<Deployment>(Some(namespace), &workload).await {
            Ok(Some(deployment)) => status::project(name, Replicas::from(&deployment)),
            Ok(None) => status::failure(&format!("workload '{workload}' does not exist")),
            Err(err) => {
                warn!(
                    namespace = namespace,
                    name = name,
                    workload = &workload,
                    error = err.to_string(),
                    "Failed to observe workload of database instance",
                );

                status::failure(&err.to_string())
            }
        }
    }
}
