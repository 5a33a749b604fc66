//! # Dispatch module
//!
//! This module route the events received for a database instance to the
//! matching reconciliation path. Events of one instance are handled one at a
//! time, the instance is read again once its lock is held.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use kube::runtime::controller::Action;
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::{debug, error, info, warn};

use crate::svc::{
    cfg::Configuration,
    crd::database::{self, DatabaseInstance, Phase, Status},
    database::{InstanceReconciler, ReconcilerError, ValidationError, FINALIZER},
    k8s::{
        finalizer,
        gateway::{self, Gateway},
        lock::Locks,
        recorder, resource,
    },
};

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static DISPATCH_EVENT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_operator_dispatch_event",
            "number of events dispatched to a reconciliation path",
        ),
        &["namespace", "event"]
    )
    .expect("metrics 'kubernetes_operator_dispatch_event' to not be already registered")
});

// -----------------------------------------------------------------------------
// Event enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Event {
    Create,
    Update,
    Delete,
    /// periodic observation of the instance
    Tick,
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Tick => write!(f, "tick"),
        }
    }
}

/// returns the event matching the state of the instance. An instance which
/// failed to be created goes through creation again once its generation
/// changes.
pub fn classify(instance: &DatabaseInstance) -> Event {
    if resource::deleted(instance) {
        return Event::Delete;
    }

    match &instance.status {
        None => Event::Create,
        Some(status) if status.observed_generation.is_none() => Event::Create,
        Some(status) if status.observed_generation != instance.metadata.generation => {
            if status.is(Phase::Error) {
                Event::Create
            } else {
                Event::Update
            }
        }
        Some(_) => Event::Tick,
    }
}

fn identity(instance: &DatabaseInstance) -> Result<(String, String), ReconcilerError> {
    resource::namespaced_name(instance)
        .map_err(|err| ReconcilerError::Validation(ValidationError::Identity(err)))
}

// -----------------------------------------------------------------------------
// Dispatcher structure

pub struct Dispatcher<G> {
    gateway: Arc<G>,
    reconciler: InstanceReconciler<G>,
    locks: Locks,
    monitor_interval: Duration,
}

impl<G> Dispatcher<G>
where
    G: Gateway,
{
    pub fn new(gateway: Arc<G>, config: &Configuration) -> Self {
        Self {
            reconciler: InstanceReconciler::new(gateway.to_owned(), config.storage.to_owned()),
            gateway,
            locks: Locks::default(),
            monitor_interval: config.operator.monitor_interval(),
        }
    }

    /// read the instance and handle the event matching its state
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn dispatch(&self, namespace: &str, name: &str) -> Result<Action, ReconcilerError> {
        let _guard = self.locks.acquire(namespace, name).await;

        let instance = match self
            .gateway
            .get::<DatabaseInstance>(Some(namespace), name)
            .await?
        {
            Some(instance) => instance,
            None => {
                debug!(
                    namespace = namespace,
                    name = name,
                    "Database instance is already gone, nothing to do",
                );

                return Ok(Action::await_change());
            }
        };

        let event = classify(&instance);
        self.route(event, instance).await
    }

    /// handle the given event for the instance. A deletion is always carried
    /// out, other events follow the state of the instance read once the lock
    /// is held, so a redelivered event does not run its path again.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self, instance)))]
    pub async fn handle(
        &self,
        event: Event,
        instance: &DatabaseInstance,
    ) -> Result<Action, ReconcilerError> {
        let (namespace, name) = identity(instance)?;
        let _guard = self.locks.acquire(&namespace, &name).await;

        match self
            .gateway
            .get::<DatabaseInstance>(Some(&namespace), &name)
            .await?
        {
            Some(instance) if event == Event::Delete => self.route(event, instance).await,
            Some(instance) => {
                let current = classify(&instance);
                if current != event {
                    debug!(
                        namespace = &namespace,
                        name = &name,
                        event = event.to_string(),
                        current = current.to_string(),
                        "Follow the state of database instance instead of the event",
                    );
                }

                self.route(current, instance).await
            }
            None if event == Event::Delete => {
                // the instance is gone, only its children are left to clean
                self.reconciler.delete(&namespace, &name).await;
                Ok(Action::await_change())
            }
            None => Ok(Action::await_change()),
        }
    }

    async fn route(
        &self,
        event: Event,
        instance: DatabaseInstance,
    ) -> Result<Action, ReconcilerError> {
        let (namespace, name) = identity(&instance)?;

        info!(
            namespace = &namespace,
            name = &name,
            event = event.to_string(),
            generation = instance.metadata.generation,
            "Received event for database instance",
        );

        #[cfg(feature = "metrics")]
        DISPATCH_EVENT
            .with_label_values(&[&namespace, &event.to_string()])
            .inc();

        match event {
            Event::Create => self.on_create(&namespace, &name, instance).await,
            Event::Update => self.on_update(&namespace, &name, instance).await,
            Event::Delete => self.on_delete(&namespace, &name, instance).await,
            Event::Tick => self.on_tick(&namespace, &name, instance).await,
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation paths

    async fn on_create(
        &self,
        namespace: &str,
        name: &str,
        instance: DatabaseInstance,
    ) -> Result<Action, ReconcilerError> {
        let generation = instance.metadata.generation;
        let recreation = instance
            .status
            .as_ref()
            .and_then(|status| status.observed_generation)
            .is_some();

        // ---------------------------------------------------------------------
        // Step 1: validate the instance before any other request

        let children = match self.reconciler.desired(&instance) {
            Ok(children) => children,
            Err(err) => {
                warn!(
                    namespace = namespace,
                    name = name,
                    error = err.to_string(),
                    "Database instance is not valid",
                );

                let status = Status::error(err.to_string()).with_observed_generation(generation);
                let instance = self.write_status(namespace, name, &instance, status).await?;
                self.record(&instance, true, database::Action::Validate, &err.to_string())
                    .await;

                return Ok(Action::await_change());
            }
        };

        // ---------------------------------------------------------------------
        // Step 2: set finalizer

        let instance = self.ensure_finalizer(namespace, name, instance).await?;

        // ---------------------------------------------------------------------
        // Step 3: create children

        if let Err(err) = self.reconciler.create(namespace, name, &children).await {
            error!(
                namespace = namespace,
                name = name,
                error = err.to_string(),
                "Failed to create database instance",
            );

            let status = Status::error(format!("Creation failed: {err}"))
                .with_observed_generation(generation);
            let instance = self.write_status(namespace, name, &instance, status).await?;
            self.record(&instance, true, database::Action::CreateChildren, &err.to_string())
                .await;

            return Ok(Action::await_change());
        }

        if recreation {
            // children left by a previous attempt keep their former image
            if let Err(err) = self.reconciler.update(namespace, name, &instance.image()).await {
                warn!(
                    namespace = namespace,
                    name = name,
                    error = err.to_string(),
                    "Failed to set image of existing workload",
                );
            }
        }

        let status = Status::creating(name).with_observed_generation(generation);
        let instance = self.write_status(namespace, name, &instance, status).await?;

        let message = format!("Create children of database instance '{name}'");
        self.record(&instance, false, database::Action::CreateChildren, &message)
            .await;

        Ok(Action::requeue(self.monitor_interval))
    }

    async fn on_update(
        &self,
        namespace: &str,
        name: &str,
        instance: DatabaseInstance,
    ) -> Result<Action, ReconcilerError> {
        let generation = instance.metadata.generation;
        let instance = self.ensure_finalizer(namespace, name, instance).await?;
        let image = instance.image();

        match self.reconciler.update(namespace, name, &image).await {
            Ok(()) => {
                let status = Status::updating(name).with_observed_generation(generation);
                let instance = self.write_status(namespace, name, &instance, status).await?;

                let message = format!("Set image of database instance workload to '{image}'");
                self.record(&instance, false, database::Action::UpdateWorkload, &message)
                    .await;

                Ok(Action::requeue(self.monitor_interval))
            }
            Err(err) => {
                // the generation is left untouched to go through the update
                // path again on the next attempt
                let observed = instance
                    .status
                    .as_ref()
                    .and_then(|status| status.observed_generation);
                let status = Status::new(Phase::Updating, false, format!("Update failed: {err}"))
                    .with_observed_generation(observed);

                match self.write_status(namespace, name, &instance, status).await {
                    Ok(instance) => {
                        let message = err.to_string();
                        self.record(&instance, true, database::Action::UpdateWorkload, &message)
                            .await;
                    }
                    Err(write) => {
                        warn!(
                            namespace = namespace,
                            name = name,
                            error = write.to_string(),
                            "Failed to write status of database instance",
                        );
                    }
                }

                Err(err)
            }
        }
    }

    async fn on_delete(
        &self,
        namespace: &str,
        name: &str,
        instance: DatabaseInstance,
    ) -> Result<Action, ReconcilerError> {
        let instance = match self
            .write_status(namespace, name, &instance, Status::deleting(name))
            .await
        {
            Ok(modified) => modified,
            Err(err) => {
                warn!(
                    namespace = namespace,
                    name = name,
                    error = err.to_string(),
                    "Failed to write status of database instance",
                );

                instance
            }
        };

        let failures = self.reconciler.delete(namespace, name).await;
        if failures.is_empty() {
            let message = format!("Delete children of database instance '{name}'");
            self.record(&instance, false, database::Action::DeleteChildren, &message)
                .await;
        } else {
            let children: Vec<_> = failures.iter().map(|(child, _)| child.to_string()).collect();
            let message = format!(
                "Failed to delete children of database instance '{}': {}",
                name,
                children.join(", ")
            );
            self.record(&instance, true, database::Action::DeleteChildren, &message)
                .await;
        }

        // ---------------------------------------------------------------------
        // Remove finalizer, children failures never block the deletion

        if finalizer::contains(&instance, FINALIZER) {
            info!(
                namespace = namespace,
                name = name,
                "Remove finalizer from database instance",
            );

            let modified = finalizer::remove(instance.to_owned(), FINALIZER);
            let patch = resource::diff(&instance, &modified).map_err(ReconcilerError::Diff)?;

            match self
                .gateway
                .patch::<DatabaseInstance>(Some(namespace), name, patch)
                .await
            {
                Ok(_) | Err(gateway::Error::NotFound(..)) => {}
                Err(err) => return Err(err.into()),
            }

            let message = format!("Delete finalizer '{FINALIZER}'");
            self.record(&instance, false, database::Action::DeleteFinalizer, &message)
                .await;
        }

        Ok(Action::await_change())
    }

    async fn on_tick(
        &self,
        namespace: &str,
        name: &str,
        instance: DatabaseInstance,
    ) -> Result<Action, ReconcilerError> {
        let current = instance.status.to_owned().unwrap_or_default();
        let observed = self.reconciler.observe(namespace, name).await;

        // keep the reason of a former failure instead of the observation one
        if current.is(Phase::Error) && observed.is(Phase::Error) {
            debug!(
                namespace = namespace,
                name = name,
                "Database instance is still failing, keep its status",
            );

            return Ok(Action::requeue(self.monitor_interval));
        }

        let status = observed.with_observed_generation(current.observed_generation);
        let transition = status.phase != current.phase;
        let instance = self
            .write_status(namespace, name, &instance, status.to_owned())
            .await?;

        if transition {
            let phase = status.phase.map(|phase| phase.to_string()).unwrap_or_default();
            let message = status.message.to_owned().unwrap_or_default();

            info!(
                namespace = namespace,
                name = name,
                phase = &phase,
                "Database instance changed phase",
            );

            self.record(&instance, status.is(Phase::Error), database::Action::Observe, &message)
                .await;
        }

        Ok(Action::requeue(self.monitor_interval))
    }

    // -------------------------------------------------------------------------
    // Helpers

    async fn ensure_finalizer(
        &self,
        namespace: &str,
        name: &str,
        instance: DatabaseInstance,
    ) -> Result<DatabaseInstance, ReconcilerError> {
        if finalizer::contains(&instance, FINALIZER) {
            return Ok(instance);
        }

        info!(
            namespace = namespace,
            name = name,
            "Set finalizer on database instance",
        );

        let modified = finalizer::add(instance.to_owned(), FINALIZER);
        let patch = resource::diff(&instance, &modified).map_err(ReconcilerError::Diff)?;
        let modified = self
            .gateway
            .patch::<DatabaseInstance>(Some(namespace), name, patch)
            .await?;

        let message = format!("Create finalizer '{FINALIZER}'");
        self.record(&modified, false, database::Action::UpsertFinalizer, &message)
            .await;

        Ok(modified)
    }

    /// write the status of the instance if it differs from the current one
    async fn write_status(
        &self,
        namespace: &str,
        name: &str,
        instance: &DatabaseInstance,
        status: Status,
    ) -> Result<DatabaseInstance, ReconcilerError> {
        if instance.status.as_ref() == Some(&status) {
            debug!(
                namespace = namespace,
                name = name,
                "Status of database instance is up to date",
            );

            return Ok(instance.to_owned());
        }

        debug!(
            namespace = namespace,
            name = name,
            phase = status.phase.map(|phase| phase.to_string()),
            ready = status.ready,
            "Update status of database instance",
        );

        let mut modified = instance.to_owned();
        modified.status = Some(status);

        let patch = resource::diff(instance, &modified).map_err(ReconcilerError::Diff)?;
        Ok(self
            .gateway
            .patch_status::<DatabaseInstance>(Some(namespace), name, patch)
            .await?)
    }

    /// record an event on the instance, failures are only logged
    async fn record(
        &self,
        instance: &DatabaseInstance,
        warning: bool,
        action: database::Action,
        message: &str,
    ) {
        let result = if warning {
            recorder::warning(&*self.gateway, instance, &action, message).await
        } else {
            recorder::normal(&*self.gateway, instance, &action, message).await
        };

        if let Err(err) = result {
            warn!(
                action = action.to_string(),
                error = err.to_string(),
                "Failed to record event on database instance",
            );
        }
    }
}
