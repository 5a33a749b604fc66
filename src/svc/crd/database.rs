//! # Database instance
//!
//! This module provide the database instance custom resource and its
//! definition

use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    runtime::{controller, watcher, Controller},
    Api, CustomResource, ResourceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::svc::{
    database::{self, ReconcilerError},
    k8s::{self, Context, ControllerBuilder},
};

// -----------------------------------------------------------------------------
// Constants

pub const REDACTED: &str = "<redacted>";

// -----------------------------------------------------------------------------
// Password structure

/// a credential which never shows up in logs, its [`Debug`] and [`Display`]
/// implementations print a placeholder
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(transparent)]
pub struct Password(String);

impl From<String> for Password {
    fn from(password: String) -> Self {
        Self(password)
    }
}

impl From<&str> for Password {
    fn from(password: &str) -> Self {
        Self(password.to_string())
    }
}

impl Debug for Password {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Password({REDACTED})")
    }
}

impl Display for Password {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{REDACTED}")
    }
}

impl Password {
    /// returns the credential in plaintext, the value must only end up in
    /// manifests sent to the cluster
    pub fn expose(&self) -> &str {
        &self.0
    }
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[kube(group = "example.org")]
#[kube(version = "v1")]
#[kube(kind = "DatabaseInstance")]
#[kube(singular = "databaseinstance")]
#[kube(plural = "databaseinstances")]
#[kube(shortname = "dbi")]
#[kube(status = "Status")]
#[kube(namespaced)]
#[kube(derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"Phase", "type":"string", "description":"Phase of the instance", "jsonPath":".status.phase"}"#
)]
#[kube(
    printcolumn = r#"{"name":"Ready", "type":"boolean", "description":"Readiness of the instance", "jsonPath":".status.ready"}"#
)]
#[kube(
    printcolumn = r#"{"name":"Image", "type":"string", "description":"Image of the database", "jsonPath":".spec.image"}"#
)]
pub struct Spec {
    #[serde(rename = "image", default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "database", default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(rename = "password", default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Password>,
    #[serde(rename = "storageSize", default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,
}

// -----------------------------------------------------------------------------
// Phase enumeration

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Phase {
    Creating,
    Updating,
    Running,
    NotReady,
    Error,
    Deleting,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "Creating"),
            Self::Updating => write!(f, "Updating"),
            Self::Running => write!(f, "Running"),
            Self::NotReady => write!(f, "NotReady"),
            Self::Error => write!(f, "Error"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

// -----------------------------------------------------------------------------
// Status structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Status {
    #[serde(rename = "phase", default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "ready", default)]
    pub ready: bool,
    /// generation of the resource last acted upon by the create or update path
    #[serde(
        rename = "observedGeneration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_generation: Option<i64>,
}

impl Status {
    pub fn new(phase: Phase, ready: bool, message: String) -> Self {
        Self {
            phase: Some(phase),
            message: Some(message),
            ready,
            observed_generation: None,
        }
    }

    pub fn creating(name: &str) -> Self {
        Self::new(
            Phase::Creating,
            false,
            format!("Database instance {name} is being created"),
        )
    }

    pub fn updating(name: &str) -> Self {
        Self::new(
            Phase::Updating,
            false,
            format!("Database instance {name} is being updated"),
        )
    }

    pub fn deleting(name: &str) -> Self {
        Self::new(
            Phase::Deleting,
            false,
            format!("Database instance {name} is being deleted"),
        )
    }

    pub fn running(name: &str) -> Self {
        Self::new(
            Phase::Running,
            true,
            format!("Database instance {name} is ready"),
        )
    }

    pub fn not_ready(name: &str) -> Self {
        Self::new(
            Phase::NotReady,
            false,
            format!("Database instance {name} is not ready yet"),
        )
    }

    pub fn error(message: String) -> Self {
        Self::new(Phase::Error, false, message)
    }

    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    pub fn is(&self, phase: Phase) -> bool {
        self.phase == Some(phase)
    }
}

// -----------------------------------------------------------------------------
// Action enumeration

/// reasons of the events recorded on a database instance
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum Action {
    UpsertFinalizer,
    CreateChildren,
    UpdateWorkload,
    DeleteChildren,
    DeleteFinalizer,
    Validate,
    Observe,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::UpsertFinalizer => write!(f, "UpsertFinalizer"),
            Self::CreateChildren => write!(f, "CreateChildren"),
            Self::UpdateWorkload => write!(f, "UpdateWorkload"),
            Self::DeleteChildren => write!(f, "DeleteChildren"),
            Self::DeleteFinalizer => write!(f, "DeleteFinalizer"),
            Self::Validate => write!(f, "Validate"),
            Self::Observe => write!(f, "Observe"),
        }
    }
}

// -----------------------------------------------------------------------------
// Reconciler structure

#[derive(Clone, Default, Debug)]
pub struct Reconciler {}

impl ControllerBuilder<DatabaseInstance> for Reconciler {
    fn build(&self, state: Arc<Context>) -> Controller<DatabaseInstance> {
        let client = state.kube.to_owned();
        let deployment = Api::<Deployment>::all(client.to_owned());

        Controller::new(Api::all(client), watcher::Config::default())
            .owns(deployment, watcher::Config::default())
    }
}

#[async_trait]
impl k8s::Reconciler<DatabaseInstance> for Reconciler {
    type Error = ReconcilerError;

    async fn reconcile(
        obj: Arc<DatabaseInstance>,
        ctx: Arc<Context>,
    ) -> Result<controller::Action, ReconcilerError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        ctx.dispatcher.dispatch(&namespace, &name).await
    }

    fn retry(
        obj: Arc<DatabaseInstance>,
        err: &ReconcilerError,
        ctx: Arc<Context>,
    ) -> controller::Action {
        let operator = &ctx.config.operator;
        let delay = if err.is_retryable() {
            operator.retry_delay()
        } else {
            operator.monitor_interval()
        };

        warn!(
            namespace = obj.namespace(),
            name = obj.name_any(),
            delay = delay.as_secs(),
            error = err.to_string(),
            "Requeue failed reconciliation",
        );

        controller::Action::requeue(delay)
    }
}

impl From<controller::Error<Self, watcher::Error>> for ReconcilerError {
    fn from(err: controller::Error<ReconcilerError, watcher::Error>) -> Self {
        debug!(error = err.to_string(), "Wrap controller error");
        Self::Reconcile(err.to_string())
    }
}

// -----------------------------------------------------------------------------
// Helpers

impl DatabaseInstance {
    /// returns the image requested by the instance or the default one
    pub fn image(&self) -> String {
        self.spec
            .image
            .to_owned()
            .filter(|image| !image.is_empty())
            .unwrap_or_else(|| database::DEFAULT_IMAGE.to_string())
    }
}
