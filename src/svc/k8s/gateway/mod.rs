//! # Gateway module
//!
//! This module provide the narrow interface used by reconcilers to interact
//! with objects stored by the cluster. Outcomes that are part of the normal
//! flow of a reconciliation, such as an object which already exists or which
//! is already gone, are returned as values and not as errors.

use std::{
    fmt::{self, Debug, Display, Formatter},
    time::Duration,
};

use async_trait::async_trait;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};

pub mod client;
#[cfg(test)]
pub mod memory;

pub use client::KubeGateway;

// -----------------------------------------------------------------------------
// Object trait

/// a statically typed kubernetes object that could go through the gateway
pub trait Object:
    Resource<DynamicType = ()>
    + Serialize
    + DeserializeOwned
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
{
}

/// Blanklet implementation of [`Object`]
impl<T> Object for T where
    T: Resource<DynamicType = ()>
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug
        + Send
        + Sync
        + 'static
{
}

// -----------------------------------------------------------------------------
// Creation enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Creation {
    Created,
    AlreadyExists,
}

// -----------------------------------------------------------------------------
// Deletion enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Deletion {
    Deleted,
    NotFound,
}

// -----------------------------------------------------------------------------
// Cascade enumeration

/// propagation policy of a deletion to the dependents of the object
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum Cascade {
    #[default]
    Background,
    /// dependents are removed before the object itself
    Foreground,
}

impl Display for Cascade {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Background => write!(f, "Background"),
            Self::Foreground => write!(f, "Foreground"),
        }
    }
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("request on {0} '{1}' did not complete within {2:?}")]
    Timeout(String, String, Duration),
    #[error("{0} '{1}' has been modified concurrently, {2}")]
    Conflict(String, String, kube::Error),
    #[error("{0} '{1}' does not exist")]
    NotFound(String, String),
    #[error("failed to execute request on {0} '{1}', {2}")]
    Api(String, String, kube::Error),
    #[error("failed to convert {0} '{1}', {2}")]
    Convert(String, String, serde_json::Error),
}

// -----------------------------------------------------------------------------
// Gateway trait

/// create, read, update and delete typed cluster objects by namespace and
/// name. A `None` namespace designates a cluster wide object.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// create the object in the namespace given by its metadata
    async fn create<K>(&self, obj: &K) -> Result<Creation, Error>
    where
        K: Object;

    /// returns the object or `None` if it does not exist
    async fn get<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, Error>
    where
        K: Object;

    /// read the object, apply the mutator and write it back, a write racing
    /// with another one fails with [`Error::Conflict`]
    async fn update<K, F>(
        &self,
        namespace: Option<&str>,
        name: &str,
        mutator: F,
    ) -> Result<K, Error>
    where
        K: Object,
        F: FnOnce(&mut K) + Send;

    async fn patch<K>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<K, Error>
    where
        K: Object;

    async fn patch_status<K>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<K, Error>
    where
        K: Object;

    async fn delete<K>(
        &self,
        namespace: Option<&str>,
        name: &str,
        cascade: Cascade,
    ) -> Result<Deletion, Error>
    where
        K: Object;
}

// -----------------------------------------------------------------------------
// Helpers

/// returns the kind of the object as a string
pub fn kind<K>() -> String
where
    K: Resource<DynamicType = ()>,
{
    K::kind(&()).to_string()
}

/// returns the namespace of the object as given by its metadata
pub fn namespace<K>(obj: &K) -> Option<&str>
where
    K: Resource,
{
    obj.meta().namespace.as_deref()
}
