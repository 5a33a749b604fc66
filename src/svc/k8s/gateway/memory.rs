//! # Memory module
//!
//! This module provide an in-memory [`Gateway`] which records every request it
//! receives and could be told to fail some of them.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use kube::{core::ErrorResponse, Resource};
use serde_json::Value;

use crate::svc::k8s::gateway::{self, Cascade, Creation, Deletion, Error, Gateway, Object};

// -----------------------------------------------------------------------------
// Verb enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum Verb {
    Create,
    Get,
    Update,
    Patch,
    PatchStatus,
    Delete,
}

// -----------------------------------------------------------------------------
// Call structure

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub cascade: Option<Cascade>,
}

// -----------------------------------------------------------------------------
// MemoryGateway structure

type Key = (String, Option<String>, String);

#[derive(Default, Debug)]
pub struct MemoryGateway {
    objects: Mutex<BTreeMap<Key, Value>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<BTreeSet<(Verb, String)>>,
}

impl MemoryGateway {
    /// make every request with the given verb on the given kind fail
    pub fn fail(&self, verb: Verb, kind: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((verb, kind.to_string()));
    }

    pub fn heal(&self) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// store the object without recording a call
    pub fn insert<K>(&self, obj: &K)
    where
        K: Object,
    {
        let key = (
            gateway::kind::<K>(),
            obj.meta().namespace.to_owned(),
            obj.meta().name.to_owned().unwrap_or_default(),
        );

        let value = serde_json::to_value(obj).expect("object to be serializable");
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    /// returns the stored object without recording a call
    pub fn object<K>(&self, namespace: Option<&str>, name: &str) -> Option<K>
    where
        K: Object,
    {
        let key = (
            gateway::kind::<K>(),
            namespace.map(ToString::to_string),
            name.to_string(),
        );

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(|value| serde_json::from_value(value.to_owned()).expect("object to be valid"))
    }

    pub fn contains<K>(&self, namespace: Option<&str>, name: &str) -> bool
    where
        K: Object,
    {
        self.object::<K>(namespace, name).is_some()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_owned()
    }

    /// returns the calls made on the given kinds, in order
    pub fn calls_on(&self, kinds: &[&str]) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| kinds.contains(&call.kind.as_str()))
            .collect()
    }

    /// record the call, yield to the scheduler and fail if asked to
    async fn enter(
        &self,
        verb: Verb,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        cascade: Option<Cascade>,
    ) -> Result<(), Error> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Call {
                verb,
                kind: kind.to_string(),
                namespace: namespace.map(ToString::to_string),
                name: name.to_string(),
                cascade,
            });

        tokio::task::yield_now().await;

        let failing = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(verb, kind.to_string()));

        if failing {
            return Err(Error::Api(
                kind.to_string(),
                name.to_string(),
                kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "injected failure".to_string(),
                    reason: "InternalError".to_string(),
                    code: 500,
                }),
            ));
        }

        Ok(())
    }

    fn key(kind: &str, namespace: Option<&str>, name: &str) -> Key {
        (
            kind.to_string(),
            namespace.map(ToString::to_string),
            name.to_string(),
        )
    }

    fn apply(
        &self,
        kind: String,
        namespace: Option<&str>,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<Value, Error> {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let value = match objects.get_mut(&Self::key(&kind, namespace, name)) {
            Some(value) => value,
            None => return Err(Error::NotFound(kind, name.to_string())),
        };

        json_patch::patch(value, patch).map_err(|err| {
            Error::Api(
                kind.to_owned(),
                name.to_string(),
                kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: err.to_string(),
                    reason: "Invalid".to_string(),
                    code: 422,
                }),
            )
        })?;

        Ok(value.to_owned())
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn create<K>(&self, obj: &K) -> Result<Creation, Error>
    where
        K: Object,
    {
        let kind = gateway::kind::<K>();
        let name = obj.meta().name.to_owned().unwrap_or_default();
        let namespace = gateway::namespace(obj);

        self.enter(Verb::Create, &kind, namespace, &name, None).await?;

        let value = serde_json::to_value(obj)
            .map_err(|err| Error::Convert(kind.to_owned(), name.to_owned(), err))?;

        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let key = Self::key(&kind, namespace, &name);
        if objects.contains_key(&key) {
            return Ok(Creation::AlreadyExists);
        }

        objects.insert(key, value);
        Ok(Creation::Created)
    }

    async fn get<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, Error>
    where
        K: Object,
    {
        let kind = gateway::kind::<K>();

        self.enter(Verb::Get, &kind, namespace, name, None).await?;

        let value = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(&kind, namespace, name))
            .cloned();

        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| Error::Convert(kind, name.to_string(), err))
    }

    async fn update<K, F>(
        &self,
        namespace: Option<&str>,
        name: &str,
        mutator: F,
    ) -> Result<K, Error>
    where
        K: Object,
        F: FnOnce(&mut K) + Send,
    {
        let kind = gateway::kind::<K>();

        self.enter(Verb::Update, &kind, namespace, name, None).await?;

        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let value = match objects.get_mut(&Self::key(&kind, namespace, name)) {
            Some(value) => value,
            None => return Err(Error::NotFound(kind, name.to_string())),
        };

        let mut obj: K = serde_json::from_value(value.to_owned())
            .map_err(|err| Error::Convert(kind.to_owned(), name.to_string(), err))?;
        mutator(&mut obj);

        *value = serde_json::to_value(&obj)
            .map_err(|err| Error::Convert(kind.to_owned(), name.to_string(), err))?;

        Ok(obj)
    }

    async fn patch<K>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<K, Error>
    where
        K: Object,
    {
        let kind = gateway::kind::<K>();

        self.enter(Verb::Patch, &kind, namespace, name, None).await?;

        let value = self.apply(kind.to_owned(), namespace, name, &patch)?;
        serde_json::from_value(value).map_err(|err| Error::Convert(kind, name.to_string(), err))
    }

    async fn patch_status<K>(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch: json_patch::Patch,
    ) -> Result<K, Error>
    where
        K: Object,
    {
        let kind = gateway::kind::<K>();

        self.enter(Verb::PatchStatus, &kind, namespace, name, None)
            .await?;

        let value = self.apply(kind.to_owned(), namespace, name, &patch)?;
        serde_json::from_value(value).map_err(|err| Error::Convert(kind, name.to_string(), err))
    }

    async fn delete<K>(
        &self,
        namespace: Option<&str>,
        name: &str,
        cascade: Cascade,
    ) -> Result<Deletion, Error>
    where
        K: Object,
    {
        let kind = gateway::kind::<K>();

        self.enter(Verb::Delete, &kind, namespace, name, Some(cascade))
            .await?;

        let removed = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(&kind, namespace, name));

        Ok(match removed {
            Some(_) => Deletion::Deleted,
            None => Deletion::NotFound,
        })
    }
}
