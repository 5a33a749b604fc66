//! # Client module
//!
//! This module provide the [`Gateway`] implementation backed by the kubernetes
//! api. Every request is bounded by a timeout.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use kube::{
    api::{ApiResource, DeleteParams, DynamicObject, Patch, PatchParams, PostParams},
    Api, Resource,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tokio::time::timeout;
use tracing::debug;

use crate::svc::k8s::gateway::{self, Cascade, Creation, Deletion, Error, Gateway, Object};

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static GATEWAY_REQUEST: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_operator_gateway_request",
            "number of requests sent to the kubernetes api",
        ),
        &["kind", "verb", "outcome"]
    )
    .expect("metrics 'kubernetes_operator_gateway_request' to not be already registered")
});

// -----------------------------------------------------------------------------
// Constants

pub const REASON_ALREADY_EXISTS: &str = "AlreadyExists";

// -----------------------------------------------------------------------------
// KubeGateway structure

#[derive(Clone)]
pub struct KubeGateway {
    client: kube::Client,
    timeout: Duration,
}

impl KubeGateway {
    pub fn new(client: kube::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<DynamicObject>
    where
        K: Object,
    {
        let resource = ApiResource::erase::<K>(&());

        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.to_owned(), namespace, &resource),
            None => Api::all_with(self.client.to_owned(), &resource),
        }
    }

    /// run the request and fail if it does not complete in time
    async fn timed<T, F>(
        &self,
        kind: &str,
        name: &str,
        verb: &str,
        fut: F,
    ) -> Result<Result<T, kube::Error>, Error>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        debug!(
            kind = kind,
            name = name,
            verb = verb,
            "Execute request on kubernetes api"
        );
        let result = timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Timeout(kind.to_string(), name.to_string(), self.timeout));

        #[cfg(feature = "metrics")]
        GATEWAY_REQUEST
            .with_label_values(&[
                kind,
                verb,
                match &result {
                    Ok(Ok(_)) => "success",
                    Ok(Err(_)) => "failure",
                    Err(_) => "timeout",
                },
            ])
            .inc();

        result
    }
}

// -----------------------------------------------------------------------------
// Conversion helpers

fn erase<K>(obj: &K) -> Result<DynamicObject, serde_json::Error>
where
    K: Object,
{
    serde_json::from_value(serde_json::to_value(obj)?)
}

fn restore<K>(obj: DynamicObject) -> Result<K, serde_json::Error>
where
    K: Object,
{
    serde_json::from_value(serde_json::to_value(obj)?)
}

fn code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

#[async_trait]
impl Gateway for KubeGateway {
    async fn create<K>(&self, obj: &K) -> Result<Creation, Error>
    where
        K: Object,
    {
        let kind = gateway::kind::<K>();
        let name = obj.meta().name.to_owned().unwrap_or_default();
        let api = self.api::<K>(gateway::namespace(obj));
        let data =
            erase(obj).map_err(|err| Error::Convert(kind.to_owned(), name.to_owned(), err))?;

        match self
            .timed(&kind, &name, "create", api.create(&PostParams::default(), &data))
            .await?
        {
            Ok(_) => Ok(Creation::Created),
            Err(kube::Error::Api(response))
                if response.code == 409 && response.reason == REASON_ALREADY_EXISTS =>
            {
                Ok(Creation::AlreadyExists)
            }
            Err(err) => Err(Error::Api(kind, name, err)),
        }
    }

    async fn get<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, Error>
    where
        K: Object,
    {
        let kind = gateway::kind::<K>();
        let api = self.api::<K>(namespace);

        match self.timed(&kind, name, "get", api.get_opt(name)).await? {
            Ok(Some(obj)) => restore(obj)
                .map(Some)
                .map_err(|err| Error::Convert(kind, name.to_string(), err)),
            Ok(None) => Ok(None),
            Err(err) => Err(Error::Api(kind, name.to_string(), err)),
        }
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
        let api = self.api::<K>(namespace);

        let current = match self.timed(&kind, name, "get", api.get_opt(name)).await? {
            Ok(Some(obj)) => obj,
            Ok(None) => return Err(Error::NotFound(kind, name.to_string())),
            Err(err) => return Err(Error::Api(kind, name.to_string(), err)),
        };

        let mut obj: K = restore(current.to_owned())
            .map_err(|err| Error::Convert(kind.to_owned(), name.to_string(), err))?;
        mutator(&mut obj);

        let modified =
            erase(&obj).map_err(|err| Error::Convert(kind.to_owned(), name.to_string(), err))?;
        if modified.data == current.data && modified.metadata == current.metadata {
            debug!(kind = &kind, name = name, "Skip update request, no modification to apply");
            return Ok(obj);
        }

        // the resource version read above makes the replace request fail if
        // the object has been written in the meantime
        match self
            .timed(
                &kind,
                name,
                "update",
                api.replace(name, &PostParams::default(), &modified),
            )
            .await?
        {
            Ok(obj) => restore(obj).map_err(|err| Error::Convert(kind, name.to_string(), err)),
            Err(err) if code(&err) == Some(409) => {
                Err(Error::Conflict(kind, name.to_string(), err))
            }
            Err(err) if code(&err) == Some(404) => Err(Error::NotFound(kind, name.to_string())),
            Err(err) => Err(Error::Api(kind, name.to_string(), err)),
        }
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
        let api = self.api::<K>(namespace);
        let patch = Patch::Json::<()>(patch);

        match self
            .timed(&kind, name, "patch", api.patch(name, &PatchParams::default(), &patch))
            .await?
        {
            Ok(obj) => restore(obj).map_err(|err| Error::Convert(kind, name.to_string(), err)),
            Err(err) if code(&err) == Some(404) => Err(Error::NotFound(kind, name.to_string())),
            Err(err) if code(&err) == Some(409) => {
                Err(Error::Conflict(kind, name.to_string(), err))
            }
            Err(err) => Err(Error::Api(kind, name.to_string(), err)),
        }
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
        let api = self.api::<K>(namespace);
        let patch = Patch::Json::<()>(patch);

        match self
            .timed(
                &kind,
                name,
                "patch_status",
                api.patch_status(name, &PatchParams::default(), &patch),
            )
            .await?
        {
            Ok(obj) => restore(obj).map_err(|err| Error::Convert(kind, name.to_string(), err)),
            Err(err) if code(&err) == Some(404) => Err(Error::NotFound(kind, name.to_string())),
            Err(err) if code(&err) == Some(409) => {
                Err(Error::Conflict(kind, name.to_string(), err))
            }
            Err(err) => Err(Error::Api(kind, name.to_string(), err)),
        }
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
        let api = self.api::<K>(namespace);
        let params = match cascade {
            Cascade::Background => DeleteParams::background(),
            Cascade::Foreground => DeleteParams::foreground(),
        };

        match self.timed(&kind, name, "delete", api.delete(name, &params)).await? {
            Ok(_) => Ok(Deletion::Deleted),
            Err(err) if code(&err) == Some(404) => Ok(Deletion::NotFound),
            Err(err) => Err(Error::Api(kind, name.to_string(), err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PersistentVolume;
    use kube::{api::ObjectMeta, core::ErrorResponse};

    use super::*;

    #[test]
    fn only_api_errors_carry_a_status_code() {
        let err = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "persistentvolumes \"mysql-orders-pv\" already exists".to_string(),
            reason: REASON_ALREADY_EXISTS.to_string(),
            code: 409,
        });

        assert_eq!(code(&err), Some(409));

        let err = kube::Error::Service(Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        assert_eq!(code(&err), None);
    }

    #[test]
    fn erased_objects_keep_their_type_information() {
        let volume = PersistentVolume {
            metadata: ObjectMeta {
                name: Some("mysql-orders-pv".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let erased = erase(&volume).expect("object to be erased");
        assert_eq!(erased.metadata.name.as_deref(), Some("mysql-orders-pv"));
        assert_eq!(
            erased.types.map(|types| types.kind),
            Some("PersistentVolume".to_string())
        );
    }
}
