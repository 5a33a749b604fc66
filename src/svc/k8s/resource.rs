//! # Resource module
//!
//! This module provide helpers on kubernetes [`Resource`]

use k8s_openapi::{
    api::core::v1::ObjectReference, apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{Resource, ResourceExt};
use serde::Serialize;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("resource '{0}' is not owned by a namespace")]
    Namespace(String),
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns if the resource is considered from kubernetes point of view as deleted
pub fn deleted<T>(obj: &T) -> bool
where
    T: Resource,
{
    obj.meta().deletion_timestamp.is_some()
}

/// returns the namespace and name of the kubernetes resource.
pub fn namespaced_name<T>(obj: &T) -> Result<(String, String), Error>
where
    T: ResourceExt,
{
    let name = obj.name_any();

    match obj.namespace() {
        Some(namespace) => Ok((namespace, name)),
        None => Err(Error::Namespace(name)),
    }
}

/// returns difference between the two given object serialize as json patch
pub fn diff<T>(origin: &T, modified: &T) -> Result<json_patch::Patch, serde_json::Error>
where
    T: Serialize,
{
    Ok(json_patch::diff(
        &serde_json::to_value(origin)?,
        &serde_json::to_value(modified)?,
    ))
}

/// returns a controller owner reference pointing to the given resource, if
/// kubernetes has already given it an unique identifier
pub fn owner_reference<T>(obj: &T) -> Option<OwnerReference>
where
    T: Resource<DynamicType = ()>,
{
    Some(OwnerReference {
        api_version: T::api_version(&()).to_string(),
        block_owner_deletion: Some(true),
        controller: Some(true),
        kind: T::kind(&()).to_string(),
        name: obj.meta().name.to_owned()?,
        uid: obj.meta().uid.to_owned()?,
    })
}

/// returns an object reference pointing to the given resource
pub fn object_reference<T>(obj: &T) -> ObjectReference
where
    T: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(T::api_version(&()).to_string()),
        kind: Some(T::kind(&()).to_string()),
        name: obj.meta().name.to_owned(),
        namespace: obj.meta().namespace.to_owned(),
        uid: obj.meta().uid.to_owned(),
        resource_version: obj.meta().resource_version.to_owned(),
        field_path: None,
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use k8s_openapi::{
        api::apps::v1::Deployment, apimachinery::pkg::apis::meta::v1::Time,
    };
    use kube::api::ObjectMeta;

    use super::*;

    fn deployment(namespace: Option<&str>, uid: Option<&str>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("mysql-orders".to_string()),
                namespace: namespace.map(ToString::to_string),
                uid: uid.map(ToString::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn namespaced_name_requires_a_namespace() {
        assert_eq!(
            namespaced_name(&deployment(Some("shop"), None)),
            Ok(("shop".to_string(), "mysql-orders".to_string()))
        );
        assert_eq!(
            namespaced_name(&deployment(None, None)),
            Err(Error::Namespace("mysql-orders".to_string()))
        );
    }

    #[test]
    fn owner_reference_needs_an_identifier() {
        assert!(owner_reference(&deployment(Some("shop"), None)).is_none());

        let owner = owner_reference(&deployment(Some("shop"), Some("1234")))
            .expect("owner reference to be computed");

        assert_eq!(owner.kind, "Deployment");
        assert_eq!(owner.api_version, "apps/v1");
        assert_eq!(owner.uid, "1234");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn deleted_looks_at_deletion_timestamp() {
        let mut obj = deployment(Some("shop"), None);
        assert!(!deleted(&obj));

        obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(deleted(&obj));
    }

    #[test]
    fn diff_of_identical_objects_is_empty() {
        let obj = deployment(Some("shop"), None);

        let patch = diff(&obj, &obj).expect("diff to be computed");
        assert!(patch.0.is_empty());

        let mut modified = obj.to_owned();
        modified.metadata.finalizers = Some(vec!["example.org/test".to_string()]);

        let patch = diff(&obj, &modified).expect("diff to be computed");
        assert_eq!(patch.0.len(), 1);
    }
}
