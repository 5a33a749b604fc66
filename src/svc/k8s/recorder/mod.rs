//! # Event recorder module
//!
//! This module provide an alternative to the golang EventRecorder structure
//!
//! See following links for more details:
//! - <https://book-v1.book.kubebuilder.io/beyond_basics/creating_events.html>
//! - <https://github.com/kubernetes/client-go/blob/master/tools/record/event.go#L56>
//! - <https://docs.openshift.com/online/pro/rest_api/core/event-core-v1.html>

use std::fmt::{self, Debug, Display, Formatter};

use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::svc::k8s::gateway::{self, Creation, Gateway};

pub mod event;

// -----------------------------------------------------------------------------
// Level enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum Level {
    Warning,
    Normal,
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "Warning"),
            Self::Normal => write!(f, "Normal"),
        }
    }
}

// -----------------------------------------------------------------------------
// Helper methods

/// record an event for the given object
#[cfg_attr(feature = "trace", tracing::instrument(skip(gateway, obj)))]
pub async fn record<G, T, U>(
    gateway: &G,
    obj: &T,
    level: Level,
    action: &U,
    message: &str,
) -> Result<Creation, gateway::Error>
where
    G: Gateway,
    T: Resource<DynamicType = ()>,
    U: ToString + Debug,
{
    debug!(
        namespace = obj.namespace().unwrap_or_else(|| "<none>".to_string()),
        name = obj.name_any(),
        level = level.to_string(),
        action = action.to_string(),
        "Create event for resource, {}",
        message
    );

    gateway.create(&event::new(obj, level, action, message)).await
}

/// shortcut for the [`record`] method with the 'Normal' [`Level`]
pub async fn normal<G, T, U>(
    gateway: &G,
    obj: &T,
    action: &U,
    message: &str,
) -> Result<Creation, gateway::Error>
where
    G: Gateway,
    T: Resource<DynamicType = ()>,
    U: ToString + Debug,
{
    record(gateway, obj, Level::Normal, action, message).await
}

/// shortcut for the [`record`] method with the 'Warning' [`Level`]
pub async fn warning<G, T, U>(
    gateway: &G,
    obj: &T,
    action: &U,
    message: &str,
) -> Result<Creation, gateway::Error>
where
    G: Gateway,
    T: Resource<DynamicType = ()>,
    U: ToString + Debug,
{
    record(gateway, obj, Level::Warning, action, message).await
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::{apps::v1::Deployment, core::v1::Event};
    use kube::api::ObjectMeta;

    use super::*;
    use crate::svc::k8s::gateway::memory::{MemoryGateway, Verb};

    #[tokio::test]
    async fn record_creates_an_event_next_to_the_object() {
        let gateway = MemoryGateway::default();
        let obj = Deployment {
            metadata: ObjectMeta {
                name: Some("mysql-orders".to_string()),
                namespace: Some("shop".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let creation = warning(&gateway, &obj, &"Scale", "Scaled down")
            .await
            .expect("event to be recorded");
        assert_eq!(creation, Creation::Created);

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, Verb::Create);
        assert_eq!(calls[0].kind, "Event");
        assert_eq!(calls[0].namespace.as_deref(), Some("shop"));

        let event = gateway
            .object::<Event>(Some("shop"), &calls[0].name)
            .expect("event to be stored");
        assert_eq!(event.type_.as_deref(), Some("Warning"));
        assert_eq!(event.reason.as_deref(), Some("Scale"));
        assert_eq!(event.involved_object.name.as_deref(), Some("mysql-orders"));
    }
}
