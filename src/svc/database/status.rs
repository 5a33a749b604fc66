//! # Status module
//!
//! This module derive the status of a database instance from the live state of
//! its workload.

use k8s_openapi::api::apps::v1::Deployment;

use crate::svc::crd::database::Status;

// -----------------------------------------------------------------------------
// Replicas structure

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct Replicas {
    pub ready: i32,
    pub desired: i32,
}

impl From<&Deployment> for Replicas {
    fn from(deployment: &Deployment) -> Self {
        Self {
            ready: deployment
                .status
                .as_ref()
                .and_then(|status| status.ready_replicas)
                .unwrap_or(0),
            desired: deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.replicas)
                .unwrap_or(0),
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns the status of an instance whose workload has the given replicas
pub fn project(name: &str, replicas: Replicas) -> Status {
    if replicas.ready == replicas.desired && replicas.ready > 0 {
        Status::running(name)
    } else {
        Status::not_ready(name)
    }
}

/// returns the status of an instance whose workload could not be read
pub fn failure(reason: &str) -> Status {
    Status::error(format!("Error monitoring instance: {reason}"))
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    use super::*;
    use crate::svc::crd::database::Phase;

    #[test]
    fn projection_table() {
        let cases = [
            (0, 1, Phase::NotReady, false),
            (1, 1, Phase::Running, true),
            (2, 3, Phase::NotReady, false),
            (3, 3, Phase::Running, true),
            (0, 0, Phase::NotReady, false),
        ];

        for (ready, desired, phase, expected) in cases {
            let status = project("orders", Replicas { ready, desired });

            assert_eq!(status.phase, Some(phase), "ready={ready}, desired={desired}");
            assert_eq!(status.ready, expected, "ready={ready}, desired={desired}");
        }
    }

    #[test]
    fn replicas_from_deployment() {
        let deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(Replicas::from(&deployment), Replicas { ready: 1, desired: 1 });

        // a freshly created workload has no status yet
        assert_eq!(Replicas::from(&Deployment::default()), Replicas::default());
    }

    #[test]
    fn failure_carries_a_message() {
        let status = failure("deployments.apps \"mysql-orders\" not found");

        assert_eq!(status.phase, Some(Phase::Error));
        assert!(!status.ready);
        assert!(status
            .message
            .as_deref()
            .map(|message| message.contains("not found"))
            .unwrap_or(false));
    }
}
