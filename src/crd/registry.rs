//! # Resource Registry
//!
//! Static table of the custom kinds the operator reads through dynamic APIs.
//!
//! The operator owns `MonitoringResource` and only ever checks for the
//! existence of the legacy `OneAgentAPM` kind, which blocks injection while
//! an older agent operator is still installed.

use crate::crd::MonitoringResource;
use kube::core::{ApiResource, GroupVersionKind};
use std::sync::LazyLock;

/// Kinds known to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    MonitoringResource,
    LegacyOneAgentApm,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::MonitoringResource => "MonitoringResource",
            ResourceKind::LegacyOneAgentApm => "OneAgentAPM",
        }
    }
}

/// Registry mapping each known kind to its API coordinates
#[derive(Debug)]
pub struct ResourceRegistry {
    monitoring_resource: ApiResource,
    legacy_one_agent_apm: ApiResource,
}

static REGISTRY: LazyLock<ResourceRegistry> = LazyLock::new(|| ResourceRegistry {
    monitoring_resource: ApiResource::erase::<MonitoringResource>(&()),
    legacy_one_agent_apm: ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("dynatrace.com", "v1alpha1", "OneAgentAPM"),
        "oneagentapms",
    ),
});

impl ResourceRegistry {
    /// The process-wide registry
    pub fn global() -> &'static ResourceRegistry {
        &REGISTRY
    }

    /// API coordinates for a kind
    pub fn api_resource(&self, kind: ResourceKind) -> &ApiResource {
        match kind {
            ResourceKind::MonitoringResource => &self.monitoring_resource,
            ResourceKind::LegacyOneAgentApm => &self.legacy_one_agent_apm,
        }
    }

    /// All registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> {
        [
            ResourceKind::MonitoringResource,
            ResourceKind::LegacyOneAgentApm,
        ]
        .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitoring_resource_coordinates() {
        let ar = ResourceRegistry::global().api_resource(ResourceKind::MonitoringResource);
        assert_eq!(ar.group, "monitoring.agent-operator.io");
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.kind, "MonitoringResource");
        assert_eq!(ar.plural, "monitoringresources");
    }

    #[test]
    fn test_legacy_kind_coordinates() {
        let ar = ResourceRegistry::global().api_resource(ResourceKind::LegacyOneAgentApm);
        assert_eq!(ar.api_version, "dynatrace.com/v1alpha1");
        assert_eq!(ar.plural, "oneagentapms");
    }

    #[test]
    fn test_every_kind_is_registered() {
        let kinds: Vec<_> = ResourceRegistry::global().kinds().collect();
        assert_eq!(
            kinds,
            vec![ResourceKind::MonitoringResource, ResourceKind::LegacyOneAgentApm]
        );
    }
}
