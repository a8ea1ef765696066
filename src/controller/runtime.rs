//! # Controller Runtime
//!
//! Wires the reconciler into a kube-runtime `Controller`.
//!
//! Besides `MonitoringResource` objects the controller watches:
//! - credential secrets in the operator namespace, so token changes are picked up at once
//! - namespace labels, so newly bound namespaces receive their secrets without waiting for a resync

use crate::constants::NAMESPACE_BINDING_LABEL;
use crate::controller::error_policy::error_policy;
use crate::controller::reconciler::{ReconcileError, ReconcileRequest, Reconciler};
use crate::crd::MonitoringResource;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point handed to the controller
async fn reconcile_object(
    obj: Arc<MonitoringResource>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    ctx.reconcile(&ReconcileRequest::from(obj.as_ref())).await
}

/// Run the controller until a shutdown signal arrives
pub async fn run_controller(client: Client, reconciler: Arc<Reconciler>) {
    let operator_namespace = reconciler.config().operator_namespace.clone();
    let resources: Api<MonitoringResource> =
        Api::namespaced(client.clone(), &operator_namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &operator_namespace);
    let namespaces: Api<Namespace> = Api::all(client);

    let controller = Controller::new(resources, watcher::Config::default());
    let store = controller.store();

    info!(namespace = %operator_namespace, "Starting MonitoringResource controller");

    controller
        .watches(secrets, watcher::Config::default(), move |secret: Secret| {
            let secret_name = secret.name_any();
            store
                .state()
                .into_iter()
                .filter(|resource| {
                    resource.spec.tokens_secret_name(&resource.name_any()) == secret_name
                })
                .map(|resource| ObjectRef::from_obj(resource.as_ref()))
                .collect::<Vec<_>>()
        })
        .watches(
            namespaces,
            watcher::Config::default().labels(NAMESPACE_BINDING_LABEL),
            move |namespace: Namespace| {
                namespace
                    .labels()
                    .get(NAMESPACE_BINDING_LABEL)
                    .map(|resource| {
                        ObjectRef::<MonitoringResource>::new(resource).within(&operator_namespace)
                    })
            },
        )
        .shutdown_on_signal()
        .run(reconcile_object, error_policy, reconciler)
        .for_each(|result| {
            match result {
                Ok((obj, _)) => debug!(resource = %obj, "Reconciled"),
                Err(e) => warn!(error = %e, "Controller reported an error"),
            }
            std::future::ready(())
        })
        .await;

    info!("Controller stopped");
}
