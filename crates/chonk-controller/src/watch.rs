//! Event-driven wiring for the group coordinator and policy controller.
//!
//! Both ride a `kube` controller stream: groups retrigger on group
//! changes and on any claim carrying a `group` annotation; policies
//! retrigger on policy changes and on claims matching a known selector.
//! The periodic requeues double as a safety net for missed events.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::Client;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chonk_api::{PVCGroup, PVCPolicy};
use chonk_cluster::claims::{claim_labels, claim_namespace};
use chonk_cluster::KubeCluster;
use chonk_core::annotations;

use crate::group::{CoordinationError, GroupCoordinator, FAILURE_REQUEUE};
use crate::policy::{PolicyController, PolicyError, REQUEUE_INTERVAL};

/// Run the group coordinator against the cluster until shutdown.
pub async fn run_group_watch(
    client: Client,
    coordinator: Arc<GroupCoordinator<KubeCluster>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let groups: Api<PVCGroup> = Api::all(client.clone());
    let claims: Api<PersistentVolumeClaim> = Api::all(client);

    let stream = Controller::new(groups, watcher::Config::default())
        .watches(claims, watcher::Config::default(), |claim| {
            let namespace = claim.metadata.namespace.clone()?;
            let group = claim
                .metadata
                .annotations
                .as_ref()?
                .get(annotations::GROUP)?
                .clone();
            Some(ObjectRef::<PVCGroup>::new(&group).within(&namespace))
        })
        .run(reconcile_group, group_error_policy, coordinator)
        .for_each(|outcome| async move {
            match outcome {
                Ok((object, _)) => debug!(group = %object, "group reconcile done"),
                Err(err) => warn!(error = %err, "group controller error"),
            }
        });

    info!("group coordinator started");
    tokio::select! {
        _ = stream => {}
        _ = shutdown.changed() => {}
    }
    info!("group coordinator stopped");
}

async fn reconcile_group(
    group: Arc<PVCGroup>,
    coordinator: Arc<GroupCoordinator<KubeCluster>>,
) -> Result<Action, CoordinationError> {
    let namespace = group.metadata.namespace.clone().unwrap_or_default();
    let name = group.metadata.name.clone().unwrap_or_default();
    let requeue = coordinator.reconcile(&namespace, &name).await?;
    Ok(Action::requeue(requeue))
}

fn group_error_policy(
    group: Arc<PVCGroup>,
    err: &CoordinationError,
    _coordinator: Arc<GroupCoordinator<KubeCluster>>,
) -> Action {
    warn!(
        group = %format!(
            "{}/{}",
            group.metadata.namespace.as_deref().unwrap_or_default(),
            group.metadata.name.as_deref().unwrap_or_default()
        ),
        error = %err,
        "group reconciliation failed; requeueing"
    );
    Action::requeue(FAILURE_REQUEUE)
}

/// Run the policy controller against the cluster until shutdown.
pub async fn run_policy_watch(
    client: Client,
    controller: Arc<PolicyController<KubeCluster>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let policies: Api<PVCPolicy> = Api::all(client.clone());
    let claims: Api<PersistentVolumeClaim> = Api::all(client);

    let mapper_controller = Arc::clone(&controller);
    let stream = Controller::new(policies, watcher::Config::default())
        .watches(claims, watcher::Config::default(), move |claim| {
            let namespace = claim_namespace(&claim).to_string();
            mapper_controller
                .matching_policy_names(&namespace, claim_labels(&claim))
                .into_iter()
                .map(move |name| ObjectRef::<PVCPolicy>::new(&name).within(&namespace))
                .collect::<Vec<_>>()
        })
        .run(reconcile_policy, policy_error_policy, controller)
        .for_each(|outcome| async move {
            match outcome {
                Ok((object, _)) => debug!(policy = %object, "policy reconcile done"),
                Err(err) => warn!(error = %err, "policy controller error"),
            }
        });

    info!("policy controller started");
    tokio::select! {
        _ = stream => {}
        _ = shutdown.changed() => {}
    }
    info!("policy controller stopped");
}

async fn reconcile_policy(
    policy: Arc<PVCPolicy>,
    controller: Arc<PolicyController<KubeCluster>>,
) -> Result<Action, PolicyError> {
    let namespace = policy.metadata.namespace.clone().unwrap_or_default();
    let name = policy.metadata.name.clone().unwrap_or_default();
    let requeue = controller.reconcile(&namespace, &name).await?;
    Ok(Action::requeue(requeue))
}

fn policy_error_policy(
    policy: Arc<PVCPolicy>,
    err: &PolicyError,
    _controller: Arc<PolicyController<KubeCluster>>,
) -> Action {
    warn!(
        policy = %format!(
            "{}/{}",
            policy.metadata.namespace.as_deref().unwrap_or_default(),
            policy.metadata.name.as_deref().unwrap_or_default()
        ),
        error = %err,
        "policy reconciliation failed; requeueing"
    );
    Action::requeue(REQUEUE_INTERVAL)
}
