/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Installer controller: rolls static pod generations out to nodes one node
//! at a time.
//!
//! Each call to [`InstallerController::sync`] reads the operator status,
//! makes at most one node status change and persists it with the resource
//! version read at the start of the pass. Progress is driven by repeated
//! passes triggered from the work queue.

use crate::staticpod::config::InstallerControllerConfig;
use crate::staticpod::controller::conditions::{
    failing_node_count, set_controller_failing, set_fleet_conditions,
};
use crate::staticpod::controller::generation_status::GenerationStatusRecorder;
use crate::staticpod::controller::launcher::{
    installer_pod_name, InstallerPodLauncher, InstallerPodMutation, LauncherError,
};
use crate::staticpod::controller::rollout::{
    deployment_generation_to_start, rollout_order, select_start_node,
};
use crate::staticpod::controller::staticpod::{StaticPodObserver, StaticPodState};
use crate::staticpod::k8s::client::{PodApi, PodApiError};
use crate::staticpod::k8s::configmap::ConfigMapApi;
use crate::staticpod::k8s::pod::{Pod, POD_PHASE_FAILED, POD_PHASE_SUCCEEDED};
use crate::staticpod::logger::LogEntry;
use crate::staticpod::observability::metrics::{self, NodeTransition, SyncResult};
use crate::staticpod::observability::tracing::{current_context, with_span_sync};
use crate::staticpod::operator::client::{
    update_status_with, OperatorClient, OperatorState, StatusError,
};
use crate::staticpod::operator::types::{NodeStatus, OperatorStatus};

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

const COMPONENT: &str = "installer-controller";

pub const NEW_GENERATION_PENDING_MESSAGE: &str = "a new deployment is pending";
const OOM_KILLED_REASON: &str = "OOMKilled";

#[derive(Debug)]
pub enum InstallerError {
    Status(StatusError),
    PodApi(PodApiError),
    Launcher(LauncherError),
    Observer(PodApiError),
    /// Not a failure: the pass asks to be run again soon.
    SyntheticRequeue,
}

impl InstallerError {
    pub fn is_requeue(&self) -> bool {
        matches!(self, InstallerError::SyntheticRequeue)
    }
}

impl Display for InstallerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallerError::Status(err) => write!(f, "operator status error: {}", err),
            InstallerError::PodApi(err) => write!(f, "installer pod error: {}", err),
            InstallerError::Launcher(err) => write!(f, "{}", err),
            InstallerError::Observer(err) => write!(f, "static pod observation failed: {}", err),
            InstallerError::SyntheticRequeue => write!(f, "synthetic requeue request"),
        }
    }
}

impl Error for InstallerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InstallerError::Status(err) => Some(err),
            InstallerError::PodApi(err) | InstallerError::Observer(err) => Some(err),
            InstallerError::Launcher(err) => Some(err),
            InstallerError::SyntheticRequeue => None,
        }
    }
}

impl From<StatusError> for InstallerError {
    fn from(err: StatusError) -> Self {
        InstallerError::Status(err)
    }
}

impl From<LauncherError> for InstallerError {
    fn from(err: LauncherError) -> Self {
        InstallerError::Launcher(err)
    }
}

/// Result of a single advancement pass that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// No node needed a change.
    Settled,
    /// One node status change was persisted.
    Progressed,
    /// Nothing was persisted but another pass is wanted soon.
    Requeue,
}

/// Next status of a node with an installer in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallProgress {
    pub status: NodeStatus,
    /// The installer was OOM killed; the node status is left untouched so
    /// the same generation is retried.
    pub oom_killed: bool,
}

impl InstallProgress {
    fn unchanged(status: &NodeStatus) -> Self {
        Self {
            status: status.clone(),
            oom_killed: false,
        }
    }
}

pub struct InstallerController {
    config: Arc<InstallerControllerConfig>,
    operator: Arc<dyn OperatorClient>,
    pods: Arc<dyn PodApi>,
    launcher: InstallerPodLauncher,
    observer: StaticPodObserver,
    generation_status: Arc<GenerationStatusRecorder>,
}

impl InstallerController {
    pub fn new(
        config: InstallerControllerConfig,
        operator: Arc<dyn OperatorClient>,
        pods: Arc<dyn PodApi>,
        config_maps: Arc<dyn ConfigMapApi>,
    ) -> Self {
        let config = Arc::new(config);
        let generation_status = Arc::new(GenerationStatusRecorder::new(
            config_maps,
            config.target_namespace.clone(),
        ));
        let launcher =
            InstallerPodLauncher::new(pods.clone(), generation_status.clone(), config.clone());
        let observer = StaticPodObserver::new(
            pods.clone(),
            config.target_namespace.clone(),
            config.static_pod_name.clone(),
        );
        Self {
            config,
            operator,
            pods,
            launcher,
            observer,
            generation_status,
        }
    }

    pub fn with_installer_pod_mutation(mut self, mutation: InstallerPodMutation) -> Self {
        self.launcher = self.launcher.with_mutation(mutation);
        self
    }

    pub fn config(&self) -> &InstallerControllerConfig {
        &self.config
    }

    /// Runs one reconcile pass inside its own span.
    pub fn sync(&self) -> Result<(), InstallerError> {
        with_span_sync(COMPONENT, "sync", current_context(), || self.sync_pass())
    }

    fn sync_pass(&self) -> Result<(), InstallerError> {
        let started = Instant::now();
        let result = self.sync_inner();
        let label = match &result {
            Ok(()) => SyncResult::Success,
            Err(err) if err.is_requeue() => SyncResult::Requeue,
            Err(_) => SyncResult::Error,
        };
        metrics::record_sync(label, started.elapsed());
        result
    }

    fn sync_inner(&self) -> Result<(), InstallerError> {
        let state = self.operator.get()?;
        if !state.spec.is_managed() {
            LogEntry::debug(COMPONENT, "Skipping sync for unmanaged operator")
                .namespace(&self.config.target_namespace)
                .emit();
            return Ok(());
        }

        let pass = self.advance(&state);
        if let Ok(PassOutcome::Requeue) = pass {
            return Err(InstallerError::SyntheticRequeue);
        }

        let failure = pass.as_ref().err().map(|err| err.to_string());
        if let Some(message) = failure.as_deref() {
            LogEntry::warn(COMPONENT, "Sync pass failed")
                .namespace(&self.config.target_namespace)
                .text("error", message)
                .emit();
        }

        let written = update_status_with(self.operator.as_ref(), |status| {
            set_controller_failing(status, failure.as_deref());
            set_fleet_conditions(status);
        });
        match written {
            Ok((status, _)) => metrics::set_fleet_gauges(
                status.latest_available_deployment_generation,
                failing_node_count(&status),
            ),
            Err(err) if pass.is_ok() => return Err(err.into()),
            // The pass error wins.
            Err(err) => LogEntry::warn(COMPONENT, "Failed to record sync failure")
                .namespace(&self.config.target_namespace)
                .failure(&err)
                .emit(),
        }

        pass.map(|_| ())
    }

    /// Examines nodes in rollout order and persists at most one node status
    /// change.
    pub fn advance(&self, state: &OperatorState) -> Result<PassOutcome, InstallerError> {
        let status = &state.status;
        if status.node_statuses.is_empty() {
            return Ok(PassOutcome::Settled);
        }

        let start = select_start_node(&status.node_statuses, |node| {
            self.observer.observe(&node.node_name)
        })
        .map_err(InstallerError::Observer)?;

        for step in rollout_order(start, status.node_statuses.len()) {
            let current = &status.node_statuses[step.index];
            let previous = step.previous.map(|index| &status.node_statuses[index]);

            if current.is_in_transition() {
                self.launcher
                    .ensure_installer_pod(&current.node_name, current.target_deployment_generation)?;

                let new_generation_pending = status.latest_available_deployment_generation
                    > current.target_deployment_generation;
                let progress =
                    self.new_node_state_for_install_in_progress(current, new_generation_pending)?;

                if progress.oom_killed {
                    return self.retry_oom_killed_installer(current);
                }
                if progress.status != *current {
                    self.persist_node_status(state, current, progress.status)?;
                    return Ok(PassOutcome::Progressed);
                }

                LogEntry::debug(COMPONENT, "Node is in transition but has not made progress")
                    .node(&current.node_name)
                    .generation("target", current.target_deployment_generation)
                    .emit();
                return Ok(PassOutcome::Settled);
            }

            let generation = deployment_generation_to_start(
                current,
                previous,
                status.latest_available_deployment_generation,
            );
            if generation == 0 {
                LogEntry::debug(COMPONENT, "Node does not need an update")
                    .node(&current.node_name)
                    .emit();
                continue;
            }

            LogEntry::info(COMPONENT, "Node needs new deployment generation")
                .node(&current.node_name)
                .generation("generation", generation)
                .emit();
            let mut next = current.clone();
            next.target_deployment_generation = generation;
            next.last_failed_deployment_errors.clear();
            if next == *current {
                return Ok(PassOutcome::Settled);
            }
            self.persist_node_status(state, current, next)?;
            return Ok(PassOutcome::Progressed);
        }

        Ok(PassOutcome::Settled)
    }

    /// Folds the installer pod and static pod of a node in transition into
    /// its next status.
    pub fn new_node_state_for_install_in_progress(
        &self,
        node: &NodeStatus,
        new_generation_pending: bool,
    ) -> Result<InstallProgress, InstallerError> {
        let pod_name = installer_pod_name(node.target_deployment_generation, &node.node_name);
        let installer = match self.pods.get(&self.config.target_namespace, &pod_name) {
            Ok(pod) => pod,
            Err(err) if err.is_not_found() => {
                let mut next = node.clone();
                next.last_failed_deployment_generation = node.target_deployment_generation;
                next.target_deployment_generation = node.current_deployment_generation;
                next.last_failed_deployment_errors = vec![err.to_string()];
                return Ok(InstallProgress {
                    status: next,
                    oom_killed: false,
                });
            }
            Err(err) => return Err(InstallerError::PodApi(err)),
        };

        let errors = match installer.phase() {
            Some(POD_PHASE_SUCCEEDED) => {
                if new_generation_pending {
                    vec![NEW_GENERATION_PENDING_MESSAGE.to_string()]
                } else {
                    let observation = self
                        .observer
                        .observe(&node.node_name)
                        .map_err(InstallerError::Observer)?;
                    if observation.generation != Some(node.target_deployment_generation) {
                        return Ok(InstallProgress::unchanged(node));
                    }
                    match observation.state {
                        StaticPodState::Ready => {
                            let mut next = node.clone();
                            next.current_deployment_generation = node.target_deployment_generation;
                            next.target_deployment_generation = 0;
                            next.last_failed_deployment_generation = 0;
                            next.last_failed_deployment_errors.clear();
                            return Ok(InstallProgress {
                                status: next,
                                oom_killed: false,
                            });
                        }
                        StaticPodState::Failed => observation.errors,
                        StaticPodState::Pending => return Ok(InstallProgress::unchanged(node)),
                    }
                }
            }
            Some(POD_PHASE_FAILED) => {
                if was_oom_killed(&installer) {
                    return Ok(InstallProgress {
                        status: node.clone(),
                        oom_killed: true,
                    });
                }
                termination_messages(&installer)
            }
            _ => return Ok(InstallProgress::unchanged(node)),
        };

        let mut next = node.clone();
        next.last_failed_deployment_generation = node.target_deployment_generation;
        next.target_deployment_generation = 0;
        next.last_failed_deployment_errors = if errors.is_empty() {
            vec![format!(
                "no detailed termination message, see `kubectl get -n {} pods/{} -o yaml`",
                self.config.target_namespace, pod_name
            )]
        } else {
            errors
        };
        Ok(InstallProgress {
            status: next,
            oom_killed: false,
        })
    }

    fn retry_oom_killed_installer(&self, node: &NodeStatus) -> Result<PassOutcome, InstallerError> {
        let pod_name = installer_pod_name(node.target_deployment_generation, &node.node_name);
        LogEntry::info(COMPONENT, "Retrying installer that was OOM killed")
            .node(&node.node_name)
            .pod(&pod_name)
            .emit();
        match self.pods.delete(&self.config.target_namespace, &pod_name) {
            Ok(()) => Ok(PassOutcome::Requeue),
            Err(err) if err.is_not_found() => Ok(PassOutcome::Requeue),
            Err(err) => Err(InstallerError::PodApi(err)),
        }
    }

    fn persist_node_status(
        &self,
        state: &OperatorState,
        previous: &NodeStatus,
        next: NodeStatus,
    ) -> Result<(), InstallerError> {
        LogEntry::info(COMPONENT, "Node moving to new state")
            .node(&next.node_name)
            .generation("current", next.current_deployment_generation)
            .generation("target", next.target_deployment_generation)
            .generation("last_failed", next.last_failed_deployment_generation)
            .emit();

        let transition = classify_transition(previous, &next);
        let mut status: OperatorStatus = state.status.clone();
        status.set_node_status(next);
        set_fleet_conditions(&mut status);
        self.operator
            .update_status(&state.resource_version, &status)?;
        metrics::record_node_transition(transition);
        self.generation_status.record(&status);
        Ok(())
    }
}

fn classify_transition(previous: &NodeStatus, next: &NodeStatus) -> NodeTransition {
    if next.current_deployment_generation != previous.current_deployment_generation {
        NodeTransition::Installed
    } else if next.last_failed_deployment_generation != previous.last_failed_deployment_generation {
        NodeTransition::Failed
    } else if !previous.is_in_transition() && next.is_in_transition() {
        NodeTransition::TargetSet
    } else {
        NodeTransition::Progressed
    }
}

fn was_oom_killed(pod: &Pod) -> bool {
    pod.status.as_ref().is_some_and(|status| {
        status.container_statuses.iter().any(|container| {
            container
                .state
                .terminated
                .as_ref()
                .is_some_and(|terminated| terminated.reason.as_deref() == Some(OOM_KILLED_REASON))
        })
    })
}

fn termination_messages(pod: &Pod) -> Vec<String> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    status
        .container_statuses
        .iter()
        .filter_map(|container| {
            let message = container.state.terminated.as_ref()?.message.as_deref()?;
            (!message.is_empty()).then(|| format!("{}: {}", container.name, message))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staticpod::controller::conditions::CONDITION_INSTALLER_CONTROLLER_FAILING;
    use crate::staticpod::k8s::pod::PodStatus;
    use crate::staticpod::operator::types::{find_condition, ManagementState, OperatorSpec};
    use crate::staticpod::test_support::{mirror_pod, RolloutHarness, TEST_NAMESPACE};

    fn in_flight(node_name: &str, current: i32, target: i32) -> NodeStatus {
        let mut node = NodeStatus::at_generation(node_name, current);
        node.target_deployment_generation = target;
        node
    }

    fn succeed(harness: &RolloutHarness, pod_name: &str) {
        harness.set_installer_status(
            pod_name,
            PodStatus {
                phase: Some(POD_PHASE_SUCCEEDED.to_string()),
                ..Default::default()
            },
        );
    }

    #[test]
    fn failed_installer_records_termination_messages() {
        let mut harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);

        harness.sync().expect("target set");
        assert_eq!(harness.node("node-a").target_deployment_generation, 1);

        harness.sync().expect("installer launched");
        assert_eq!(harness.installer_pods().len(), 1);

        harness.fail_installer("installer-1-node-a", None, "fake death");
        harness.sync().expect("failure recorded");

        let node = harness.node("node-a");
        assert_eq!(node.last_failed_deployment_generation, 1);
        assert_eq!(node.target_deployment_generation, 0);
        assert_eq!(node.current_deployment_generation, 0);
        assert_eq!(node.last_failed_deployment_errors, vec!["installer: fake death"]);
    }

    #[test]
    fn failed_installer_without_messages_points_at_the_pod() {
        let mut harness = RolloutHarness::new(vec![in_flight("node-a", 0, 1)], 1);
        harness.sync().expect("installer launched");
        harness.fail_installer("installer-1-node-a", None, "");
        harness.sync().expect("failure recorded");

        assert_eq!(
            harness.node("node-a").last_failed_deployment_errors,
            vec![
                "no detailed termination message, see `kubectl get -n test pods/installer-1-node-a -o yaml`"
            ]
        );
    }

    #[test]
    fn vanished_installer_rolls_target_back() {
        let harness = RolloutHarness::new(vec![in_flight("node-a", 2, 3)], 3);
        let node = harness.node("node-a");

        let progress = harness
            .controller
            .new_node_state_for_install_in_progress(&node, false)
            .expect("progress");

        assert!(!progress.oom_killed);
        assert_eq!(progress.status.last_failed_deployment_generation, 3);
        assert_eq!(progress.status.target_deployment_generation, 2);
        assert_eq!(
            progress.status.last_failed_deployment_errors,
            vec!["pods \"installer-3-node-a\" not found"]
        );
    }

    #[test]
    fn rolled_back_node_keeps_its_failure_and_current_generation() {
        let mut rolled_back = in_flight("node-a", 2, 2);
        rolled_back.last_failed_deployment_generation = 3;
        rolled_back.last_failed_deployment_errors =
            vec!["pods \"installer-3-node-a\" not found".to_string()];
        let mut harness = RolloutHarness::new(vec![rolled_back.clone()], 3);
        harness.set_mirror_pod("node-a", 2, true);

        for _ in 0..4 {
            harness.sync().expect("pass");
        }

        assert!(harness.installer_pods().is_empty());
        assert_eq!(harness.pods.create_count(), 0);
        assert_eq!(harness.node("node-a"), rolled_back);
    }

    #[test]
    fn succeeded_installer_waits_for_static_pod_generation() {
        let mut harness = RolloutHarness::new(vec![in_flight("node-a", 1, 2)], 2);
        harness.sync().expect("installer launched");
        succeed(&harness, "installer-2-node-a");
        harness.set_mirror_pod("node-a", 1, true);

        harness.sync().expect("still waiting");
        assert_eq!(harness.node("node-a"), in_flight("node-a", 1, 2));

        harness.set_mirror_pod("node-a", 2, false);
        harness.sync().expect("not ready yet");
        assert_eq!(harness.node("node-a"), in_flight("node-a", 1, 2));

        harness.set_mirror_pod("node-a", 2, true);
        harness.sync().expect("installed");
        assert_eq!(harness.node("node-a"), NodeStatus::at_generation("node-a", 2));
    }

    #[test]
    fn succeeded_installer_fails_fast_when_newer_generation_is_pending() {
        let mut harness = RolloutHarness::new(vec![in_flight("node-a", 1, 2)], 3);
        harness.sync().expect("installer launched");
        succeed(&harness, "installer-2-node-a");

        harness.sync().expect("short circuit");
        let node = harness.node("node-a");
        assert_eq!(node.last_failed_deployment_generation, 2);
        assert_eq!(node.target_deployment_generation, 0);
        assert_eq!(node.last_failed_deployment_errors, vec![NEW_GENERATION_PENDING_MESSAGE]);
    }

    #[test]
    fn failed_static_pod_fails_the_generation() {
        let mut harness = RolloutHarness::new(vec![in_flight("node-a", 1, 2)], 2);
        harness.sync().expect("installer launched");
        succeed(&harness, "installer-2-node-a");

        let mut pod = mirror_pod("node-a", 2, false);
        if let Some(status) = pod.status.as_mut() {
            status.phase = Some(POD_PHASE_FAILED.to_string());
            status.message = Some("crash looping".to_string());
        }
        harness.pods.upsert(pod);

        harness.sync().expect("failure recorded");
        let node = harness.node("node-a");
        assert_eq!(node.current_deployment_generation, 1);
        assert_eq!(node.last_failed_deployment_generation, 2);
        assert_eq!(node.last_failed_deployment_errors, vec!["crash looping"]);
    }

    #[test]
    fn oom_killed_installer_is_retried_without_recording_failure() {
        let mut harness = RolloutHarness::new(vec![in_flight("node-a", 0, 1)], 1);
        harness.sync().expect("installer launched");
        harness.fail_installer("installer-1-node-a", Some("OOMKilled"), "out of memory");

        let err = harness.sync().expect_err("requeue requested");
        assert!(err.is_requeue());
        assert_eq!(harness.node("node-a"), in_flight("node-a", 0, 1));
        assert!(harness.installer_pods().is_empty());

        harness.sync().expect("installer relaunched");
        assert_eq!(harness.installer_pods().len(), 1);
        assert_eq!(harness.pods.create_count(), 2);
    }

    #[test]
    fn unmanaged_operator_is_left_alone() {
        let mut harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);
        harness.operator.set_spec(OperatorSpec {
            management_state: ManagementState::Unmanaged,
        });
        let before = harness.status();

        harness.sync().expect("noop");
        assert_eq!(harness.status(), before);
        assert!(harness.pods.list(TEST_NAMESPACE).is_empty());
    }

    #[test]
    fn stale_resource_version_is_reported_as_conflict() {
        let harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);
        let stale = harness.operator.get().expect("state");
        harness.operator.set_latest_available_generation(1);

        let err = harness.controller.advance(&stale).expect_err("conflict");
        assert!(matches!(err, InstallerError::Status(ref status) if status.is_conflict()));
    }

    #[test]
    fn failed_pass_sets_controller_failing_condition() {
        let mut harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);
        harness.fail_next_update();

        let err = harness.sync().expect_err("update fails");
        assert!(matches!(err, InstallerError::Status(_)));
        let status = harness.status();
        let condition = find_condition(&status.conditions, CONDITION_INSTALLER_CONTROLLER_FAILING)
            .expect("condition written");
        assert!(condition.is_true());
        assert_eq!(condition.reason.as_deref(), Some("Error"));

        harness.sync().expect("recovers");
        let status = harness.status();
        let condition = find_condition(&status.conditions, CONDITION_INSTALLER_CONTROLLER_FAILING)
            .expect("condition written");
        assert!(!condition.is_true());
    }

    #[test]
    fn pass_error_is_kept_when_condition_write_also_fails() {
        let mut harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);
        harness.client.fail_update_with(StatusError::Conflict {
            expected: "1".to_string(),
            actual: "2".to_string(),
        });
        harness.fail_next_update();

        let err = harness.sync().expect_err("both writes fail");
        assert!(matches!(err, InstallerError::Status(ref status) if status.is_conflict()));
        let status = harness.status();
        assert!(find_condition(&status.conditions, CONDITION_INSTALLER_CONTROLLER_FAILING).is_none());
        assert_eq!(status.node_statuses[0], NodeStatus::new("node-a"));
    }

    #[test]
    fn converged_generation_record_is_marked_succeeded() {
        let mut harness = RolloutHarness::new(
            vec![
                NodeStatus::at_generation("node-a", 1),
                NodeStatus::at_generation("node-b", 1),
            ],
            2,
        );
        harness.add_generation_record(2);
        harness.set_mirror_pod("node-a", 1, true);
        harness.set_mirror_pod("node-b", 1, true);

        harness.run_to_convergence(20);

        assert_eq!(harness.generation_outcome(2).as_deref(), Some("Succeeded"));
        for pod in harness.installer_pods() {
            let owners = &pod.metadata.owner_references;
            assert_eq!(owners.len(), 1, "{}", pod.name());
            assert_eq!(owners[0].name, "deployment-status-2");
            assert_eq!(owners[0].uid, "uid-2");
        }
    }

    #[test]
    fn failed_generation_record_is_marked_failed() {
        let mut harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);
        harness.add_generation_record(1);

        harness.sync().expect("target set");
        harness.sync().expect("installer launched");
        assert_eq!(harness.generation_outcome(1), None);

        harness.fail_installer("installer-1-node-a", None, "disk full");
        harness.sync().expect("failure recorded");
        assert_eq!(harness.generation_outcome(1).as_deref(), Some("Failed"));
    }
}
