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

#![allow(dead_code)]

//! Rollout harness shared by unit and integration tests. It wires an
//! installer controller to in-memory stores and plays the node agent: an
//! installer that is marked successful makes the node's mirror pod ready at
//! the installed generation.

use crate::staticpod::config::{ContentSource, InstallerControllerConfig};
use crate::staticpod::controller::installer::{InstallerController, InstallerError};
use crate::staticpod::controller::launcher::INSTALLER_CONTAINER_NAME;
use crate::staticpod::controller::staticpod::{mirror_pod_name, DEPLOYMENT_GENERATION_LABEL};
use crate::staticpod::controller::generation_status::generation_status_name;
use crate::staticpod::k8s::client::{InMemoryPodApi, PodApi};
use crate::staticpod::k8s::configmap::{ConfigMap, ConfigMapApi, InMemoryConfigMapApi};
use crate::staticpod::k8s::pod::{
    ContainerState, ContainerStateTerminated, ContainerStatus, ObjectMeta, Pod, PodCondition,
    PodSpec, PodStatus, CONDITION_READY, CONDITION_TRUE, POD_PHASE_FAILED, POD_PHASE_RUNNING,
    POD_PHASE_SUCCEEDED,
};
use crate::staticpod::operator::client::{
    InMemoryOperatorClient, OperatorClient, OperatorState, StatusError,
};
use crate::staticpod::operator::types::{NodeStatus, OperatorSpec, OperatorStatus};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const TEST_NAMESPACE: &str = "test";
pub const TEST_STATIC_POD: &str = "test-pod";
pub const TEST_IMAGE: &str = "registry.local/installer:latest";

pub fn test_config() -> InstallerControllerConfig {
    InstallerControllerConfig::new(
        TEST_NAMESPACE,
        TEST_STATIC_POD,
        vec![ContentSource::required("test-config")],
        vec![ContentSource::required("test-secret")],
        vec!["/bin/true".to_string()],
        TEST_IMAGE,
    )
}

/// Operator client that rejects upcoming status writes with queued errors,
/// one error per write.
pub struct FlakyOperatorClient {
    inner: Arc<InMemoryOperatorClient>,
    failures: Mutex<VecDeque<StatusError>>,
}

impl FlakyOperatorClient {
    pub fn new(inner: Arc<InMemoryOperatorClient>) -> Self {
        Self {
            inner,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn fail_next_update(&self) {
        self.fail_update_with(StatusError::Unavailable(
            "injected update failure".to_string(),
        ));
    }

    pub fn fail_update_with(&self, err: StatusError) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(err);
    }
}

impl OperatorClient for FlakyOperatorClient {
    fn get(&self) -> Result<OperatorState, StatusError> {
        self.inner.get()
    }

    fn update_status(
        &self,
        resource_version: &str,
        status: &OperatorStatus,
    ) -> Result<String, StatusError> {
        let injected = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        self.inner.update_status(resource_version, status)
    }
}

pub fn mirror_pod(node_name: &str, generation: i32, ready: bool) -> Pod {
    let mut labels = HashMap::new();
    labels.insert(DEPLOYMENT_GENERATION_LABEL.to_string(), generation.to_string());
    let mut pod = Pod::new(
        ObjectMeta {
            name: Some(mirror_pod_name(TEST_STATIC_POD, node_name)),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels,
            ..Default::default()
        },
        PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        },
    );
    pod.status = Some(PodStatus {
        phase: Some(POD_PHASE_RUNNING.to_string()),
        conditions: vec![PodCondition {
            condition_type: CONDITION_READY.to_string(),
            status: if ready { CONDITION_TRUE } else { "False" }.to_string(),
            message: None,
        }],
        ..Default::default()
    });
    pod
}

pub fn terminated_container(name: &str, reason: Option<&str>, message: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        ready: false,
        state: ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 1,
                reason: reason.map(str::to_string),
                message: Some(message.to_string()),
            }),
        },
    }
}

/// Installer controller over in-memory stores.
pub struct RolloutHarness {
    pub operator: Arc<InMemoryOperatorClient>,
    pub client: Arc<FlakyOperatorClient>,
    pub pods: Arc<InMemoryPodApi>,
    pub config_maps: Arc<InMemoryConfigMapApi>,
    pub controller: InstallerController,
    upgrade_order: Vec<String>,
}

impl RolloutHarness {
    pub fn new(nodes: Vec<NodeStatus>, latest_available: i32) -> Self {
        Self::with_config(test_config(), nodes, latest_available)
    }

    pub fn with_config(
        config: InstallerControllerConfig,
        nodes: Vec<NodeStatus>,
        latest_available: i32,
    ) -> Self {
        let operator = Arc::new(InMemoryOperatorClient::new(
            OperatorSpec::default(),
            OperatorStatus {
                latest_available_deployment_generation: latest_available,
                node_statuses: nodes,
                conditions: Vec::new(),
            },
        ));
        let client = Arc::new(FlakyOperatorClient::new(operator.clone()));
        let pods = Arc::new(InMemoryPodApi::new());
        let config_maps = Arc::new(InMemoryConfigMapApi::new());
        let controller =
            InstallerController::new(config, client.clone(), pods.clone(), config_maps.clone());
        Self {
            operator,
            client,
            pods,
            config_maps,
            controller,
            upgrade_order: Vec::new(),
        }
    }

    pub fn fail_next_update(&self) {
        self.client.fail_next_update();
    }

    pub fn status(&self) -> OperatorStatus {
        self.operator.status()
    }

    pub fn node(&self, node_name: &str) -> NodeStatus {
        self.status()
            .node(node_name)
            .cloned()
            .unwrap_or_else(|| panic!("node {} is not tracked", node_name))
    }

    /// Publishes the status record of `generation`, as the generation's
    /// publisher would.
    pub fn add_generation_record(&self, generation: i32) {
        let mut record = ConfigMap::new(TEST_NAMESPACE, &generation_status_name(generation));
        record.metadata.uid = Some(format!("uid-{}", generation));
        self.config_maps.insert(record);
    }

    /// `status` key of the generation's record, if the record exists and has
    /// one.
    pub fn generation_outcome(&self, generation: i32) -> Option<String> {
        self.config_maps
            .get(TEST_NAMESPACE, &generation_status_name(generation))
            .ok()
            .and_then(|record| record.data.get("status").cloned())
    }

    /// Replaces node membership the way a node lister would.
    pub fn set_nodes(&self, nodes: Vec<NodeStatus>) {
        self.operator.set_node_statuses(nodes);
    }

    pub fn set_mirror_pod(&self, node_name: &str, generation: i32, ready: bool) {
        self.pods.upsert(mirror_pod(node_name, generation, ready));
    }

    pub fn installer_pods(&self) -> Vec<Pod> {
        self.pods
            .list(TEST_NAMESPACE)
            .into_iter()
            .filter(|pod| pod.name().starts_with("installer-"))
            .collect()
    }

    pub fn set_installer_status(&self, pod_name: &str, status: PodStatus) {
        let mut pod = self
            .pods
            .get(TEST_NAMESPACE, pod_name)
            .unwrap_or_else(|err| panic!("installer pod {}: {}", pod_name, err));
        pod.status = Some(status);
        self.pods.upsert(pod);
    }

    /// Fails an installer pod with a single terminated installer container.
    pub fn fail_installer(&self, pod_name: &str, reason: Option<&str>, message: &str) {
        self.set_installer_status(
            pod_name,
            PodStatus {
                phase: Some(POD_PHASE_FAILED.to_string()),
                container_statuses: vec![terminated_container(
                    INSTALLER_CONTAINER_NAME,
                    reason,
                    message,
                )],
                ..Default::default()
            },
        );
    }

    /// Marks every unfinished installer pod as succeeded and brings the
    /// node's mirror pod up, ready, at the installed generation.
    pub fn complete_installers(&self) {
        for pod in self.installer_pods() {
            if pod.phase().is_some() {
                continue;
            }
            let Some((generation, node_name)) = pod
                .name()
                .strip_prefix("installer-")
                .and_then(|rest| rest.split_once('-'))
            else {
                continue;
            };
            let Ok(generation) = generation.parse::<i32>() else {
                continue;
            };
            let node_name = node_name.to_string();
            self.set_installer_status(
                pod.name(),
                PodStatus {
                    phase: Some(POD_PHASE_SUCCEEDED.to_string()),
                    ..Default::default()
                },
            );
            self.set_mirror_pod(&node_name, generation, true);
        }
    }

    /// One controller pass. Records every node that picked up a new target.
    pub fn sync(&mut self) -> Result<(), InstallerError> {
        let before = self.status();
        let result = self.controller.sync();
        let after = self.status();
        for node in &after.node_statuses {
            let was_idle = before
                .node(&node.node_name)
                .map(|prev| !prev.is_in_transition())
                .unwrap_or(true);
            if was_idle && node.is_in_transition() {
                self.upgrade_order.push(node.node_name.clone());
            }
        }
        assert_pass_invariants(&before, &after);
        result
    }

    /// Alternates controller passes with installer completion until every
    /// node runs the latest generation. Returns the order in which nodes
    /// started upgrading.
    pub fn run_to_convergence(&mut self, max_passes: usize) -> Vec<String> {
        for _ in 0..max_passes {
            if let Err(err) = self.sync() {
                if !err.is_requeue() {
                    panic!("sync failed: {}", err);
                }
            }
            self.complete_installers();
            if is_converged(&self.status()) {
                return self.upgrade_order.clone();
            }
        }
        panic!(
            "rollout did not converge after {} passes: {:?}",
            max_passes,
            self.status().node_statuses
        );
    }

    pub fn upgrade_order(&self) -> &[String] {
        &self.upgrade_order
    }
}

pub fn is_converged(status: &OperatorStatus) -> bool {
    status.node_statuses.iter().all(|node| {
        node.current_deployment_generation == status.latest_available_deployment_generation
            && !node.is_in_transition()
    })
}

/// Current generations never go backwards and at most one node is in
/// flight after any pass.
pub fn assert_pass_invariants(before: &OperatorStatus, after: &OperatorStatus) {
    for node in &after.node_statuses {
        if let Some(prev) = before.node(&node.node_name) {
            assert!(
                node.current_deployment_generation >= prev.current_deployment_generation,
                "node {} went from generation {} back to {}",
                node.node_name,
                prev.current_deployment_generation,
                node.current_deployment_generation
            );
        }
    }
    let in_flight = after
        .node_statuses
        .iter()
        .filter(|node| node.is_in_transition())
        .count();
    assert!(in_flight <= 1, "{} nodes are in flight", in_flight);
}

/// No node runs a generation its predecessor in list order has not reached.
pub fn assert_wavefront(status: &OperatorStatus) {
    for pair in status.node_statuses.windows(2) {
        assert!(
            pair[1].current_deployment_generation <= pair[0].current_deployment_generation,
            "node {} at generation {} is ahead of {} at generation {}",
            pair[1].node_name,
            pair[1].current_deployment_generation,
            pair[0].node_name,
            pair[0].current_deployment_generation
        );
    }
}
