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

use crate::staticpod::k8s::client::{PodApi, PodApiError};
use crate::staticpod::k8s::pod::{
    Pod, POD_PHASE_FAILED, POD_PHASE_RUNNING, POD_PHASE_SUCCEEDED,
};
use std::sync::Arc;

/// Label carrying the deployment generation a static pod was rendered from.
pub const DEPLOYMENT_GENERATION_LABEL: &str = "deployment-generation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticPodState {
    Pending,
    Ready,
    Failed,
}

/// What the node agent currently reports for a node's static pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPodObservation {
    pub state: StaticPodState,
    /// Generation label of the running pod. Only reported for ready or
    /// failed pods.
    pub generation: Option<i32>,
    pub errors: Vec<String>,
}

impl StaticPodObservation {
    pub fn pending() -> Self {
        Self {
            state: StaticPodState::Pending,
            generation: None,
            errors: Vec::new(),
        }
    }

    /// True when the pod is ready and reports exactly `generation`.
    pub fn is_ready_at(&self, generation: i32) -> bool {
        self.state == StaticPodState::Ready && self.generation == Some(generation)
    }
}

pub fn mirror_pod_name(static_pod_name: &str, node_name: &str) -> String {
    format!("{}-{}", static_pod_name, node_name)
}

/// Classifies mirror pods of one static pod in one namespace.
#[derive(Clone)]
pub struct StaticPodObserver {
    pods: Arc<dyn PodApi>,
    namespace: String,
    static_pod_name: String,
}

impl StaticPodObserver {
    pub fn new(
        pods: Arc<dyn PodApi>,
        namespace: impl Into<String>,
        static_pod_name: impl Into<String>,
    ) -> Self {
        Self {
            pods,
            namespace: namespace.into(),
            static_pod_name: static_pod_name.into(),
        }
    }

    /// Looks up the mirror pod for `node_name`. A missing mirror pod is
    /// reported as pending; other API errors are returned.
    pub fn observe(&self, node_name: &str) -> Result<StaticPodObservation, PodApiError> {
        let name = mirror_pod_name(&self.static_pod_name, node_name);
        match self.pods.get(&self.namespace, &name) {
            Ok(pod) => Ok(classify(&pod)),
            Err(err) if err.is_not_found() => Ok(StaticPodObservation::pending()),
            Err(err) => Err(err),
        }
    }
}

fn classify(pod: &Pod) -> StaticPodObservation {
    let generation = pod
        .label(DEPLOYMENT_GENERATION_LABEL)
        .and_then(|value| value.trim().parse::<i32>().ok());

    match pod.phase() {
        Some(POD_PHASE_RUNNING) | Some(POD_PHASE_SUCCEEDED) if pod.is_ready() => {
            StaticPodObservation {
                state: StaticPodState::Ready,
                generation,
                errors: Vec::new(),
            }
        }
        Some(POD_PHASE_FAILED) => {
            let errors = pod
                .status
                .as_ref()
                .and_then(|status| status.message.clone())
                .filter(|message| !message.is_empty())
                .into_iter()
                .collect();
            StaticPodObservation {
                state: StaticPodState::Failed,
                generation,
                errors,
            }
        }
        _ => StaticPodObservation::pending(),
    }
}
