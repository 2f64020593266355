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

//! Persisted rollout state for a static pod operator.
//!
//! These are plain value types: a reconcile pass reads a snapshot, builds a
//! modified copy and compares the two with `==` before writing anything back.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
    Removed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorSpec {
    #[serde(rename = "managementState", default)]
    pub management_state: ManagementState,
}

impl OperatorSpec {
    pub fn is_managed(&self) -> bool {
        self.management_state == ManagementState::Managed
    }
}

/// Rollout state of one node hosting the static pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStatus {
    #[serde(rename = "nodeName")]
    pub node_name: String,
    #[serde(rename = "currentDeploymentGeneration", default)]
    pub current_deployment_generation: i32,
    /// Generation being installed; zero when idle.
    #[serde(rename = "targetDeploymentGeneration", default)]
    pub target_deployment_generation: i32,
    #[serde(rename = "lastFailedDeploymentGeneration", default)]
    pub last_failed_deployment_generation: i32,
    #[serde(
        rename = "lastFailedDeploymentErrors",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub last_failed_deployment_errors: Vec<String>,
}

impl NodeStatus {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Default::default()
        }
    }

    pub fn at_generation(node_name: impl Into<String>, generation: i32) -> Self {
        Self {
            node_name: node_name.into(),
            current_deployment_generation: generation,
            ..Default::default()
        }
    }

    /// An installer is in flight. A target equal to the current generation
    /// is what a vanished installer leaves behind and counts as idle.
    pub fn is_in_transition(&self) -> bool {
        self.target_deployment_generation != 0
            && self.target_deployment_generation != self.current_deployment_generation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(condition_type: &str, status: bool) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: if status { CONDITION_TRUE } else { CONDITION_FALSE }.to_string(),
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == CONDITION_TRUE
    }
}

/// Fleet-wide status. `node_statuses` order is the rollout order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorStatus {
    #[serde(rename = "latestAvailableDeploymentGeneration", default)]
    pub latest_available_deployment_generation: i32,
    #[serde(rename = "nodeStatuses", default)]
    pub node_statuses: Vec<NodeStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl OperatorStatus {
    pub fn node(&self, node_name: &str) -> Option<&NodeStatus> {
        self.node_statuses
            .iter()
            .find(|node| node.node_name == node_name)
    }

    /// Replaces the entry with the same node name. Unknown nodes are ignored;
    /// node membership is owned by another actor.
    pub fn set_node_status(&mut self, status: NodeStatus) -> bool {
        match self
            .node_statuses
            .iter_mut()
            .find(|node| node.node_name == status.node_name)
        {
            Some(existing) => {
                *existing = status;
                true
            }
            None => false,
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.condition_type == condition_type)
}

/// Inserts or updates `condition`. The transition time only moves when the
/// status flips, so rewriting an unchanged condition leaves the list equal.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|existing| existing.condition_type == condition.condition_type)
    {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                Some(now())
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now());
            conditions.push(condition);
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
