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

//! Fleet-level conditions derived from node statuses.

use crate::staticpod::operator::types::{set_condition, Condition, OperatorStatus};

use std::collections::BTreeMap;

pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_NODE_INSTALLER_FAILING: &str = "NodeInstallerFailing";
pub const CONDITION_INSTALLER_CONTROLLER_FAILING: &str = "InstallerControllerFailing";

/// Recomputes `Available`, `Progressing` and `NodeInstallerFailing` from the
/// node statuses in `status`.
pub fn set_fleet_conditions(status: &mut OperatorStatus) {
    let latest = status.latest_available_deployment_generation;
    let mut active = 0;
    let mut progressing = 0;
    let mut at_generation: BTreeMap<i32, usize> = BTreeMap::new();
    let mut failing: BTreeMap<i32, (usize, Vec<String>)> = BTreeMap::new();

    for node in &status.node_statuses {
        if node.current_deployment_generation != 0 {
            active += 1;
        }
        if node.current_deployment_generation != latest {
            progressing += 1;
        }
        *at_generation
            .entry(node.current_deployment_generation)
            .or_default() += 1;

        if node.last_failed_deployment_generation != 0 {
            let entry = failing
                .entry(node.last_failed_deployment_generation)
                .or_default();
            entry.0 += 1;
            entry
                .1
                .extend(node.last_failed_deployment_errors.iter().cloned());
        }
    }

    let description = at_generation
        .iter()
        .map(|(generation, count)| format!("{} nodes are at generation {}", count, generation))
        .collect::<Vec<_>>()
        .join("; ");

    let available = Condition::new(CONDITION_AVAILABLE, active > 0)
        .with_message(format!("{} nodes are active; {}", active, description));
    let available = if active > 0 {
        available
    } else {
        available.with_reason("ZeroNodesActive")
    };
    set_condition(&mut status.conditions, available);

    let progressing_condition =
        Condition::new(CONDITION_PROGRESSING, progressing > 0).with_message(description);
    let progressing_condition = if progressing > 0 {
        progressing_condition
    } else {
        progressing_condition.with_reason("AllNodesAtLatestGeneration")
    };
    set_condition(&mut status.conditions, progressing_condition);

    if failing.is_empty() {
        set_condition(
            &mut status.conditions,
            Condition::new(CONDITION_NODE_INSTALLER_FAILING, false),
        );
    } else {
        let message = failing
            .iter()
            .map(|(generation, (count, errors))| {
                format!(
                    "{} nodes are failing on generation {}:\n{}",
                    count,
                    generation,
                    errors.join("\n")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        set_condition(
            &mut status.conditions,
            Condition::new(CONDITION_NODE_INSTALLER_FAILING, true)
                .with_reason("InstallerPodFailed")
                .with_message(message),
        );
    }
}

/// Records the outcome of a reconcile pass. `None` clears the condition.
pub fn set_controller_failing(status: &mut OperatorStatus, error: Option<&str>) {
    let condition = match error {
        Some(message) => Condition::new(CONDITION_INSTALLER_CONTROLLER_FAILING, true)
            .with_reason("Error")
            .with_message(message),
        None => Condition::new(CONDITION_INSTALLER_CONTROLLER_FAILING, false),
    };
    set_condition(&mut status.conditions, condition);
}

/// Number of nodes whose last install attempt failed.
pub fn failing_node_count(status: &OperatorStatus) -> usize {
    status
        .node_statuses
        .iter()
        .filter(|node| node.last_failed_deployment_generation != 0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staticpod::operator::types::{find_condition, NodeStatus};

    fn status(latest: i32, nodes: Vec<NodeStatus>) -> OperatorStatus {
        OperatorStatus {
            latest_available_deployment_generation: latest,
            node_statuses: nodes,
            conditions: Vec::new(),
        }
    }

    #[test]
    fn fresh_fleet_is_unavailable_and_progressing() {
        let mut status = status(1, vec![NodeStatus::new("a"), NodeStatus::new("b")]);
        set_fleet_conditions(&mut status);

        let available = find_condition(&status.conditions, CONDITION_AVAILABLE).expect("available");
        assert!(!available.is_true());
        assert_eq!(available.reason.as_deref(), Some("ZeroNodesActive"));
        assert_eq!(
            available.message.as_deref(),
            Some("0 nodes are active; 2 nodes are at generation 0")
        );

        let progressing =
            find_condition(&status.conditions, CONDITION_PROGRESSING).expect("progressing");
        assert!(progressing.is_true());
    }

    #[test]
    fn converged_fleet_is_available_and_settled() {
        let mut status = status(
            2,
            vec![NodeStatus::at_generation("a", 2), NodeStatus::at_generation("b", 2)],
        );
        set_fleet_conditions(&mut status);

        let available = find_condition(&status.conditions, CONDITION_AVAILABLE).expect("available");
        assert!(available.is_true());
        let progressing =
            find_condition(&status.conditions, CONDITION_PROGRESSING).expect("progressing");
        assert!(!progressing.is_true());
        assert_eq!(progressing.reason.as_deref(), Some("AllNodesAtLatestGeneration"));
        let failing = find_condition(&status.conditions, CONDITION_NODE_INSTALLER_FAILING)
            .expect("failing");
        assert!(!failing.is_true());
    }

    #[test]
    fn failed_nodes_are_grouped_by_generation() {
        let mut a = NodeStatus::at_generation("a", 1);
        a.last_failed_deployment_generation = 2;
        a.last_failed_deployment_errors = vec!["installer: disk full".to_string()];
        let mut status = status(2, vec![a, NodeStatus::at_generation("b", 1)]);
        set_fleet_conditions(&mut status);

        let failing = find_condition(&status.conditions, CONDITION_NODE_INSTALLER_FAILING)
            .expect("failing");
        assert!(failing.is_true());
        assert_eq!(failing.reason.as_deref(), Some("InstallerPodFailed"));
        assert_eq!(
            failing.message.as_deref(),
            Some("1 nodes are failing on generation 2:\ninstaller: disk full")
        );
        assert_eq!(failing_node_count(&status), 1);
    }

    #[test]
    fn controller_failing_tracks_pass_outcome() {
        let mut status = OperatorStatus::default();
        set_controller_failing(&mut status, Some("boom"));
        let condition = find_condition(&status.conditions, CONDITION_INSTALLER_CONTROLLER_FAILING)
            .expect("condition");
        assert!(condition.is_true());
        assert_eq!(condition.reason.as_deref(), Some("Error"));
        assert_eq!(condition.message.as_deref(), Some("boom"));

        set_controller_failing(&mut status, None);
        let condition = find_condition(&status.conditions, CONDITION_INSTALLER_CONTROLLER_FAILING)
            .expect("condition");
        assert!(!condition.is_true());
        assert_eq!(condition.message, None);
    }
}
