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

//! Node ordering for static pod rollouts.
//!
//! Nodes advance one at a time. A pass starts at the node chosen by
//! [`select_start_node`] and walks the list round-robin; within that walk a
//! node only picks up the generation its predecessor already runs, so a new
//! generation sweeps across the fleet as a single wavefront.

use crate::staticpod::controller::staticpod::StaticPodObservation;
use crate::staticpod::operator::types::NodeStatus;

/// Picks the node a reconcile pass starts from.
///
/// In-flight nodes come first. Otherwise the first node whose static pod is
/// not ready at its current generation is repaired before healthy nodes are
/// touched. A healthy fleet starts at node 0. Observer errors abort the
/// selection.
pub fn select_start_node<F, E>(nodes: &[NodeStatus], mut observe: F) -> Result<usize, E>
where
    F: FnMut(&NodeStatus) -> Result<StaticPodObservation, E>,
{
    if let Some(index) = nodes.iter().position(NodeStatus::is_in_transition) {
        return Ok(index);
    }

    for (index, node) in nodes.iter().enumerate() {
        let observation = observe(node)?;
        if !observation.is_ready_at(node.current_deployment_generation) {
            return Ok(index);
        }
    }

    Ok(0)
}

/// One step of a pass: the node to examine and its predecessor in this
/// pass's order. The first step has no predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutStep {
    pub index: usize,
    pub previous: Option<usize>,
}

/// Round-robin order over `len` nodes starting at `start`.
pub fn rollout_order(start: usize, len: usize) -> impl Iterator<Item = RolloutStep> {
    (0..len).map(move |offset| RolloutStep {
        index: (start + offset) % len,
        previous: (offset > 0).then(|| (start + offset - 1) % len),
    })
}

/// Generation `current` should start installing, or zero when it should
/// stay where it is.
///
/// The first node of a pass goes straight to `latest_available` unless it
/// already runs it or already failed on it. Every later node waits for its
/// predecessor to be idle and then follows it one generation at a time,
/// skipping a generation it has already failed on.
pub fn deployment_generation_to_start(
    current: &NodeStatus,
    previous: Option<&NodeStatus>,
    latest_available: i32,
) -> i32 {
    let Some(previous) = previous else {
        let current_at_latest = current.current_deployment_generation == latest_available;
        let failed_at_latest = current.last_failed_deployment_generation == latest_available;
        if current_at_latest || failed_at_latest {
            return 0;
        }
        return latest_available;
    };

    if previous.is_in_transition() {
        return 0;
    }

    let previous_ahead =
        previous.current_deployment_generation > current.current_deployment_generation;
    let failed_at_previous =
        current.last_failed_deployment_generation == previous.current_deployment_generation;
    if previous_ahead && !failed_at_previous {
        return previous.current_deployment_generation;
    }

    0
}
