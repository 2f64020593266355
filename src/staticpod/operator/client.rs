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

use crate::staticpod::k8s::client::WatchEvent;
use crate::staticpod::operator::types::{NodeStatus, OperatorSpec, OperatorStatus};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::RwLock;
use tokio::sync::broadcast;

const WATCH_BUFFER_SIZE: usize = 64;

/// Snapshot returned by [`OperatorClient::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorState {
    pub spec: OperatorSpec,
    pub status: OperatorStatus,
    pub resource_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// The stored object moved past the version the caller read.
    Conflict { expected: String, actual: String },
    Unavailable(String),
}

impl StatusError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StatusError::Conflict { .. })
    }
}

impl Display for StatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Conflict { expected, actual } => write!(
                f,
                "operator status conflict: resource version {} is stale (current {})",
                expected, actual
            ),
            StatusError::Unavailable(message) => {
                write!(f, "operator status unavailable: {}", message)
            }
        }
    }
}

impl Error for StatusError {}

/// Versioned access to the operator's spec and status.
pub trait OperatorClient: Send + Sync {
    fn get(&self) -> Result<OperatorState, StatusError>;

    /// Writes `status` if the stored object is still at `resource_version`
    /// and returns the new version.
    fn update_status(
        &self,
        resource_version: &str,
        status: &OperatorStatus,
    ) -> Result<String, StatusError>;
}

/// Reads the latest status, applies `mutate` and writes it back when it
/// changed. Returns the resulting status and whether a write happened.
pub fn update_status_with<F>(
    client: &dyn OperatorClient,
    mutate: F,
) -> Result<(OperatorStatus, bool), StatusError>
where
    F: FnOnce(&mut OperatorStatus),
{
    let state = client.get()?;
    let mut status = state.status.clone();
    mutate(&mut status);
    if status == state.status {
        return Ok((status, false));
    }
    client.update_status(&state.resource_version, &status)?;
    Ok((status, true))
}

struct StoredState {
    spec: OperatorSpec,
    status: OperatorStatus,
    version: u64,
}

/// Operator store kept in memory. Status writes are version checked and
/// published to subscribers.
pub struct InMemoryOperatorClient {
    state: RwLock<StoredState>,
    sender: broadcast::Sender<WatchEvent<OperatorStatus>>,
}

impl InMemoryOperatorClient {
    pub fn new(spec: OperatorSpec, status: OperatorStatus) -> Self {
        let (sender, _) = broadcast::channel(WATCH_BUFFER_SIZE);
        Self {
            state: RwLock::new(StoredState {
                spec,
                status,
                version: 1,
            }),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent<OperatorStatus>> {
        self.sender.subscribe()
    }

    pub fn status(&self) -> OperatorStatus {
        self.read(|state| state.status.clone())
    }

    pub fn resource_version(&self) -> String {
        self.read(|state| state.version.to_string())
    }

    pub fn set_spec(&self, spec: OperatorSpec) {
        self.write(|state| state.spec = spec);
    }

    /// Publishes a new generation, as the revision controller would.
    pub fn set_latest_available_generation(&self, generation: i32) {
        self.write(|state| state.status.latest_available_deployment_generation = generation);
    }

    /// Replaces node membership, as the node controller would.
    pub fn set_node_statuses(&self, nodes: Vec<NodeStatus>) {
        self.write(|state| state.status.node_statuses = nodes);
    }

    fn read<T>(&self, f: impl FnOnce(&StoredState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(|p| p.into_inner());
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut StoredState)) {
        let status = {
            let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
            f(&mut guard);
            guard.version += 1;
            guard.status.clone()
        };
        self.publish(status);
    }

    fn publish(&self, status: OperatorStatus) {
        let _ = self.sender.send(WatchEvent {
            event_type: "MODIFIED".to_string(),
            object: status,
        });
    }
}

impl OperatorClient for InMemoryOperatorClient {
    fn get(&self) -> Result<OperatorState, StatusError> {
        Ok(self.read(|state| OperatorState {
            spec: state.spec.clone(),
            status: state.status.clone(),
            resource_version: state.version.to_string(),
        }))
    }

    fn update_status(
        &self,
        resource_version: &str,
        status: &OperatorStatus,
    ) -> Result<String, StatusError> {
        let version = {
            let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
            let current = guard.version.to_string();
            if current != resource_version {
                return Err(StatusError::Conflict {
                    expected: resource_version.to_string(),
                    actual: current,
                });
            }
            guard.status = status.clone();
            guard.version += 1;
            guard.version.to_string()
        };
        self.publish(status.clone());
        Ok(version)
    }
}
