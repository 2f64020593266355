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

//! Per-generation outcome records.
//!
//! Whoever publishes a deployment generation also creates a
//! `deployment-status-<generation>` config map. The controller writes the
//! outcome into its `status` key and points each installer pod at it, so
//! deleting the record takes the generation's installers with it.

use crate::staticpod::k8s::configmap::{ConfigMapApi, ConfigMapApiError};
use crate::staticpod::k8s::pod::OwnerReference;
use crate::staticpod::logger::LogEntry;
use crate::staticpod::operator::types::OperatorStatus;

use std::collections::BTreeSet;
use std::sync::Arc;

const COMPONENT: &str = "generation-status";

pub const STATUS_KEY: &str = "status";
pub const STATUS_SUCCEEDED: &str = "Succeeded";
pub const STATUS_FAILED: &str = "Failed";

pub fn generation_status_name(generation: i32) -> String {
    format!("deployment-status-{}", generation)
}

pub struct GenerationStatusRecorder {
    config_maps: Arc<dyn ConfigMapApi>,
    namespace: String,
}

impl GenerationStatusRecorder {
    pub fn new(config_maps: Arc<dyn ConfigMapApi>, namespace: impl Into<String>) -> Self {
        Self {
            config_maps,
            namespace: namespace.into(),
        }
    }

    /// Marks the generation every node runs as succeeded and every
    /// generation a node last failed on as failed. Missing records are
    /// skipped and write errors are only logged.
    pub fn record(&self, status: &OperatorStatus) {
        let current: BTreeSet<i32> = status
            .node_statuses
            .iter()
            .map(|node| node.current_deployment_generation)
            .collect();
        let failed: BTreeSet<i32> = status
            .node_statuses
            .iter()
            .map(|node| node.last_failed_deployment_generation)
            .filter(|generation| *generation != 0)
            .collect();

        if current.len() == 1 {
            for generation in current.into_iter().filter(|generation| *generation != 0) {
                self.mark_logged(generation, STATUS_SUCCEEDED);
            }
        }
        for generation in failed {
            self.mark_logged(generation, STATUS_FAILED);
        }
    }

    /// Writes `outcome` into the generation's record. Returns whether a
    /// write happened.
    pub fn mark(&self, generation: i32, outcome: &str) -> Result<bool, ConfigMapApiError> {
        let name = generation_status_name(generation);
        let mut record = match self.config_maps.get(&self.namespace, &name) {
            Ok(record) => record,
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(err),
        };
        if record.data.get(STATUS_KEY).map(String::as_str) == Some(outcome) {
            return Ok(false);
        }
        record.data.insert(STATUS_KEY.to_string(), outcome.to_string());
        match self.config_maps.update(&record) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn mark_logged(&self, generation: i32, outcome: &str) {
        match self.mark(generation, outcome) {
            Ok(true) => LogEntry::info(COMPONENT, "Recorded deployment generation outcome")
                .generation("generation", generation)
                .text(STATUS_KEY, outcome)
                .emit(),
            Ok(false) => {}
            Err(err) => LogEntry::error(COMPONENT, "Failed to record deployment generation outcome")
                .generation("generation", generation)
                .failure(&err)
                .emit(),
        }
    }

    /// Owner reference from an installer pod to its generation's record, or
    /// `None` when the record does not exist.
    pub fn owner_reference(
        &self,
        generation: i32,
    ) -> Result<Option<OwnerReference>, ConfigMapApiError> {
        let name = generation_status_name(generation);
        let record = match self.config_maps.get(&self.namespace, &name) {
            Ok(record) => record,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(record.metadata.uid.map(|uid| OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name,
            uid,
        }))
    }
}
