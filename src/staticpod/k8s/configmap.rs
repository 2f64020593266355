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

use crate::staticpod::k8s::pod::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigMapApiError {
    NotFound { namespace: String, name: String },
    Other(String),
}

impl ConfigMapApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigMapApiError::NotFound { .. })
    }
}

impl Display for ConfigMapApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigMapApiError::NotFound { name, .. } => {
                write!(f, "configmaps \"{}\" not found", name)
            }
            ConfigMapApiError::Other(message) => write!(f, "configmap api error: {}", message),
        }
    }
}

impl Error for ConfigMapApiError {}

/// Read and replace access to config maps. Creation belongs to whoever
/// publishes deployment generations.
pub trait ConfigMapApi: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Result<ConfigMap, ConfigMapApiError>;

    fn update(&self, config_map: &ConfigMap) -> Result<ConfigMap, ConfigMapApiError>;
}

#[derive(Default)]
pub struct InMemoryConfigMapApi {
    maps: RwLock<HashMap<(String, String), ConfigMap>>,
    updates: AtomicUsize,
}

impl InMemoryConfigMapApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config_map: ConfigMap) {
        let key = (
            config_map.namespace().to_string(),
            config_map.name().to_string(),
        );
        let mut maps = self.maps.write().unwrap_or_else(|p| p.into_inner());
        maps.insert(key, config_map);
    }

    /// Number of successful `update` calls so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl ConfigMapApi for InMemoryConfigMapApi {
    fn get(&self, namespace: &str, name: &str) -> Result<ConfigMap, ConfigMapApiError> {
        let maps = self.maps.read().unwrap_or_else(|p| p.into_inner());
        maps.get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ConfigMapApiError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    fn update(&self, config_map: &ConfigMap) -> Result<ConfigMap, ConfigMapApiError> {
        let namespace = config_map.namespace().to_string();
        let name = config_map.name().to_string();
        let mut maps = self.maps.write().unwrap_or_else(|p| p.into_inner());
        let Some(stored) = maps.get_mut(&(namespace.clone(), name.clone())) else {
            return Err(ConfigMapApiError::NotFound { namespace, name });
        };

        let version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);
        let mut updated = config_map.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.resource_version = Some((version + 1).to_string());
        *stored = updated.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}
