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

use crate::staticpod::k8s::pod::Pod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

const WATCH_BUFFER_SIZE: usize = 128;

/// Kubernetes-style watch notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchEvent<T> {
    #[serde(rename = "type")]
    pub event_type: String,
    pub object: T,
}

/// Pod API errors, classified the way callers need to branch on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodApiError {
    AlreadyExists { namespace: String, name: String },
    NotFound { namespace: String, name: String },
    Other(String),
}

impl PodApiError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, PodApiError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PodApiError::NotFound { .. })
    }
}

impl Display for PodApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PodApiError::AlreadyExists { name, .. } => {
                write!(f, "pods \"{}\" already exists", name)
            }
            PodApiError::NotFound { name, .. } => write!(f, "pods \"{}\" not found", name),
            PodApiError::Other(message) => write!(f, "pod api error: {}", message),
        }
    }
}

impl Error for PodApiError {}

/// Blocking request/response access to pods.
pub trait PodApi: Send + Sync {
    fn create(&self, pod: &Pod) -> Result<Pod, PodApiError>;

    fn get(&self, namespace: &str, name: &str) -> Result<Pod, PodApiError>;

    fn delete(&self, namespace: &str, name: &str) -> Result<(), PodApiError>;
}

/// Pod API backed by process memory. Every mutation is published to
/// subscribers, which the controller runtime turns into reconcile triggers.
pub struct InMemoryPodApi {
    pods: RwLock<HashMap<(String, String), Pod>>,
    sender: broadcast::Sender<WatchEvent<Pod>>,
    creates: AtomicUsize,
}

impl Default for InMemoryPodApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPodApi {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(WATCH_BUFFER_SIZE);
        Self {
            pods: RwLock::new(HashMap::new()),
            sender,
            creates: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent<Pod>> {
        self.sender.subscribe()
    }

    /// Creates or replaces a pod without the create semantics; used by
    /// whatever plays the node agent to report pod status.
    pub fn upsert(&self, pod: Pod) {
        let key = (pod.namespace().to_string(), pod.name().to_string());
        let event_type = {
            let mut pods = self.pods.write().unwrap_or_else(|p| p.into_inner());
            match pods.insert(key, pod.clone()) {
                Some(_) => "MODIFIED",
                None => "ADDED",
            }
        };
        self.publish(event_type, pod);
    }

    pub fn list(&self, namespace: &str) -> Vec<Pod> {
        let pods = self.pods.read().unwrap_or_else(|p| p.into_inner());
        let mut listed: Vec<Pod> = pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect();
        listed.sort_by(|a, b| a.name().cmp(b.name()));
        listed
    }

    /// Number of successful `create` calls so far.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn publish(&self, event_type: &str, pod: Pod) {
        let _ = self.sender.send(WatchEvent {
            event_type: event_type.to_string(),
            object: pod,
        });
    }
}

impl PodApi for InMemoryPodApi {
    fn create(&self, pod: &Pod) -> Result<Pod, PodApiError> {
        let namespace = pod.namespace().to_string();
        let name = pod.name().to_string();
        if name.is_empty() {
            return Err(PodApiError::Other("pod name is required".to_string()));
        }

        {
            let mut pods = self.pods.write().unwrap_or_else(|p| p.into_inner());
            let key = (namespace.clone(), name.clone());
            if pods.contains_key(&key) {
                return Err(PodApiError::AlreadyExists { namespace, name });
            }
            pods.insert(key, pod.clone());
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.publish("ADDED", pod.clone());
        Ok(pod.clone())
    }

    fn get(&self, namespace: &str, name: &str) -> Result<Pod, PodApiError> {
        let pods = self.pods.read().unwrap_or_else(|p| p.into_inner());
        pods.get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| PodApiError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    fn delete(&self, namespace: &str, name: &str) -> Result<(), PodApiError> {
        let removed = {
            let mut pods = self.pods.write().unwrap_or_else(|p| p.into_inner());
            pods.remove(&(namespace.to_string(), name.to_string()))
        };
        match removed {
            Some(pod) => {
                self.publish("DELETED", pod);
                Ok(())
            }
            None => Err(PodApiError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staticpod::k8s::pod::{ObjectMeta, PodSpec};

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod::new(
            ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            PodSpec::default(),
        )
    }

    #[test]
    fn create_twice_reports_already_exists() {
        let api = InMemoryPodApi::new();
        api.create(&pod("test", "installer-1-node-a")).expect("first create");
        let err = api
            .create(&pod("test", "installer-1-node-a"))
            .expect_err("duplicate create");
        assert!(err.is_already_exists());
        assert_eq!(err.to_string(), "pods \"installer-1-node-a\" already exists");
        assert_eq!(api.create_count(), 1);
    }

    #[test]
    fn get_and_delete_classify_missing_pods() {
        let api = InMemoryPodApi::new();
        let err = api.get("test", "missing").expect_err("missing pod");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "pods \"missing\" not found");
        assert!(api.delete("test", "missing").expect_err("delete").is_not_found());
    }

    #[tokio::test]
    async fn mutations_are_published() {
        let api = InMemoryPodApi::new();
        let mut events = api.subscribe();

        api.create(&pod("test", "a")).expect("create");
        api.upsert(pod("test", "a"));
        api.delete("test", "a").expect("delete");

        let kinds: Vec<String> = (0..3)
            .map(|_| events.try_recv().expect("event").event_type)
            .collect();
        assert_eq!(kinds, vec!["ADDED", "MODIFIED", "DELETED"]);
        assert!(api.list("test").is_empty());
    }
}
