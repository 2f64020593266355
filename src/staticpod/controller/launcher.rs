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

use crate::staticpod::config::{ContentSource, InstallerControllerConfig};
use crate::staticpod::controller::generation_status::GenerationStatusRecorder;
use crate::staticpod::k8s::client::{PodApi, PodApiError};
use crate::staticpod::k8s::configmap::ConfigMapApiError;
use crate::staticpod::k8s::pod::{
    ContainerSpec, HostPathVolumeSource, ObjectMeta, Pod, PodSpec, SecurityContext, VolumeMount,
    VolumeSpec,
};
use crate::staticpod::logger::LogEntry;
use crate::staticpod::observability::metrics;

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

const COMPONENT: &str = "installer-launcher";

pub const INSTALLER_CONTAINER_NAME: &str = "installer";
pub const INSTALLER_SERVICE_ACCOUNT: &str = "installer-sa";
pub const INSTALLER_APP_LABEL: &str = "installer";
pub const HOST_CONFIG_VOLUME: &str = "kubelet-dir";
pub const HOST_CONFIG_DIR: &str = "/etc/kubernetes/";

/// Adjusts an installer pod before it is created. Receives the node name and
/// the generation being installed.
pub type InstallerPodMutation =
    Arc<dyn Fn(&mut Pod, &str, i32) -> Result<(), Box<dyn Error + Send + Sync>> + Send + Sync>;

#[derive(Debug)]
pub enum LauncherError {
    Api(PodApiError),
    InvalidConfig(String),
    Mutation(Box<dyn Error + Send + Sync>),
    StatusRecord(ConfigMapApiError),
}

impl Display for LauncherError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LauncherError::Api(err) => write!(f, "installer pod api error: {}", err),
            LauncherError::InvalidConfig(message) => {
                write!(f, "invalid installer configuration: {}", message)
            }
            LauncherError::Mutation(err) => write!(f, "installer pod mutation failed: {}", err),
            LauncherError::StatusRecord(err) => {
                write!(f, "unable to look up installer pod owner: {}", err)
            }
        }
    }
}

impl Error for LauncherError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LauncherError::Api(err) => Some(err),
            LauncherError::Mutation(err) => Some(err.as_ref()),
            LauncherError::StatusRecord(err) => Some(err),
            LauncherError::InvalidConfig(_) => None,
        }
    }
}

impl From<PodApiError> for LauncherError {
    fn from(err: PodApiError) -> Self {
        LauncherError::Api(err)
    }
}

pub fn installer_pod_name(generation: i32, node_name: &str) -> String {
    format!("installer-{}-{}", generation, node_name)
}

fn push_sources(args: &mut Vec<String>, sources: &[ContentSource], flag: &str) {
    for source in sources {
        if source.optional {
            args.push(format!("--optional-{}={}", flag, source.name));
        } else {
            args.push(format!("--{}={}", flag, source.name));
        }
    }
}

/// Command line handed to the installer binary for `generation`.
pub fn installer_args(
    config: &InstallerControllerConfig,
    generation: i32,
) -> Result<Vec<String>, LauncherError> {
    let manifest = config.config_maps.first().ok_or_else(|| {
        LauncherError::InvalidConfig("at least one config map is required".to_string())
    })?;
    if manifest.optional {
        return Err(LauncherError::InvalidConfig(format!(
            "config map {} holds the pod manifest and cannot be optional",
            manifest.name
        )));
    }

    let mut args = vec![
        format!("-v={}", config.verbosity),
        format!("--deployment-id={}", generation),
        format!("--namespace={}", config.target_namespace),
        format!("--pod={}", manifest.name),
        format!("--resource-dir={}", config.resource_dir.display()),
        format!("--pod-manifest-dir={}", config.pod_manifest_dir.display()),
    ];
    push_sources(&mut args, &config.config_maps, "configmaps");
    push_sources(&mut args, &config.secrets, "secrets");

    if let Some(certs) = config.certs.as_ref().filter(|c| !c.cert_dir.is_empty()) {
        args.push(format!(
            "--cert-dir={}",
            config.resource_dir.join(&certs.cert_dir).display()
        ));
        push_sources(&mut args, &certs.config_maps, "cert-configmaps");
        push_sources(&mut args, &certs.secrets, "cert-secrets");
    }

    Ok(args)
}

/// Creates installer pods. Creation is idempotent: an installer pod that
/// already exists counts as launched.
pub struct InstallerPodLauncher {
    pods: Arc<dyn PodApi>,
    generation_status: Arc<GenerationStatusRecorder>,
    config: Arc<InstallerControllerConfig>,
    mutations: Vec<InstallerPodMutation>,
}

impl InstallerPodLauncher {
    pub fn new(
        pods: Arc<dyn PodApi>,
        generation_status: Arc<GenerationStatusRecorder>,
        config: Arc<InstallerControllerConfig>,
    ) -> Self {
        Self {
            pods,
            generation_status,
            config,
            mutations: Vec::new(),
        }
    }

    pub fn with_mutation(mut self, mutation: InstallerPodMutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Builds the installer pod for `node_name` without creating it. The
    /// pod is owned by the generation's status record when one exists.
    pub fn build_pod(&self, node_name: &str, generation: i32) -> Result<Pod, LauncherError> {
        let args = installer_args(&self.config, generation)?;
        let owner = self
            .generation_status
            .owner_reference(generation)
            .map_err(LauncherError::StatusRecord)?;

        let mut labels = HashMap::new();
        labels.insert("app".to_string(), INSTALLER_APP_LABEL.to_string());

        let container = ContainerSpec {
            name: INSTALLER_CONTAINER_NAME.to_string(),
            image: Some(self.config.installer_image.clone()),
            command: self.config.command.clone(),
            args,
            volume_mounts: vec![VolumeMount {
                name: HOST_CONFIG_VOLUME.to_string(),
                mount_path: HOST_CONFIG_DIR.to_string(),
                read_only: None,
            }],
            security_context: Some(SecurityContext {
                privileged: Some(true),
                run_as_user: Some(0),
            }),
            termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        };

        let mut pod = Pod::new(
            ObjectMeta {
                name: Some(installer_pod_name(generation, node_name)),
                namespace: Some(self.config.target_namespace.clone()),
                labels,
                owner_references: owner.into_iter().collect(),
                ..Default::default()
            },
            PodSpec {
                containers: vec![container],
                volumes: vec![VolumeSpec {
                    name: HOST_CONFIG_VOLUME.to_string(),
                    host_path: Some(HostPathVolumeSource {
                        path: HOST_CONFIG_DIR.to_string(),
                        r#type: None,
                    }),
                }],
                restart_policy: Some("Never".to_string()),
                service_account_name: Some(INSTALLER_SERVICE_ACCOUNT.to_string()),
                node_name: Some(node_name.to_string()),
            },
        );

        for mutation in &self.mutations {
            mutation(&mut pod, node_name, generation).map_err(LauncherError::Mutation)?;
        }
        Ok(pod)
    }

    /// Ensures the installer pod for `generation` exists on `node_name`.
    pub fn ensure_installer_pod(&self, node_name: &str, generation: i32) -> Result<(), LauncherError> {
        let pod = self.build_pod(node_name, generation)?;
        match self.pods.create(&pod) {
            Ok(_) => {
                metrics::record_installer_pod_created();
                LogEntry::info(COMPONENT, "Created installer pod")
                    .pod(pod.name())
                    .node(node_name)
                    .generation("generation", generation)
                    .emit();
                Ok(())
            }
            Err(err) if err.is_already_exists() => {
                LogEntry::debug(COMPONENT, "Installer pod already exists")
                    .pod(pod.name())
                    .node(node_name)
                    .emit();
                Ok(())
            }
            Err(err) => Err(LauncherError::Api(err)),
        }
    }
}
