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

use crate::staticpod::logger::LogFormat;
use crate::staticpod::util::{new_error, with_context};
use std::env;
use std::error::Error;
use std::path::{Component, PathBuf};

pub const DEFAULT_RESOURCE_DIR: &str = "/etc/kubernetes/static-pod-resources";
pub const DEFAULT_POD_MANIFEST_DIR: &str = "/etc/kubernetes/manifests";
pub const DEFAULT_INSTALLER_VERBOSITY: u8 = 4;

/// Process-level settings read from the environment.
#[derive(Debug, Clone, Copy)]
pub enum Config {
    InstallerImage,
    ResourceDir,
    PodManifestDir,
    InstallerVerbosity,
    LogFormat,
}

impl Config {
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::InstallerImage => "OPERATOR_IMAGE",
            Config::ResourceDir => "STATICPOD_RESOURCE_DIR",
            Config::PodManifestDir => "STATICPOD_POD_MANIFEST_DIR",
            Config::InstallerVerbosity => "STATICPOD_INSTALLER_VERBOSITY",
            Config::LogFormat => "STATICPOD_LOG_FORMAT",
        }
    }

    /// Default used when the variable is unset. `None` means the setting is
    /// required.
    pub fn default_value(&self) -> Option<&'static str> {
        match self {
            Config::InstallerImage => None,
            Config::ResourceDir => Some(DEFAULT_RESOURCE_DIR),
            Config::PodManifestDir => Some(DEFAULT_POD_MANIFEST_DIR),
            Config::InstallerVerbosity => Some("4"),
            Config::LogFormat => Some("text"),
        }
    }

    /// Returns the trimmed environment value, falling back to the default.
    /// Empty values count as unset.
    pub fn get(&self) -> Option<String> {
        env::var(self.env_var())
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| self.default_value().map(str::to_string))
    }

    pub fn get_path(&self) -> Option<PathBuf> {
        self.get().map(|value| normalize_path(&value))
    }
}

/// Collapses `.` and `..` components. Host paths are rendered into installer
/// arguments verbatim, so they must be absolute.
fn normalize_path(input: &str) -> PathBuf {
    PathBuf::from(input)
        .components()
        .fold(PathBuf::new(), |mut normalized, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                _ => normalized.push(component),
            }
            normalized
        })
}

/// A config map or secret that the installer copies for every generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSource {
    pub name: String,
    pub optional: bool,
}

impl ContentSource {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// Certificates copied to a fixed directory independent of the generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertSources {
    pub cert_dir: String,
    pub config_maps: Vec<ContentSource>,
    pub secrets: Vec<ContentSource>,
}

/// Everything the installer controller needs at construction time.
///
/// The first entry of `config_maps` holds the static pod manifest and is
/// passed to the installer as `--pod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerControllerConfig {
    pub target_namespace: String,
    pub static_pod_name: String,
    pub config_maps: Vec<ContentSource>,
    pub secrets: Vec<ContentSource>,
    pub command: Vec<String>,
    pub installer_image: String,
    pub verbosity: u8,
    pub resource_dir: PathBuf,
    pub pod_manifest_dir: PathBuf,
    pub certs: Option<CertSources>,
}

impl InstallerControllerConfig {
    pub fn new(
        target_namespace: impl Into<String>,
        static_pod_name: impl Into<String>,
        config_maps: Vec<ContentSource>,
        secrets: Vec<ContentSource>,
        command: Vec<String>,
        installer_image: impl Into<String>,
    ) -> Self {
        Self {
            target_namespace: target_namespace.into(),
            static_pod_name: static_pod_name.into(),
            config_maps,
            secrets,
            command,
            installer_image: installer_image.into(),
            verbosity: DEFAULT_INSTALLER_VERBOSITY,
            resource_dir: PathBuf::from(DEFAULT_RESOURCE_DIR),
            pod_manifest_dir: PathBuf::from(DEFAULT_POD_MANIFEST_DIR),
            certs: None,
        }
    }

    /// Builds a configuration whose image, verbosity and host directories
    /// come from the environment.
    pub fn from_env(
        target_namespace: impl Into<String>,
        static_pod_name: impl Into<String>,
        config_maps: Vec<ContentSource>,
        secrets: Vec<ContentSource>,
        command: Vec<String>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let image = Config::InstallerImage.get().ok_or_else(|| {
            new_error(format!(
                "{} must name the installer image",
                Config::InstallerImage.env_var()
            ))
        })?;
        let verbosity = Config::InstallerVerbosity
            .get()
            .unwrap_or_else(|| DEFAULT_INSTALLER_VERBOSITY.to_string());
        let verbosity = verbosity.parse::<u8>().map_err(|err| {
            with_context(
                err,
                format!("parsing {}", Config::InstallerVerbosity.env_var()),
            )
        })?;

        let mut config = Self::new(
            target_namespace,
            static_pod_name,
            config_maps,
            secrets,
            command,
            image,
        );
        config.verbosity = verbosity;
        if let Some(dir) = Config::ResourceDir.get_path() {
            config.resource_dir = dir;
        }
        if let Some(dir) = Config::PodManifestDir.get_path() {
            config.pod_manifest_dir = dir;
        }
        Ok(config)
    }

    pub fn with_certs(
        mut self,
        cert_dir: impl Into<String>,
        config_maps: Vec<ContentSource>,
        secrets: Vec<ContentSource>,
    ) -> Self {
        self.certs = Some(CertSources {
            cert_dir: cert_dir.into(),
            config_maps,
            secrets,
        });
        self
    }
}

/// Reads the log format selected through `STATICPOD_LOG_FORMAT`.
pub fn log_format_from_env() -> Result<LogFormat, Box<dyn Error + Send + Sync>> {
    let raw = Config::LogFormat.get().unwrap_or_else(|| "text".to_string());
    LogFormat::parse(&raw).ok_or_else(|| {
        new_error(format!(
            "unsupported {} value '{}'",
            Config::LogFormat.env_var(),
            raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = env::var(key).ok();
            env::set_var(key, value);
            Self { key, previous }
        }

        fn unset(key: &'static str) -> Self {
            let previous = env::var(key).ok();
            env::remove_var(key);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = self.previous.as_ref() {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn sources() -> (Vec<ContentSource>, Vec<ContentSource>) {
        (
            vec![ContentSource::required("kube-apiserver-pod")],
            vec![ContentSource::required("serving-cert")],
        )
    }

    #[test]
    #[serial]
    fn from_env_reads_image_and_overrides() {
        let _image = EnvGuard::set("OPERATOR_IMAGE", "registry.local/operator:v1");
        let _verbosity = EnvGuard::set("STATICPOD_INSTALLER_VERBOSITY", "2");
        let _resources = EnvGuard::set("STATICPOD_RESOURCE_DIR", "/srv/./resources/../static");
        let _manifests = EnvGuard::unset("STATICPOD_POD_MANIFEST_DIR");
        let (config_maps, secrets) = sources();

        let config = InstallerControllerConfig::from_env(
            "openshift-kube-apiserver",
            "kube-apiserver",
            config_maps,
            secrets,
            vec!["cluster-kube-apiserver-operator".into(), "installer".into()],
        )
        .expect("config");

        assert_eq!(config.installer_image, "registry.local/operator:v1");
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.resource_dir, PathBuf::from("/srv/static"));
        assert_eq!(config.pod_manifest_dir, PathBuf::from(DEFAULT_POD_MANIFEST_DIR));
    }

    #[test]
    #[serial]
    fn from_env_requires_installer_image() {
        let _image = EnvGuard::set("OPERATOR_IMAGE", "   ");
        let (config_maps, secrets) = sources();
        let err = InstallerControllerConfig::from_env("ns", "pod", config_maps, secrets, vec![])
            .expect_err("missing image must fail");
        assert!(err.to_string().contains("OPERATOR_IMAGE"));
    }

    #[test]
    #[serial]
    fn invalid_verbosity_is_reported_with_context() {
        let _image = EnvGuard::set("OPERATOR_IMAGE", "img");
        let _verbosity = EnvGuard::set("STATICPOD_INSTALLER_VERBOSITY", "loud");
        let (config_maps, secrets) = sources();
        let err = InstallerControllerConfig::from_env("ns", "pod", config_maps, secrets, vec![])
            .expect_err("bad verbosity");
        assert!(err
            .to_string()
            .starts_with("parsing STATICPOD_INSTALLER_VERBOSITY"));
    }

    #[test]
    #[serial]
    fn log_format_defaults_to_text() {
        let _format = EnvGuard::unset("STATICPOD_LOG_FORMAT");
        assert_eq!(log_format_from_env().expect("format"), LogFormat::Text);
        let _format = EnvGuard::set("STATICPOD_LOG_FORMAT", "yaml");
        assert!(log_format_from_env().is_err());
    }
}
