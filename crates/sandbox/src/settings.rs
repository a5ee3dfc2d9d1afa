//! Deployment settings shared by every sandbox launched from this host.

use alaska_core::config::{env_list, env_or, ConfigError};

use crate::spec::{SandboxSpec, VolumeMount};

/// Environment-derived sandbox settings.
///
/// | Env Var               | Default           |
/// |-----------------------|-------------------|
/// | `REPO_NAME`           | `alaska`          |
/// | `DATA_VOLUME`         | `data`            |
/// | `DATA_PATH`           | `/alaska/data`    |
/// | `SCRIPT_VOLUME`       | `scripts`         |
/// | `SCRIPT_PATH`         | `/alaska/scripts` |
/// | `BACKEND_NETWORK`     | `backend`         |
/// | `SANDBOX_CPUS`        | `0`               |
/// | `ENVIRONMENT`         | `default`         |
/// | `SANDBOX_FORWARD_ENV` | (empty)           |
///
/// Volume and network names are prefixed with `<REPO_NAME>_`, matching the
/// names compose gives them.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub repo_name: String,
    pub data_volume: String,
    pub data_path: String,
    pub script_volume: String,
    pub script_path: String,
    pub network: String,
    pub cpus: String,
    pub environment: String,
    /// Host variables copied into every sandbox when set.
    pub forward_env: Vec<String>,
}

impl SandboxSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            repo_name: env_or("REPO_NAME", "alaska"),
            data_volume: env_or("DATA_VOLUME", "data"),
            data_path: env_or("DATA_PATH", "/alaska/data"),
            script_volume: env_or("SCRIPT_VOLUME", "scripts"),
            script_path: env_or("SCRIPT_PATH", "/alaska/scripts"),
            network: env_or("BACKEND_NETWORK", "backend"),
            cpus: env_or("SANDBOX_CPUS", "0"),
            environment: env_or("ENVIRONMENT", "default"),
            forward_env: env_list("SANDBOX_FORWARD_ENV"),
        })
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}_{}", self.repo_name, name)
    }

    pub fn volumes(&self) -> Vec<VolumeMount> {
        vec![
            VolumeMount {
                source: self.prefixed(&self.data_volume),
                target: self.data_path.clone(),
            },
            VolumeMount {
                source: self.prefixed(&self.script_volume),
                target: self.script_path.clone(),
            },
        ]
    }

    pub fn network_name(&self) -> String {
        self.prefixed(&self.network)
    }

    /// `ENVIRONMENT` plus every forwarded variable present on the host.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![("ENVIRONMENT".to_string(), self.environment.clone())];
        env.extend(
            self.forward_env
                .iter()
                .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v))),
        );
        env
    }

    /// A spec carrying the shared mounts, network, working directory and
    /// environment. Callers add the CPU pin where appropriate.
    pub fn spec(&self, name: String, image: &str, command: Vec<String>) -> SandboxSpec {
        SandboxSpec {
            volumes: self.volumes(),
            working_dir: Some(self.script_path.clone()),
            network: Some(self.network_name()),
            env: self.env(),
            ..SandboxSpec::new(name, image, command)
        }
    }
}
