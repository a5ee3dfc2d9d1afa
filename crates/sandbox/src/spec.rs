//! Launch parameters for one sandbox.

/// A named volume mounted read-write into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Deterministic name; at most one sandbox with a given name may exist.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub volumes: Vec<VolumeMount>,
    pub working_dir: Option<String>,
    /// CPU set the process is pinned to (`--cpuset-cpus`).
    pub cpuset: Option<String>,
    pub network: Option<String>,
    pub env: Vec<(String, String)>,
}

impl SandboxSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command,
            volumes: Vec::new(),
            working_dir: None,
            cpuset: None,
            network: None,
            env: Vec::new(),
        }
    }
}
