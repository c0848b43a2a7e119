//! skylift.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default synthesis output directory.
const DEFAULT_OUTPUT: &str = "skylift.out";
/// Default number of work items deployed concurrently.
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkyliftConfig {
    pub project: ProjectSettings,
    pub deploy: Option<DeploySettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Build all assets up front instead of just-in-time before their stack.
    pub prebuild_assets: Option<bool>,
    /// Maximum number of work items in flight at once.
    pub concurrency: Option<usize>,
    /// Synthesis output directory, also the unit of cross-process locking.
    pub output: Option<String>,
}

impl SkyliftConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SkyliftConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal skylift.toml for a new project.
    pub fn scaffold(name: &str) -> Self {
        SkyliftConfig {
            project: ProjectSettings {
                name: name.to_string(),
                version: Some("0.1.0".to_string()),
            },
            deploy: Some(DeploySettings {
                prebuild_assets: Some(true),
                concurrency: Some(DEFAULT_CONCURRENCY),
                output: Some(DEFAULT_OUTPUT.to_string()),
            }),
        }
    }

    pub fn prebuild_assets(&self) -> bool {
        self.deploy
            .as_ref()
            .and_then(|d| d.prebuild_assets)
            .unwrap_or(true)
    }

    pub fn concurrency(&self) -> usize {
        self.deploy
            .as_ref()
            .and_then(|d| d.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1)
    }

    pub fn output(&self) -> &str {
        self.deploy
            .as_ref()
            .and_then(|d| d.output.as_deref())
            .unwrap_or(DEFAULT_OUTPUT)
    }
}
