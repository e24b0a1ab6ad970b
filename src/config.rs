use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::module::Settings;

/// Account name that asks the module to manage the account itself.
pub const DEFAULT_USER: &str = "annil-server";
/// Group name that asks the module to manage the group itself.
pub const DEFAULT_GROUP: &str = "annil-server";

/// Executable shipped inside every annil-server package.
pub const SERVER_BINARY: &str = "annil-server";

/// Installed build output of annil-server (a prefix containing `bin/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef(PathBuf);

impl PackageRef {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self(prefix.into())
    }

    pub fn prefix(&self) -> &Path {
        &self.0
    }

    /// Path of the server executable inside the package.
    pub fn binary_path(&self) -> PathBuf {
        self.0.join("bin").join(SERVER_BINARY)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Deployer-facing module options. Defaults are applied before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    #[serde(rename = "enable")]
    pub enabled: bool,
    pub package: Option<PackageRef>,
    pub settings: Option<Settings>,
    pub user: String,
    pub group: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enabled: false,
            package: None,
            settings: None,
            user: DEFAULT_USER.into(),
            group: DEFAULT_GROUP.into(),
        }
    }
}

impl Configuration {
    /// Load from a `.json` file, or TOML for any other extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))?
        } else {
            Self::from_toml_str(&contents)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?
        };

        log::debug!("Loaded module configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config")
    }
}
