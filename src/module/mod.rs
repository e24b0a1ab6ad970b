//! Service module generator.
//!
//! A generation pass validates the [`Configuration`] and, only if the module
//! is enabled and valid, derives three independent artifacts:
//!
//! - `settings` - the TOML file annil-server reads with `--config`
//! - `unit` - the hardened systemd service unit
//! - `accounts` - user/group creation rules
//!
//! Validation runs before any derivation, so a failed pass yields nothing.

mod accounts;
mod error;
mod settings;
mod unit;
mod validate;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::Configuration;

pub use accounts::{AccountRules, GroupRule, NETWORK_GROUP, SERVICE_HOME, UserRule, build_accounts};
pub use error::{ConfigError, GenerateError, RequiredField};
pub use settings::{Settings, SettingsValue, parse_settings, render_settings};
pub use unit::{ServiceUnit, UNIT_NAME, build_unit};
pub use validate::{ValidatedConfig, validate};

/// Where the host will find the settings file.
///
/// When this path is overridden and later changed, the host finds the old
/// file through the `--config` argument of the installed unit and removes
/// it. A settings file whose unit is already gone is not tracked.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/annil-server/config.toml";

const ACCOUNTS_FILE: &str = "accounts.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// Absolute host path of the settings file, referenced by the unit.
    pub settings_path: PathBuf,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
        }
    }
}

/// Rendered settings file and its host location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Everything one enabled generation pass produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub settings: SettingsFile,
    pub unit: ServiceUnit,
    pub accounts: AccountRules,
}

/// Run a full generation pass.
///
/// `Ok(None)` means the module is disabled and nothing should exist on the
/// host. Any error aborts the pass before a single artifact is derived.
pub fn generate(
    config: &Configuration,
    options: &GeneratorOptions,
) -> Result<Option<Artifacts>, GenerateError> {
    let Some(validated) = validate(config)? else {
        debug!("annil-server module disabled, no artifacts generated");
        return Ok(None);
    };

    let settings = SettingsFile {
        path: options.settings_path.clone(),
        contents: render_settings(&validated.settings)?,
    };
    let unit = build_unit(&validated, &settings.path);
    let accounts = build_accounts(&validated);

    debug!(
        "Generated {} (user rule: {}, group rule: {})",
        unit.file_name(),
        accounts.user.is_some(),
        accounts.group.is_some()
    );

    Ok(Some(Artifacts {
        settings,
        unit,
        accounts,
    }))
}

impl Artifacts {
    /// Write every artifact into `dir` for inspection: the settings file
    /// (under its own file name), the unit file and `accounts.toml`.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, GenerateError> {
        fs::create_dir_all(dir)?;

        let settings_name = self
            .settings
            .path
            .file_name()
            .map_or_else(|| "config.toml".into(), |n| n.to_os_string());
        let accounts = toml::to_string_pretty(&self.accounts)
            .map_err(|e| GenerateError::Serialize(e.to_string()))?;
        let unit = self.unit.render();

        let files = [
            (dir.join(settings_name), self.settings.contents.as_str()),
            (dir.join(self.unit.file_name()), unit.as_str()),
            (dir.join(ACCOUNTS_FILE), accounts.as_str()),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (path, contents) in files {
            fs::write(&path, contents)?;
            info!("Wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackageRef;

    fn enabled() -> Configuration {
        Configuration {
            enabled: true,
            package: Some(PackageRef::new("/opt/annil-server")),
            settings: Some(Settings::from([("port".to_string(), SettingsValue::Integer(3000))])),
            ..Configuration::default()
        }
    }

    #[test]
    fn test_disabled_generates_nothing() {
        let config = Configuration {
            enabled: false,
            ..enabled()
        };
        assert_eq!(generate(&config, &GeneratorOptions::default()).unwrap(), None);
    }

    #[test]
    fn test_invalid_generates_nothing() {
        let config = Configuration {
            settings: None,
            ..enabled()
        };
        let err = generate(&config, &GeneratorOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Config(ConfigError::MissingRequiredField {
                field: RequiredField::Settings
            })
        ));
        assert!(err.to_string().contains("`settings` should not be empty"));
    }

    #[test]
    fn test_unit_references_settings_path() {
        let options = GeneratorOptions {
            settings_path: PathBuf::from("/run/annil/settings.toml"),
        };
        let artifacts = generate(&enabled(), &options).unwrap().unwrap();
        assert_eq!(artifacts.settings.path, options.settings_path);
        assert!(
            artifacts
                .unit
                .exec_start
                .ends_with("--config /run/annil/settings.toml")
        );
    }

    #[test]
    fn test_generation_is_repeatable() {
        let options = GeneratorOptions::default();
        assert_eq!(
            generate(&enabled(), &options).unwrap(),
            generate(&enabled(), &options).unwrap()
        );
    }

    #[test]
    fn test_write_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = generate(&enabled(), &GeneratorOptions::default())
            .unwrap()
            .unwrap();

        let written = artifacts.write_to(dir.path()).unwrap();
        assert_eq!(written.len(), 3);

        let settings = fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, artifacts.settings.contents);
        let unit = fs::read_to_string(dir.path().join("annil-server.service")).unwrap();
        assert!(unit.contains("NoNewPrivileges=true"));
        let accounts = fs::read_to_string(dir.path().join("accounts.toml")).unwrap();
        assert!(accounts.contains("networkmanager"));
    }
}
