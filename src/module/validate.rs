use crate::config::{Configuration, PackageRef};

use super::error::{ConfigError, RequiredField};
use super::settings::Settings;

/// Configuration that passed validation: required fields are guaranteed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub package: PackageRef,
    pub settings: Settings,
    pub user: String,
    pub group: String,
}

/// Check cross-field invariants.
///
/// Returns `Ok(None)` for a disabled module whatever the other fields hold.
/// An empty settings table counts as present.
pub fn validate(config: &Configuration) -> Result<Option<ValidatedConfig>, ConfigError> {
    if !config.enabled {
        return Ok(None);
    }

    let settings = config
        .settings
        .as_ref()
        .ok_or(ConfigError::MissingRequiredField {
            field: RequiredField::Settings,
        })?;
    let package = config
        .package
        .as_ref()
        .ok_or(ConfigError::MissingRequiredField {
            field: RequiredField::Package,
        })?;

    Ok(Some(ValidatedConfig {
        package: package.clone(),
        settings: settings.clone(),
        user: config.user.clone(),
        group: config.group.clone(),
    }))
}
