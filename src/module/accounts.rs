//! Operating-system account provisioning rules.
//!
//! Keeping the default name means "manage this account for me"; any other
//! name means the operator already manages it. User and group are decided
//! independently.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{DEFAULT_GROUP, DEFAULT_USER};

use super::validate::ValidatedConfig;

/// Home directory of the managed service account.
pub const SERVICE_HOME: &str = "/var/lib/annil-server";
/// Supplementary group granted to the managed service account.
pub const NETWORK_GROUP: &str = "networkmanager";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRule {
    pub name: String,
    pub system: bool,
    pub home: PathBuf,
    pub group: String,
    pub extra_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRule {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupRule>,
}

impl AccountRules {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.group.is_none()
    }
}

pub fn build_accounts(config: &ValidatedConfig) -> AccountRules {
    let user = (config.user == DEFAULT_USER).then(|| UserRule {
        name: config.user.clone(),
        system: true,
        home: PathBuf::from(SERVICE_HOME),
        group: config.group.clone(),
        extra_groups: vec![NETWORK_GROUP.to_string()],
    });

    let group = (config.group == DEFAULT_GROUP).then(|| GroupRule {
        name: config.group.clone(),
    });

    AccountRules { user, group }
}
