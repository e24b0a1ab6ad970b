//! Host integration: applies generated artifacts to a Linux system.
//!
//! # Module Structure
//!
//! - `accounts` - group/user creation with shadow-utils
//! - `file_ops` - atomic, change-aware file writes
//! - `privileges` - root check before touching the system
//! - `service_control` - systemctl operations and state queries
//!
//! Applying is convergent: the same artifacts applied twice leave the host
//! untouched the second time, and a disabled module retires what an earlier
//! apply installed. Service state is queried on every apply, so an apply
//! that failed halfway is finished by the next one.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use nix::unistd::{Group, chown};
use thiserror::Error;

use crate::config::Configuration;
use crate::module::{Artifacts, GenerateError, GeneratorOptions, UNIT_NAME, generate};

mod accounts;
mod file_ops;
mod privileges;
mod service_control;

pub use file_ops::FileChange;
use service_control::Tools;

const UNIT_DIR: &str = "/etc/systemd/system";
const SETTINGS_MODE: u32 = 0o640;
const UNIT_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("{0}")]
    System(String),

    #[error("Insufficient privileges: applying to the host requires root")]
    PermissionDenied,

    #[error(transparent)]
    Generate(#[from] GenerateError),
}

/// Outcome of one [`Host::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub group_created: bool,
    pub user_created: bool,
    pub settings: FileChange,
    /// Settings file handed to the run-as group.
    pub settings_regrouped: bool,
    pub unit: FileChange,
    pub reloaded: bool,
    pub enabled: bool,
    pub restarted: bool,
}

impl ApplyReport {
    fn untouched() -> Self {
        Self {
            group_created: false,
            user_created: false,
            settings: FileChange::Unchanged,
            settings_regrouped: false,
            unit: FileChange::Unchanged,
            reloaded: false,
            enabled: false,
            restarted: false,
        }
    }

    /// Whether a running service would see stale accounts or files.
    fn needs_restart(&self) -> bool {
        self.group_created
            || self.user_created
            || self.settings.is_change()
            || self.settings_regrouped
            || self.unit.is_change()
    }

    /// Whether anything on the host was modified.
    pub fn changed(&self) -> bool {
        self.needs_restart() || self.reloaded || self.enabled || self.restarted
    }
}

/// Target system for applying artifacts.
#[derive(Debug, Clone)]
pub struct Host {
    root: PathBuf,
    settings_path: PathBuf,
    run_commands: bool,
    tools: Tools,
}

impl Host {
    /// `root` prefixes every file path (use `/` for the live system).
    /// With `run_commands` off no account or systemctl command is run, which
    /// is how an alternate root is staged.
    pub fn new(root: impl Into<PathBuf>, options: &GeneratorOptions, run_commands: bool) -> Self {
        Self {
            root: root.into(),
            settings_path: options.settings_path.clone(),
            run_commands,
            tools: Tools::default(),
        }
    }

    /// Look up `systemctl`, `useradd` and `groupadd` in `search_path`
    /// instead of `PATH`.
    pub fn with_tool_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.tools = Tools::with_search_path(search_path);
        self
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn unit_path(&self) -> PathBuf {
        self.host_path(&Path::new(UNIT_DIR).join(format!("{UNIT_NAME}.service")))
    }

    /// Generate artifacts for `config` with this host's settings path and
    /// apply them.
    pub fn converge(&self, config: &Configuration) -> Result<ApplyReport, InstallerError> {
        let options = GeneratorOptions {
            settings_path: self.settings_path.clone(),
        };
        let artifacts = generate(config, &options)?;
        self.apply(artifacts.as_ref())
    }

    /// Converge the host to `artifacts`; `None` retires the service.
    pub fn apply(&self, artifacts: Option<&Artifacts>) -> Result<ApplyReport, InstallerError> {
        // Commands against an alternate root only touch tools found there.
        if self.run_commands && self.root == Path::new("/") {
            privileges::check_privileges()?;
        }

        match artifacts {
            Some(artifacts) => self.install(artifacts),
            None => self.retire(),
        }
    }

    fn install(&self, artifacts: &Artifacts) -> Result<ApplyReport, InstallerError> {
        let mut report = ApplyReport::untouched();

        // Groups first: the user rule may name a group created here.
        if self.run_commands {
            if let Some(rule) = &artifacts.accounts.group {
                report.group_created = accounts::ensure_group(&self.tools, rule)?;
            }
            if let Some(rule) = &artifacts.accounts.user {
                report.user_created = accounts::ensure_user(&self.tools, rule)?;
            }
        } else if !artifacts.accounts.is_empty() {
            debug!("Skipping account provisioning, host commands disabled");
        }

        let binary = self.host_path(Path::new(artifacts.unit.program()));
        if !binary.exists() {
            warn!("Server binary {} does not exist", binary.display());
        }

        let previous_settings = self.installed_settings_path();

        let settings_path = self.host_path(&artifacts.settings.path);
        report.settings =
            file_ops::sync_file(&settings_path, &artifacts.settings.contents, SETTINGS_MODE)?;
        if self.run_commands {
            report.settings_regrouped =
                self.hand_settings_to_group(&settings_path, &artifacts.unit.group)?;
        }

        let unit_path = self.host_path(&Path::new(UNIT_DIR).join(artifacts.unit.file_name()));
        report.unit = file_ops::sync_file(&unit_path, &artifacts.unit.render(), UNIT_MODE)?;

        if let Some(previous) = previous_settings.filter(|p| *p != artifacts.settings.path) {
            if file_ops::remove_file_if_exists(&self.host_path(&previous))?.is_change() {
                info!("Removed settings file {} left by an earlier apply", previous.display());
            }
        }

        info!(
            "{}: settings {:?}, unit {:?}",
            artifacts.unit.name, report.settings, report.unit
        );

        if self.run_commands {
            self.converge_service(&artifacts.unit.file_name(), &mut report)?;
        }

        Ok(report)
    }

    /// Bring systemd in line with the files on disk. Each step runs when
    /// this apply changed something or systemd reports it is still owed.
    fn converge_service(
        &self,
        unit_file: &str,
        report: &mut ApplyReport,
    ) -> Result<(), InstallerError> {
        if report.unit.is_change() || self.tools.needs_daemon_reload(unit_file)? {
            self.tools.reload_systemd_daemon()?;
            report.reloaded = true;
        }

        if report.unit.is_change() || !self.tools.is_enabled(unit_file)? {
            self.tools.enable_systemd_service(unit_file)?;
            report.enabled = true;
        }

        if report.needs_restart() || !self.tools.is_active(unit_file)? {
            self.tools.restart_systemd_service(unit_file)?;
            report.restarted = true;
            info!("Restarted {}", unit_file);
        }

        Ok(())
    }

    fn retire(&self) -> Result<ApplyReport, InstallerError> {
        let mut report = ApplyReport::untouched();
        let unit_path = self.unit_path();

        // The installed unit knows where its settings went, even when the
        // settings path has been reconfigured since.
        let mut settings_paths = vec![self.settings_path.clone()];
        if let Some(recorded) = self.installed_settings_path() {
            if recorded != self.settings_path {
                settings_paths.push(recorded);
            }
        }

        if unit_path.exists() && self.run_commands {
            self.tools
                .disable_systemd_service_now(&format!("{UNIT_NAME}.service"))?;
        }

        report.unit = file_ops::remove_file_if_exists(&unit_path)?;
        report.settings = FileChange::Absent;
        for path in &settings_paths {
            if file_ops::remove_file_if_exists(&self.host_path(path))?.is_change() {
                report.settings = FileChange::Removed;
            }
        }

        if report.unit.is_change() {
            info!("Retired {} service", UNIT_NAME);
            if self.run_commands {
                self.tools.reload_systemd_daemon()?;
            }
        } else {
            debug!("{} not installed, nothing to retire", UNIT_NAME);
        }

        Ok(report)
    }

    /// Settings path named by `--config` in the installed unit, if any.
    fn installed_settings_path(&self) -> Option<PathBuf> {
        let unit = fs::read_to_string(self.unit_path()).ok()?;
        unit.lines()
            .find_map(|line| line.strip_prefix("ExecStart="))
            .and_then(|exec| exec.split_once(" --config "))
            .map(|(_, path)| PathBuf::from(path))
    }

    /// The settings may hold secrets: readable by root and the run-as group
    /// only. Returns whether the file's group had to change.
    fn hand_settings_to_group(&self, path: &Path, group: &str) -> Result<bool, InstallerError> {
        let Some(group) = Group::from_name(group).map_err(|e| {
            InstallerError::System(format!("Failed to look up group {}: {}", group, e))
        })?
        else {
            warn!(
                "Run-as group missing, {} stays readable by root only",
                path.display()
            );
            return Ok(false);
        };

        let current = fs::metadata(path)
            .map_err(|e| InstallerError::System(format!("Failed to stat {}: {}", path.display(), e)))?
            .gid();
        if current == group.gid.as_raw() {
            return Ok(false);
        }

        chown(path, None, Some(group.gid)).map_err(|e| {
            InstallerError::System(format!("Failed to chown {}: {}", path.display(), e))
        })?;
        info!("Settings file {} now owned by group {}", path.display(), group.name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use nix::unistd::{Gid, Uid};

    use super::*;
    use crate::config::PackageRef;
    use crate::module::{ConfigError, Settings, SettingsValue};

    fn config(port: i64) -> Configuration {
        Configuration {
            enabled: true,
            package: Some(PackageRef::new("/opt/annil-server")),
            settings: Some(Settings::from([(
                "port".to_string(),
                SettingsValue::Integer(port),
            )])),
            ..Configuration::default()
        }
    }

    fn artifacts(port: i64) -> Artifacts {
        generate(&config(port), &GeneratorOptions::default())
            .unwrap()
            .unwrap()
    }

    /// Runs as an existing group so no account commands are needed.
    fn artifacts_in_group(group: &str) -> Artifacts {
        let config = Configuration {
            user: "nobody".into(),
            group: group.into(),
            ..config(3000)
        };
        generate(&config, &GeneratorOptions::default())
            .unwrap()
            .unwrap()
    }

    fn staging(root: &Path) -> Host {
        Host::new(root, &GeneratorOptions::default(), false)
    }

    /// A `systemctl` that keeps unit state as marker files next to itself
    /// and logs each invocation to `calls`. A `fail-enable` marker makes the
    /// next `enable` fail.
    fn fake_systemctl(dir: &Path) {
        let script = r#"#!/bin/sh
dir=$(dirname "$0")
echo "$*" >> "$dir/calls"
case "$1" in
  enable)
    if [ -e "$dir/fail-enable" ]; then
      rm "$dir/fail-enable"
      echo "Failed to enable unit" >&2
      exit 1
    fi
    touch "$dir/enabled" ;;
  disable) rm -f "$dir/enabled" "$dir/active" ;;
  restart) touch "$dir/active" ;;
  is-enabled) [ -e "$dir/enabled" ] || exit 1 ;;
  is-active) [ -e "$dir/active" ] || exit 3 ;;
esac
exit 0
"#;
        let path = dir.join("systemctl");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn own_group() -> Group {
        Group::from_gid(Gid::effective()).unwrap().unwrap()
    }

    /// Two distinct groups this process may hand files to.
    fn two_groups() -> Option<(Group, Group)> {
        let mut gids = vec![Gid::effective()];
        gids.extend(nix::unistd::getgroups().unwrap_or_default());
        if Uid::effective().is_root() {
            gids.extend((0..1000).map(Gid::from_raw));
        }

        let mut found: Vec<Group> = Vec::new();
        for gid in gids {
            if let Ok(Some(group)) = Group::from_gid(gid) {
                if !found.iter().any(|g| g.gid == group.gid) {
                    found.push(group);
                }
            }
        }
        let second = found.get(1)?.clone();
        Some((found.swap_remove(0), second))
    }

    #[test]
    fn test_apply_writes_under_root() {
        let root = tempfile::tempdir().unwrap();
        let report = staging(root.path()).apply(Some(&artifacts(3000))).unwrap();

        assert_eq!(report.settings, FileChange::Created);
        assert_eq!(report.unit, FileChange::Created);
        assert!(!report.restarted);

        let settings =
            fs::read_to_string(root.path().join("etc/annil-server/config.toml")).unwrap();
        assert!(settings.contains("port = 3000"));
        let unit =
            fs::read_to_string(root.path().join("etc/systemd/system/annil-server.service"))
                .unwrap();
        assert!(unit.contains("--config /etc/annil-server/config.toml"));
    }

    #[test]
    fn test_second_apply_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let host = staging(root.path());
        host.apply(Some(&artifacts(3000))).unwrap();

        let report = host.apply(Some(&artifacts(3000))).unwrap();
        assert_eq!(report.settings, FileChange::Unchanged);
        assert_eq!(report.unit, FileChange::Unchanged);
        assert!(!report.changed());
    }

    #[test]
    fn test_settings_change_only_touches_settings() {
        let root = tempfile::tempdir().unwrap();
        let host = staging(root.path());
        host.apply(Some(&artifacts(3000))).unwrap();

        let report = host.apply(Some(&artifacts(3001))).unwrap();
        assert_eq!(report.settings, FileChange::Updated);
        assert_eq!(report.unit, FileChange::Unchanged);
    }

    #[test]
    fn test_settings_not_world_readable() {
        let root = tempfile::tempdir().unwrap();
        staging(root.path()).apply(Some(&artifacts(3000))).unwrap();
        let mode = fs::metadata(root.path().join("etc/annil-server/config.toml"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o007, 0);
    }

    #[test]
    fn test_disable_retires_then_noop() {
        let root = tempfile::tempdir().unwrap();
        let host = staging(root.path());
        host.apply(Some(&artifacts(3000))).unwrap();

        let report = host.apply(None).unwrap();
        assert_eq!(report.unit, FileChange::Removed);
        assert_eq!(report.settings, FileChange::Removed);
        assert!(!root.path().join("etc/systemd/system/annil-server.service").exists());
        assert!(!root.path().join("etc/annil-server/config.toml").exists());

        let report = host.apply(None).unwrap();
        assert_eq!(report.unit, FileChange::Absent);
        assert_eq!(report.settings, FileChange::Absent);
        assert!(!report.changed());
    }

    #[test]
    fn test_retire_removes_settings_recorded_in_unit() {
        let root = tempfile::tempdir().unwrap();
        staging(root.path()).apply(Some(&artifacts(3000))).unwrap();

        let options = GeneratorOptions {
            settings_path: PathBuf::from("/srv/annil/settings.toml"),
        };
        let report = Host::new(root.path(), &options, false).apply(None).unwrap();

        assert_eq!(report.settings, FileChange::Removed);
        assert!(!root.path().join("etc/annil-server/config.toml").exists());
    }

    #[test]
    fn test_moved_settings_path_drops_old_file() {
        let root = tempfile::tempdir().unwrap();
        staging(root.path()).converge(&config(3000)).unwrap();

        let options = GeneratorOptions {
            settings_path: PathBuf::from("/srv/annil/settings.toml"),
        };
        let report = Host::new(root.path(), &options, false)
            .converge(&config(3000))
            .unwrap();

        assert_eq!(report.settings, FileChange::Created);
        assert_eq!(report.unit, FileChange::Updated);
        assert!(root.path().join("srv/annil/settings.toml").exists());
        assert!(!root.path().join("etc/annil-server/config.toml").exists());
    }

    #[test]
    fn test_converge_rejects_invalid_config_before_writing() {
        let root = tempfile::tempdir().unwrap();
        let config = Configuration {
            package: None,
            ..config(3000)
        };

        let err = staging(root.path()).converge(&config).unwrap_err();
        assert!(matches!(
            err,
            InstallerError::Generate(GenerateError::Config(ConfigError::MissingRequiredField { .. }))
        ));
        assert!(!root.path().join("etc").exists());
    }

    #[test]
    fn test_failed_enable_is_finished_by_next_apply() {
        let root = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        fake_systemctl(tools.path());
        fs::write(tools.path().join("fail-enable"), "").unwrap();

        let host = Host::new(root.path(), &GeneratorOptions::default(), true)
            .with_tool_path(tools.path());
        let artifacts = artifacts_in_group(&own_group().name);

        let err = host.apply(Some(&artifacts)).unwrap_err();
        assert!(err.to_string().contains("Failed to enable unit"));

        // Files already match; only systemd is behind.
        let report = host.apply(Some(&artifacts)).unwrap();
        assert_eq!(report.settings, FileChange::Unchanged);
        assert_eq!(report.unit, FileChange::Unchanged);
        assert!(report.enabled);
        assert!(report.restarted);
        assert!(tools.path().join("enabled").exists());
        assert!(tools.path().join("active").exists());

        let before = calls(tools.path()).len();
        let report = host.apply(Some(&artifacts)).unwrap();
        assert!(!report.changed());
        let after = calls(tools.path());
        assert!(
            after[before..]
                .iter()
                .all(|call| call.starts_with("is-") || call.starts_with("show"))
        );
    }

    #[test]
    fn test_stopped_service_is_restarted() {
        let root = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        fake_systemctl(tools.path());

        let host = Host::new(root.path(), &GeneratorOptions::default(), true)
            .with_tool_path(tools.path());
        let artifacts = artifacts_in_group(&own_group().name);
        host.apply(Some(&artifacts)).unwrap();

        fs::remove_file(tools.path().join("active")).unwrap();
        let report = host.apply(Some(&artifacts)).unwrap();
        assert!(!report.enabled);
        assert!(report.restarted);
    }

    #[test]
    fn test_group_change_regroups_unchanged_settings() {
        let Some((first, second)) = two_groups() else {
            return;
        };
        let root = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        fake_systemctl(tools.path());
        let host = Host::new(root.path(), &GeneratorOptions::default(), true)
            .with_tool_path(tools.path());
        let settings = root.path().join("etc/annil-server/config.toml");

        host.apply(Some(&artifacts_in_group(&first.name))).unwrap();
        assert_eq!(fs::metadata(&settings).unwrap().gid(), first.gid.as_raw());

        let report = host.apply(Some(&artifacts_in_group(&second.name))).unwrap();
        assert_eq!(report.settings, FileChange::Unchanged);
        assert!(report.settings_regrouped);
        assert!(report.restarted);
        assert_eq!(fs::metadata(&settings).unwrap().gid(), second.gid.as_raw());

        let report = host.apply(Some(&artifacts_in_group(&second.name))).unwrap();
        assert!(!report.settings_regrouped);
        assert!(!report.changed());
    }
}
