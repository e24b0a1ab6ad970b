use std::path::PathBuf;

use annil_module::module::DEFAULT_SETTINGS_PATH;
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "annil-server service module generator")]
pub struct Args {
    #[command(subcommand)]
    pub sub: Cmd,
}

/// Options shared by every sub-command
#[derive(ClapArgs, Debug)]
pub struct Source {
    /// Module configuration (TOML, or JSON with a .json extension)
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Override the package prefix from the configuration
    #[arg(long)]
    pub package: Option<PathBuf>,

    /// Host path of the generated settings file
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings_path: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Validate the configuration (Exit 0 = valid, 1 = invalid)
    Check {
        #[command(flatten)]
        source: Source,
    },
    /// Write the generated artifacts into a directory
    Render {
        #[command(flatten)]
        source: Source,

        /// Output directory
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
    /// Converge the host to the configuration
    Apply {
        #[command(flatten)]
        source: Source,

        /// Filesystem root to write into
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// Only write files; create no accounts and leave systemd alone
        #[arg(long)]
        no_commands: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Cmd {
        Args::try_parse_from(argv).unwrap().sub
    }

    #[test]
    fn test_check_defaults() {
        let Cmd::Check { source } = parse(&["annil-module", "check", "-c", "annil.toml"]) else {
            panic!("expected check");
        };
        assert_eq!(source.config, PathBuf::from("annil.toml"));
        assert_eq!(source.package, None);
        assert_eq!(source.settings_path, PathBuf::from(DEFAULT_SETTINGS_PATH));
    }

    #[test]
    fn test_check_package_override() {
        let Cmd::Check { source } = parse(&[
            "annil-module",
            "check",
            "--config",
            "annil.json",
            "--package",
            "/opt/annil",
            "--settings-path",
            "/run/annil.toml",
        ]) else {
            panic!("expected check");
        };
        assert_eq!(source.config, PathBuf::from("annil.json"));
        assert_eq!(source.package, Some(PathBuf::from("/opt/annil")));
        assert_eq!(source.settings_path, PathBuf::from("/run/annil.toml"));
    }

    #[test]
    fn test_render_requires_out() {
        assert!(Args::try_parse_from(["annil-module", "render", "-c", "annil.toml"]).is_err());

        let Cmd::Render { source, out } = parse(&[
            "annil-module",
            "render",
            "-c",
            "annil.toml",
            "-o",
            "out",
            "--package",
            "/opt/annil",
        ]) else {
            panic!("expected render");
        };
        assert_eq!(out, PathBuf::from("out"));
        assert_eq!(source.package, Some(PathBuf::from("/opt/annil")));
    }

    #[test]
    fn test_apply_defaults_to_live_root() {
        let Cmd::Apply {
            source,
            root,
            no_commands,
        } = parse(&["annil-module", "apply", "-c", "annil.toml"])
        else {
            panic!("expected apply");
        };
        assert_eq!(root, PathBuf::from("/"));
        assert!(!no_commands);
        assert_eq!(source.package, None);
    }

    #[test]
    fn test_apply_staging_flags() {
        let Cmd::Apply {
            source,
            root,
            no_commands,
        } = parse(&[
            "annil-module",
            "apply",
            "-c",
            "annil.toml",
            "--root",
            "/mnt/sysroot",
            "--no-commands",
            "--package",
            "/opt/annil",
        ])
        else {
            panic!("expected apply");
        };
        assert_eq!(root, PathBuf::from("/mnt/sysroot"));
        assert!(no_commands);
        assert_eq!(source.package, Some(PathBuf::from("/opt/annil")));
    }

    #[test]
    fn test_config_is_required() {
        assert!(Args::try_parse_from(["annil-module", "check"]).is_err());
        assert!(Args::try_parse_from(["annil-module", "deploy", "-c", "annil.toml"]).is_err());
    }
}
