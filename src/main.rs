mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use annil_module::{Configuration, GeneratorOptions, Host, PackageRef, generate};

fn main() {
    // Initialize logger with the same format the daemon tooling uses
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(e) = real_main() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let args = cli::Args::parse();

    match args.sub {
        cli::Cmd::Check { source } => handle_check(&source),
        cli::Cmd::Render { source, out } => handle_render(&source, &out),
        cli::Cmd::Apply {
            source,
            root,
            no_commands,
        } => handle_apply(&source, root, !no_commands),
    }
}

fn load(source: &cli::Source) -> Result<(Configuration, GeneratorOptions)> {
    let mut config = Configuration::from_path(&source.config)?;
    if let Some(prefix) = &source.package {
        config.package = Some(PackageRef::new(prefix));
    }

    let options = GeneratorOptions {
        settings_path: source.settings_path.clone(),
    };
    Ok((config, options))
}

/// Handle check command - validate and report without writing anything
fn handle_check(source: &cli::Source) -> Result<()> {
    let (config, options) = load(source)?;
    match generate(&config, &options).context("Configuration rejected")? {
        Some(artifacts) => info!(
            "Configuration valid: {} runs as {}:{}",
            artifacts.unit.program(),
            artifacts.unit.user,
            artifacts.unit.group
        ),
        None => info!("Configuration valid: module disabled"),
    }
    Ok(())
}

/// Handle render command - write artifacts for inspection
fn handle_render(source: &cli::Source, out: &Path) -> Result<()> {
    let (config, options) = load(source)?;
    let Some(artifacts) = generate(&config, &options).context("Configuration rejected")? else {
        info!("Module disabled, nothing to render");
        return Ok(());
    };

    artifacts
        .write_to(out)
        .with_context(|| format!("Failed to write artifacts to {}", out.display()))?;
    Ok(())
}

/// Handle apply command - converge the host
fn handle_apply(source: &cli::Source, root: PathBuf, run_commands: bool) -> Result<()> {
    let (config, options) = load(source)?;

    let host = Host::new(root, &options, run_commands);
    let report = host
        .converge(&config)
        .context("Failed to apply annil-server module")?;

    if report.changed() {
        info!("Host updated: {:?}", report);
    } else {
        info!("Host already up to date");
    }
    Ok(())
}
