mod archive;
mod cmd;
mod config;
mod fetch;
mod manifest;
mod progress;
mod runtime;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use config::{AppConfig, RuntimeKind};

#[derive(Parser)]
#[command(name = "stow")]
#[command(about = "Save every container image referenced by a manifest as a .tar.gz archive")]
#[command(version)]
struct Cli {
    /// Path to the manifest YAML (documents separated by `---`)
    #[arg(long, value_name = "PATH")]
    manifest: PathBuf,

    /// Directory the archives are written to
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Container runtime to drive
    #[arg(long, value_enum, env = "STOW_RUNTIME", default_value_t = RuntimeKind::Docker)]
    runtime: RuntimeKind,

    /// Path to the runtime binary (defaults to the runtime name on PATH)
    #[arg(long, env = "STOW_RUNTIME_PATH", value_name = "PATH")]
    runtime_path: Option<String>,

    /// Print the images and archive names without pulling or saving anything
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_cli(
        cli.manifest,
        cli.output_dir,
        cli.runtime,
        cli.runtime_path,
        cli.dry_run,
    );
    log::debug!("{cfg:?}");

    cmd::bundle::run(&cfg)
}
