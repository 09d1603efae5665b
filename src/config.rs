use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;

/// Container runtime CLI that stow drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    /// Binary name looked up on `PATH` when no explicit path is given.
    pub fn default_binary(self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_binary())
    }
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub manifest: PathBuf,
    pub output_dir: PathBuf,
    pub runtime: RuntimeKind,
    pub runtime_path: String,
    pub dry_run: bool,
}

impl AppConfig {
    pub fn from_cli(
        manifest: PathBuf,
        output_dir: PathBuf,
        runtime: RuntimeKind,
        runtime_path: Option<String>,
        dry_run: bool,
    ) -> Self {
        let runtime_path = runtime_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| runtime.default_binary().to_string());

        Self {
            manifest,
            output_dir,
            runtime,
            runtime_path,
            dry_run,
        }
    }
}
