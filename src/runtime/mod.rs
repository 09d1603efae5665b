pub mod cli;

use std::io::Write;

use serde::Deserialize;
use thiserror::Error;

/// Subset of `<runtime> image inspect` output that stow cares about.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImageDetails {
    #[serde(rename = "Id", default)]
    pub id: String,

    /// Uncompressed image size in bytes, as reported by the runtime.
    #[serde(rename = "Size", default)]
    pub size: u64,

    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The image is not in local storage. Recoverable by pulling.
    #[error("image {0} not found locally")]
    ImageNotFound(String),

    #[error("failed to run `{cmd}`")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{cmd} {action}` failed for {reference}: {stderr}")]
    Failed {
        cmd: String,
        action: &'static str,
        reference: String,
        stderr: String,
    },

    #[error("I/O error while streaming {reference}")]
    Stream {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode inspect output for {reference}")]
    Decode {
        reference: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Operations stow needs from a local container runtime.
pub trait ContainerRuntime {
    /// Look up a local image by reference. Absence is
    /// [`RuntimeError::ImageNotFound`].
    fn inspect(&self, reference: &str) -> Result<ImageDetails, RuntimeError>;

    /// Pull the reference from its registry into local storage.
    fn pull(&self, reference: &str) -> Result<(), RuntimeError>;

    /// Stream the image as a tar archive (repo tags included) into `sink`.
    /// Returns the number of bytes written.
    fn save(&self, reference: &str, sink: &mut dyn Write) -> Result<u64, RuntimeError>;
}
