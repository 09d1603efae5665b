use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;

use crate::progress::Spinner;
use crate::runtime::{ContainerRuntime, RuntimeError};

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot create a temporary archive in {}", dir.display())]
    Create {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot move archive into place at {}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Archive name for a reference: text before the first `:`, slashes turned
/// into dashes. The tag is dropped, and so is anything after a registry port
/// (`host:5000/app` becomes `host.tar.gz`).
pub fn archive_file_name(reference: &str) -> String {
    let repository = reference
        .split_once(':')
        .map_or(reference, |(repository, _)| repository);
    format!("{}{ARCHIVE_SUFFIX}", repository.replace('/', "-"))
}

/// One reference and the archive it is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArchive {
    pub reference: String,
    pub file_name: String,
}

/// Pair each unique reference with its archive name, in set order.
pub fn plan(images: &BTreeSet<String>) -> Vec<PlannedArchive> {
    images
        .iter()
        .map(|reference| PlannedArchive {
            reference: reference.clone(),
            file_name: archive_file_name(reference),
        })
        .collect()
}

/// Archive names shared by more than one reference. The reference planned
/// last overwrites the others.
pub fn collisions(plan: &[PlannedArchive]) -> BTreeMap<&str, Vec<&str>> {
    let mut by_name: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for p in plan {
        by_name
            .entry(p.file_name.as_str())
            .or_default()
            .push(p.reference.as_str());
    }
    by_name.retain(|_, refs| refs.len() > 1);
    by_name
}

/// Result of one successful save.
#[derive(Debug, Clone)]
pub struct SavedArchive {
    pub path: PathBuf,
    /// Bytes of tar stream received from the runtime.
    pub raw_bytes: u64,
    /// Size of the gzip file on disk.
    pub compressed_bytes: u64,
}

/// Counts bytes into the spinner as they pass through.
struct Tracked<'a, W: Write> {
    inner: W,
    spinner: Option<&'a Spinner>,
}

impl<W: Write> Write for Tracked<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(spinner) = self.spinner {
            spinner.inc(n as u64);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Save `reference` through the runtime into `<dir>/<archive name>`, gzip
/// compressed.
///
/// The stream goes to a temporary file in `dir` that is renamed over the
/// final path only after the gzip trailer is flushed. On any error the
/// temporary file is closed and removed, and an existing archive under the
/// final name is left untouched.
pub fn write_archive(
    runtime: &dyn ContainerRuntime,
    reference: &str,
    dir: &Path,
    spinner: Option<&Spinner>,
) -> Result<SavedArchive, ArchiveError> {
    let path = dir.join(archive_file_name(reference));

    let mut tmp = tempfile::Builder::new()
        .prefix(".stow-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|source| ArchiveError::Create {
            dir: dir.to_path_buf(),
            source,
        })?;

    let write_err = |source: io::Error| ArchiveError::Write {
        path: path.clone(),
        source,
    };

    let raw_bytes = {
        let mut encoder = GzEncoder::new(BufWriter::new(tmp.as_file_mut()), Compression::default());
        let mut sink = Tracked {
            inner: &mut encoder,
            spinner,
        };
        let raw_bytes = runtime.save(reference, &mut sink)?;
        encoder
            .finish()
            .map_err(write_err)?
            .into_inner()
            .map_err(|e| write_err(e.into_error()))?;
        raw_bytes
    };

    let file = tmp.as_file();
    file.sync_all().map_err(write_err)?;
    let compressed_bytes = file.metadata().map_err(write_err)?.len();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(write_err)?;
    }

    tmp.persist(&path).map_err(|e| ArchiveError::Persist {
        path: path.clone(),
        source: e.error,
    })?;

    log::debug!(
        "wrote {} ({raw_bytes} bytes raw, {compressed_bytes} compressed)",
        path.display()
    );

    Ok(SavedArchive {
        path,
        raw_bytes,
        compressed_bytes,
    })
}
