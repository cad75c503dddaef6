//! Atomic publication of files.
//!
//! The payload is written to a temporary file next to the destination,
//! flushed to disk, and then renamed over the destination. Readers of the
//! destination see either the previous content or the complete new one.
//!
//! The temporary file is owned by a [`NamedTempFile`], so any failure before
//! the rename removes it. On success the rename hands the file over to the
//! destination path and nothing is left to clean up.

use std::fs::{File, Permissions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

const DEFAULT_PREFIX: &str = ".tmp-";

/// Where the published content comes from.
pub enum Source<'a> {
    /// Copy the content of an existing file.
    File(&'a Path),
    Bytes(&'a [u8]),
    Reader(&'a mut dyn Read),
}

/// Permissions applied to the staged file before it is published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileMode {
    /// `rwxr-xr-x`
    Executable,
    /// Keep the permissions of the file being replaced. A new file keeps the
    /// private default of the temporary file.
    #[default]
    PreserveDestination,
}

/// Options for a single atomic publish.
#[derive(Debug, Clone, Default)]
pub struct Publish {
    staging_dir: Option<PathBuf>,
    prefix: Option<String>,
    mode: FileMode,
}

impl Publish {
    pub fn new(mode: FileMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Stage in `dir` instead of the destination's parent directory.
    ///
    /// `dir` must live on the same filesystem as the destination, otherwise
    /// the final rename fails with `EXDEV`.
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// File name prefix of the staged file.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn run(&self, source: Source<'_>, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        let stage_err = |source| Error::StageWrite {
            path: destination.to_path_buf(),
            source,
        };

        // The source is opened before anything is staged, so a missing
        // source leaves no trace in the staging directory.
        let mut file;
        let mut bytes;
        let reader: &mut dyn Read = match source {
            Source::File(path) => {
                file = open_source(path)?;
                &mut file
            }
            Source::Bytes(b) => {
                bytes = b;
                &mut bytes
            }
            Source::Reader(r) => r,
        };

        let dir = match &self.staging_dir {
            Some(dir) => dir.as_path(),
            None => parent_dir(destination),
        };
        let mut staged = tempfile::Builder::new()
            .prefix(self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX))
            .tempfile_in(dir)
            .map_err(stage_err)?;
        log::debug!(
            "staging {} at {}",
            destination.display(),
            staged.path().display()
        );

        io::copy(reader, staged.as_file_mut()).map_err(stage_err)?;
        staged.as_file().sync_all().map_err(stage_err)?;
        if let Some(permissions) = self.permissions(destination) {
            staged
                .as_file()
                .set_permissions(permissions)
                .map_err(stage_err)?;
        }

        persist(staged, destination)
    }

    fn permissions(&self, destination: &Path) -> Option<Permissions> {
        match self.mode {
            FileMode::Executable => executable(),
            FileMode::PreserveDestination => destination.metadata().ok().map(|m| m.permissions()),
        }
    }
}

/// Atomically replaces `destination` with the content of `source`, staging
/// next to the destination.
pub fn publish(source: Source<'_>, destination: impl AsRef<Path>, mode: FileMode) -> Result<()> {
    Publish::new(mode).run(source, destination)
}

fn persist(staged: NamedTempFile, destination: &Path) -> Result<()> {
    // on error the PersistError still owns the temp file and removes it on drop
    staged
        .persist(destination)
        .map_err(|err| Error::Publish {
            path: destination.to_path_buf(),
            source: err.error,
        })?;
    log::debug!("published {}", destination.display());
    Ok(())
}

fn open_source(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| Error::NotFound {
        path: path.to_path_buf(),
        source,
    })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn executable() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn executable() -> Option<Permissions> {
    None
}
