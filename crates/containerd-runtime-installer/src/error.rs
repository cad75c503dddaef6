//! Error types used by the installer.
//!
//! [`Error`] covers the failures of the individual components, while
//! [`InstallError`] attaches the pipeline [`Stage`] that produced it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A source binary or configuration file does not exist or cannot be opened
    #[error("not found: {}", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Supplied arguments are invalid
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The configuration text is not well-formed TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration file is not valid UTF-8, so it cannot be TOML
    #[error("failed to parse config: {0}")]
    ParseUtf8(#[from] std::str::Utf8Error),
    /// The patched document could not be rendered back to TOML
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// A key on the runtimes path holds something other than a table
    #[error("type mismatch at {path}: expected a table, found {found}")]
    TypeMismatch { path: String, found: &'static str },
    /// Writing or flushing a staged file failed
    #[error("failed to stage {}", .path.display())]
    StageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Renaming a staged file onto its destination failed
    #[error("failed to publish {}", .path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The service manager could not be reached or rejected the request
    #[error("service manager: {0}")]
    ServiceManager(String),
    /// The restart job finished with a status other than `done`
    #[error("unexpected status: {status}")]
    ReloadFailed { status: String },
    /// No job status arrived before the reload timeout expired
    #[error("no status received within {0:?}")]
    TimedOut(Duration),
    /// The cancellation signal fired before the operation completed
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// The step of the install pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BinaryInstall,
    ConfigPatch,
    ConfigPublish,
    ServiceReload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::BinaryInstall => "binary install",
            Stage::ConfigPatch => "config patch",
            Stage::ConfigPublish => "config publish",
            Stage::ServiceReload => "service reload",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed")]
pub struct InstallError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl InstallError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}

/// Attaches a [`Stage`] to the error of a component result.
pub(crate) trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T, InstallError>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T, InstallError> {
        self.map_err(|err| InstallError::new(stage, err))
    }
}
