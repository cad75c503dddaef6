//! The install pipeline.
//!
//! The shim binary is published first, then the CRI configuration is
//! rewritten to reference it, and finally the consuming service is
//! restarted. The two files are separate resources: once the binary is
//! published, a later failure leaves it installed while the service keeps
//! running with its previous configuration. Nothing is rolled back.

use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::config::{ConfigDocument, RuntimeEntry};
use crate::error::{Error, InstallError, Result, Stage, StageExt as _};
use crate::install::{FileMode, Publish, Source};
use crate::reload::{ReloadCoordinator, UnitManager};

pub const DEFAULT_HOST_DIR: &str = "/bin";
pub const DEFAULT_CRI_CONFIG: &str = "/etc/containerd/config.toml";

const STAGING_PREFIX: &str = ".c8d-runtime-install-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Shim binary to install.
    pub binary: PathBuf,
    /// Name the runtime is registered under.
    pub name: String,
    /// Directory the binary is installed into.
    pub host_dir: PathBuf,
    /// containerd configuration file to patch.
    pub cri_config: PathBuf,
}

impl InstallOptions {
    pub fn new(binary: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            name: name.into(),
            host_dir: PathBuf::from(DEFAULT_HOST_DIR),
            cri_config: PathBuf::from(DEFAULT_CRI_CONFIG),
        }
    }

    pub fn host_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.host_dir = dir.into();
        self
    }

    pub fn cri_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.cri_config = path.into();
        self
    }
}

/// What a successful install put in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub binary: PathBuf,
    pub runtime: RuntimeEntry,
}

/// Installs the binary, registers it and restarts the service.
///
/// Cancellation is only observed while waiting for the service restart;
/// file operations always run to completion.
pub async fn install<M: UnitManager>(
    options: &InstallOptions,
    coordinator: &mut ReloadCoordinator<M>,
    cancel: &CancellationToken,
) -> Result<Installed, InstallError> {
    let runtime =
        RuntimeEntry::for_binary(&options.name, &options.binary).stage(Stage::BinaryInstall)?;

    let binary = install_binary(&options.binary, &options.host_dir).stage(Stage::BinaryInstall)?;
    log::info!("installed {}", binary.display());

    let config = patch_config(&options.cri_config, &runtime).stage(Stage::ConfigPatch)?;

    Publish::new(FileMode::PreserveDestination)
        .prefix(format!(".{}-config-", runtime.name))
        .run(Source::Bytes(config.as_bytes()), &options.cri_config)
        .stage(Stage::ConfigPublish)?;
    log::info!(
        "registered runtime {} ({}) in {}",
        runtime.name,
        runtime.runtime_type,
        options.cri_config.display()
    );

    coordinator.reload(cancel).await.stage(Stage::ServiceReload)?;

    Ok(Installed { binary, runtime })
}

/// Publishes `binary` as an executable in `host_dir`, returning the installed path.
pub fn install_binary(binary: &Path, host_dir: &Path) -> Result<PathBuf> {
    fs::metadata(binary).map_err(|source| Error::NotFound {
        path: binary.to_path_buf(),
        source,
    })?;
    let Some(file_name) = binary.file_name() else {
        return Err(Error::InvalidArgument(format!(
            "binary path has no file name: {binary:?}"
        )));
    };

    create_host_dir(host_dir)?;

    // staging happens in a private directory inside host_dir, removed on drop
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(host_dir)
        .map_err(|source| Error::StageWrite {
            path: host_dir.to_path_buf(),
            source,
        })?;

    let destination = host_dir.join(file_name);
    Publish::new(FileMode::Executable)
        .staging_dir(staging.path())
        .prefix(format!(".{}-", file_name.to_string_lossy()))
        .run(Source::File(binary), &destination)?;

    Ok(destination)
}

/// Reads the configuration at `path` and returns it with `runtime` registered.
pub fn patch_config(path: &Path, runtime: &RuntimeEntry) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| Error::NotFound {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigDocument::parse(std::str::from_utf8(&bytes)?)?
        .patch(runtime)?
        .to_toml_string()
}

fn create_host_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir).map_err(|source| Error::StageWrite {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_install_binary_creates_host_dir() -> Result<()> {
        let dir = tempdir().unwrap();
        let binary = dir.path().join("containerd-shim-wasmtime-v1");
        fs::write(&binary, "shim").unwrap();
        let host_dir = dir.path().join("host/bin");

        let installed = install_binary(&binary, &host_dir)?;

        assert_eq!(installed, host_dir.join("containerd-shim-wasmtime-v1"));
        assert_eq!(fs::read_to_string(&installed).unwrap(), "shim");
        // the staging directory is gone
        assert_eq!(fs::read_dir(&host_dir).unwrap().count(), 1);
        Ok(())
    }

    #[test]
    fn test_install_binary_missing() {
        let dir = tempdir().unwrap();
        let host_dir = dir.path().join("bin");

        let err = install_binary(&dir.path().join("containerd-shim-x-v1"), &host_dir).unwrap_err();

        assert!(matches!(err, Error::NotFound { .. }), "{err}");
        assert!(!host_dir.exists());
    }

    #[test]
    fn test_patch_config_missing_file() {
        let dir = tempdir().unwrap();
        let runtime = RuntimeEntry::new("runc", "io.containerd.runc.v2").unwrap();

        let err = patch_config(&dir.path().join("config.toml"), &runtime).unwrap_err();

        assert!(matches!(err, Error::NotFound { .. }), "{err}");
    }

    #[test]
    fn test_patch_config_invalid_utf8() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("config.toml");
        fs::write(&config, b"version = \"\xff\xfe\"\n").unwrap();
        let runtime = RuntimeEntry::new("runc", "io.containerd.runc.v2").unwrap();

        let err = patch_config(&config, &runtime).unwrap_err();

        assert!(matches!(err, Error::ParseUtf8(_)), "{err}");
    }

    #[test]
    fn test_options_defaults() {
        let options = InstallOptions::new("/opt/containerd-shim-spin-v2", "spin");
        assert_eq!(options.host_dir, Path::new("/bin"));
        assert_eq!(options.cri_config, Path::new("/etc/containerd/config.toml"));
    }
}
