use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use containerd_runtime_installer::reload::{Completion, UnitManager};
use containerd_runtime_installer::{InstallOptions, Result};
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Answers restarts with a fixed status, or holds them forever when there is none.
#[derive(Default)]
pub struct FakeUnitManager {
    status: Option<&'static str>,
    pending: Mutex<Vec<oneshot::Sender<String>>>,
    restarted: Mutex<Vec<String>>,
}

impl FakeUnitManager {
    pub fn answering(status: &'static str) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn restarted(&self) -> Vec<String> {
        self.restarted.lock().unwrap().clone()
    }
}

impl UnitManager for FakeUnitManager {
    async fn restart_unit(&self, unit: &str) -> Result<Completion> {
        self.restarted.lock().unwrap().push(unit.to_string());
        let (tx, rx) = oneshot::channel();
        match self.status {
            Some(status) => {
                let _ = tx.send(status.to_string());
            }
            None => self.pending.lock().unwrap().push(tx),
        }
        Ok(rx)
    }
}

/// A scratch host with a shim binary and a containerd config.
pub struct Host {
    _dir: TempDir,
    pub binary: PathBuf,
    pub host_dir: PathBuf,
    pub cri_config: PathBuf,
}

impl Host {
    pub fn new(shim: &str, config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        let binary = src.join(shim);
        fs::write(&binary, format!("#!/bin/sh\necho {shim}\n")).unwrap();

        let etc = dir.path().join("etc/containerd");
        fs::create_dir_all(&etc).unwrap();
        let cri_config = etc.join("config.toml");
        fs::write(&cri_config, config).unwrap();

        let host_dir = dir.path().join("usr/local/bin");
        Self {
            _dir: dir,
            binary,
            host_dir,
            cri_config,
        }
    }

    pub fn options(&self, name: &str) -> InstallOptions {
        InstallOptions::new(&self.binary, name)
            .host_dir(&self.host_dir)
            .cri_config(&self.cri_config)
    }

    pub fn config(&self) -> String {
        fs::read_to_string(&self.cri_config).unwrap()
    }

    pub fn installed(&self, file_name: &str) -> PathBuf {
        self.host_dir.join(file_name)
    }

    pub fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
