//! Installs a containerd shim on a host and registers it as a CRI runtime.
//!
//! The install runs in three steps:
//!
//! 1. the shim binary is atomically published into the host directory ([`install`](mod@install)),
//! 2. the containerd configuration gets the runtime registered under
//!    `plugins."io.containerd.grpc.v1.cri".containerd.runtimes` ([`config`]) and is
//!    atomically published in turn,
//! 3. containerd is restarted through the service manager ([`reload`]).
//!
//! [`installer::install`](fn@installer::install) runs the whole sequence.

pub mod config;
pub mod error;
pub mod install;
pub mod installer;
pub mod reload;
pub mod sys;

pub use error::{Error, InstallError, Result, Stage};
pub use installer::{InstallOptions, Installed, install};
