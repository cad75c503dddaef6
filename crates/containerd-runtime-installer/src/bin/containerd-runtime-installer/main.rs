#[cfg(not(unix))]
compile_error!("containerd-runtime-installer requires a unix host running systemd");

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use containerd_runtime_installer::installer::{DEFAULT_CRI_CONFIG, DEFAULT_HOST_DIR};
use containerd_runtime_installer::reload::{DEFAULT_UNIT, ReloadCoordinator};
use containerd_runtime_installer::sys::systemd::Systemd;
use containerd_runtime_installer::{InstallError, InstallOptions, install};
use humantime::parse_duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Install a containerd shim and register it as a CRI runtime
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Shim binary to install
    #[arg(long, env = "RUNTIME_BINARY")]
    binary: PathBuf,

    /// Name of the runtime
    #[arg(long, env = "RUNTIME_NAME")]
    name: String,

    /// Host directory to install the runtime into
    #[arg(long, env = "HOST_DIR", default_value = DEFAULT_HOST_DIR)]
    host_dir: PathBuf,

    /// Path to the containerd CRI config file
    #[arg(long, env = "CRI_CONFIG", default_value = DEFAULT_CRI_CONFIG)]
    cri_config: PathBuf,

    /// Service unit to restart once the runtime is registered
    #[arg(long, env = "CONTAINERD_UNIT", default_value = DEFAULT_UNIT)]
    unit: String,

    /// How long to wait for the restart to finish [0 = no timeout]
    #[arg(long, value_parser = parse_duration, default_value = "0s")]
    reload_timeout: Duration,

    /// Timeout of each D-Bus call to systemd
    #[arg(long, value_parser = parse_duration, default_value = "25s")]
    dbus_timeout: Duration,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    if let Err(err) = cancel_on_signal(cancel.clone()) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    let options = InstallOptions::new(cli.binary, cli.name)
        .host_dir(cli.host_dir)
        .cri_config(cli.cri_config);
    let systemd = Systemd::new().with_call_timeout(cli.dbus_timeout);
    let mut coordinator =
        ReloadCoordinator::new(systemd, cli.unit).with_timeout(cli.reload_timeout);

    match install(&options, &mut coordinator, &cancel).await {
        Ok(installed) => {
            log::info!(
                "runtime {} installed at {}",
                installed.runtime.name,
                installed.binary.display()
            );
        }
        Err(err) if err.is_cancelled() => {
            eprintln!("installation cancelled while waiting for {}", coordinator.unit());
            return ExitCode::FAILURE;
        }
        Err(err) => {
            report(err);
            return ExitCode::FAILURE;
        }
    }

    // block until SIGINT or SIGTERM
    cancel.cancelled().await;
    ExitCode::SUCCESS
}

fn report(err: InstallError) {
    eprintln!("{:#}", anyhow::Error::new(err));
}

fn cancel_on_signal(cancel: CancellationToken) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => log::info!("received SIGINT"),
            _ = terminate.recv() => log::info!("received SIGTERM"),
        }
        cancel.cancel();
    });
    Ok(())
}
