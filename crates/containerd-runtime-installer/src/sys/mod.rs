#[cfg(unix)]
mod unix;

pub mod systemd {
    #[cfg(unix)]
    pub use crate::sys::unix::systemd::Systemd;
}
