//! Small process-related helpers shared across the workspace.
//!
//! Downloader children fan out into their own subprocesses, so they are
//! placed in a dedicated process group at spawn time and stopped by
//! signalling the whole group.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Place the child in its own process group so that signals sent to the
/// group reach every subprocess it spawns.
///
/// On non-Unix targets this is a no-op.
pub trait ProcessGroupExt {
    fn own_process_group(&mut self);
}

impl ProcessGroupExt for std::process::Command {
    fn own_process_group(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            self.process_group(0);
        }
    }
}

/// Create a `std::process::Command` with the platform flags applied.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl ProcessGroupExt for tokio::process::Command {
    fn own_process_group(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            self.as_std_mut().process_group(0);
        }
    }
}

/// Create a `tokio::process::Command` with the platform flags applied.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Error raised when a process group cannot be signalled.
#[derive(Debug)]
pub struct SignalError(pub i32);

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to signal process group (errno {})", self.0)
    }
}

impl std::error::Error for SignalError {}

/// Deliver SIGTERM to the process group of `pid`.
///
/// The group id is resolved from the pid, then the signal is sent to the
/// negated pgid so it reaches the whole group.
#[cfg(unix)]
pub fn terminate_group(pid: u32) -> Result<(), SignalError> {
    fn last_errno() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    // SAFETY: getpgid/kill are plain syscalls over a pid we own.
    unsafe {
        let pgid = libc::getpgid(pid as libc::pid_t);
        if pgid < 0 {
            return Err(SignalError(last_errno()));
        }
        if libc::kill(-pgid, libc::SIGTERM) != 0 {
            return Err(SignalError(last_errno()));
        }
    }
    Ok(())
}

/// Windows has no process groups in the Unix sense; fall back to the pid.
#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) -> Result<(), SignalError> {
    Err(SignalError(0))
}
