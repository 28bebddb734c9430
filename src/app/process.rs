use std::process::{Child, Command as ProcessCommand};

use anyhow::{Context, Result, anyhow};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(unix)]
struct ScopedSigaction {
    signum: libc::c_int,
    old_action: libc::sigaction,
}

#[cfg(unix)]
impl ScopedSigaction {
    fn ignore(signum: libc::c_int) -> Result<Self> {
        unsafe {
            let mut new_action: libc::sigaction = std::mem::zeroed();
            new_action.sa_sigaction = libc::SIG_IGN;
            libc::sigemptyset(&mut new_action.sa_mask);
            new_action.sa_flags = 0;

            let mut old_action: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &new_action, &mut old_action) != 0 {
                return Err(anyhow!("failed to update signal action for {signum}"));
            }

            Ok(Self { signum, old_action })
        }
    }
}

#[cfg(unix)]
impl Drop for ScopedSigaction {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::sigaction(self.signum, &self.old_action, std::ptr::null_mut());
        }
    }
}

/// Runs `f` with Ctrl-C ignored by this process. The player child still
/// receives it and exits, which ends the session through the normal path
/// so the last resume point gets written.
#[cfg(unix)]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let _sigint_guard = ScopedSigaction::ignore(libc::SIGINT)?;
    f()
}

#[cfg(not(unix))]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    f()
}

/// Spawns `cmd` with default handlers for the signals this process may be
/// ignoring, since ignored dispositions survive `exec`.
#[cfg(unix)]
pub(crate) fn spawn_with_default_signals(mut cmd: ProcessCommand, label: &str) -> Result<Child> {
    unsafe {
        cmd.pre_exec(|| {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            libc::signal(libc::SIGQUIT, libc::SIG_DFL);
            Ok(())
        });
    }
    cmd.spawn().with_context(|| format!("failed to spawn {label}"))
}

#[cfg(not(unix))]
pub(crate) fn spawn_with_default_signals(mut cmd: ProcessCommand, label: &str) -> Result<Child> {
    cmd.spawn().with_context(|| format!("failed to spawn {label}"))
}
