//! Process-group supervision.
//!
//! Collectors fork their own helpers (headless browsers, converters), so
//! killing just the direct child leaves the real work running. The child is
//! therefore placed in a fresh process group at spawn, and termination is
//! always group-wide: SIGTERM, a grace period, then SIGKILL for survivors.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

/// A child process owning a dedicated process group.
pub struct GroupChild {
    child: Child,
    pgid: i32,
    reaped: bool,
}

/// Spawn `cmd` as the leader of a new process group.
pub fn spawn_group(cmd: &mut Command) -> std::io::Result<GroupChild> {
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn()?;
    let pgid = child.id().map(|id| id as i32).unwrap_or(0);
    Ok(GroupChild {
        child,
        pgid,
        reaped: false,
    })
}

impl GroupChild {
    /// Take the piped stdout handle, if any.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the piped stderr handle, if any.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the group leader to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await;
        if status.is_ok() {
            self.reaped = true;
        }
        status
    }

    /// Group id this child leads (0 when the pid was unavailable).
    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    /// Send a signal to the whole group.
    #[cfg(unix)]
    fn signal_group(&self, signal: i32) {
        if self.pgid > 0 {
            // Negative pid addresses the process group.
            unsafe {
                libc::kill(-self.pgid, signal);
            }
        }
    }

    /// Terminate the whole group: SIGTERM, wait up to `grace`, then
    /// SIGKILL any survivor and reap the leader.
    pub async fn terminate_group(&mut self, grace: Duration) {
        #[cfg(unix)]
        {
            self.signal_group(libc::SIGTERM);
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(_) => {
                    debug!(pgid = self.pgid, "group exited within grace period");
                }
                Err(_) => {
                    warn!(pgid = self.pgid, "group survived SIGTERM, sending SIGKILL");
                    self.signal_group(libc::SIGKILL);
                    let _ = self.child.wait().await;
                }
            }
            self.reaped = true;
        }
        #[cfg(not(unix))]
        {
            let _ = grace;
            let _ = self.child.kill().await;
            self.reaped = true;
        }
    }
}

impl Drop for GroupChild {
    /// A dropped, unreaped child takes its whole group down with it, so an
    /// aborted run does not leave orphaned collector trees behind.
    fn drop(&mut self) {
        if !self.reaped {
            #[cfg(unix)]
            {
                self.signal_group(libc::SIGTERM);
                self.signal_group(libc::SIGKILL);
            }
            #[cfg(not(unix))]
            {
                let _ = self.child.start_kill();
            }
        }
    }
}
