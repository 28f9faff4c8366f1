//! Process-group helpers for analysis subprocesses.
//!
//! Each analysis tool runs as the leader of its own process group so a
//! timeout or cancellation can take down the tool together with anything it
//! forked.

use std::process::{Child, Command};

/// Make the spawned child the leader of a fresh process group.
pub fn isolate_process_group(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = command;
    }
}

/// SIGKILL the child's whole process group. Falls back to killing just the
/// child when the group is gone or cannot be signalled.
pub fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(child.id()) else {
            let _ = child.kill();
            return;
        };
        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => {
                tracing::warn!(pid = raw, %errno, "killpg failed, killing leader only");
                let _ = child.kill();
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
}

/// Kill the group and reap the leader so no zombie is left behind.
pub fn terminate_and_reap(child: &mut Child) {
    kill_process_group(child);
    if let Err(error) = child.wait() {
        tracing::warn!(pid = child.id(), %error, "failed to reap analysis process");
    }
}

/// Whether signal 0 can still be delivered to group `pgid`.
///
/// Unreaped zombies count as alive here.
#[cfg(unix)]
pub fn process_group_alive(pgid: u32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    i32::try_from(pgid).is_ok_and(|raw| killpg(Pid::from_raw(raw), None).is_ok())
}
