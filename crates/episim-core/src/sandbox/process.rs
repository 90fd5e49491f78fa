//! Child-process plumbing: process-group cleanup and bounded pipe capture.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Kills the child's whole process group when dropped.
///
/// The child is spawned as the leader of a new group, so this also reaches
/// anything it forked. Runs on every exit path, including when the owning
/// future is cancelled.
pub struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    pub fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_process_group(pid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        tracing::warn!(pid = pid, "pid out of range; process group not signalled");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // The group is usually already gone after a clean exit.
        Ok(()) | Err(Errno::ESRCH) => debug!(pgid = raw, "process group reaped"),
        Err(e) => tracing::warn!(pgid = raw, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) {
    debug!(pid = pid, "process groups unsupported; relying on kill_on_drop");
}

/// Captured pipe contents.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// More than the cap was written; the excess was drained and dropped.
    pub truncated: bool,
}

impl Captured {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Read `reader` to EOF, keeping at most `limit` bytes.
///
/// Keeps draining past the cap so a chatty child never blocks on a full pipe.
pub async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.bytes.len());
        if n > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok(captured)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_capped_within_limit() {
        let data: &[u8] = b"hello";
        let captured = read_capped(Some(data), 16).await.expect("read");
        assert_eq!(captured.bytes, b"hello");
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn test_read_capped_truncates_and_drains() {
        let data = vec![b'x'; 20_000];
        let captured = read_capped(Some(data.as_slice()), 10).await.expect("read");
        assert_eq!(captured.bytes.len(), 10);
        assert!(captured.truncated);
    }

    #[tokio::test]
    async fn test_read_capped_none() {
        let captured = read_capped::<&[u8]>(None, 10).await.expect("read");
        assert!(captured.bytes.is_empty());
    }

    #[test]
    fn test_guard_without_pid_is_noop() {
        drop(ProcessGroupGuard::new(None));
    }

    /// True once `pid` no longer exists or is a zombie awaiting its reaper.
    #[cfg(unix)]
    fn wait_until_gone(pid: i32) -> bool {
        (0..100).any(|_| {
            let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
            let zombie = std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .map(|stat| {
                    let state = stat.rsplit(')').next().unwrap_or("");
                    state.trim_start().starts_with('Z')
                })
                .unwrap_or(false);
            if !alive || zombie {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            false
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_guard_kills_leader_and_forked_child() {
        use std::os::unix::process::{CommandExt, ExitStatusExt};
        use std::process::{Command, Stdio};

        let mut leader = Command::new("sh")
            .args(["-c", "sleep 30 & echo $!; wait"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .expect("spawn");
        let mut line = String::new();
        {
            use std::io::BufRead;
            let stdout = leader.stdout.take().expect("stdout");
            std::io::BufReader::new(stdout)
                .read_line(&mut line)
                .expect("read forked pid");
        }
        let forked: i32 = line.trim().parse().expect("pid");

        drop(ProcessGroupGuard::new(Some(leader.id())));

        let status = leader.wait().expect("wait");
        assert_eq!(status.signal(), Some(9));
        assert!(wait_until_gone(forked));
    }

    #[cfg(unix)]
    #[test]
    fn test_guard_on_exited_group_is_quiet() {
        use std::os::unix::process::CommandExt;

        let mut child = std::process::Command::new("true")
            .process_group(0)
            .spawn()
            .expect("spawn");
        let pid = child.id();
        child.wait().expect("wait");
        drop(ProcessGroupGuard::new(Some(pid)));
    }
}
