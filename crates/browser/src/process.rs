//! OS process inspection and signalling for browser processes that outlive
//! their handles.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use wabridge_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Polite request (SIGTERM / taskkill).
    Terminate,
    /// Forced (SIGKILL / taskkill /F).
    Kill,
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;

    /// Direct children of `pid`. Empty when unknown.
    async fn child_pids(&self, pid: u32) -> Vec<u32>;

    /// Signals `pid`. A process that is already gone counts as success.
    async fn signal(&self, pid: u32, signal: Signal) -> Result<()>;
}

/// The host's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

#[cfg(unix)]
fn to_raw_pid(pid: u32) -> Result<libc::pid_t> {
    let raw: libc::pid_t = pid
        .try_into()
        .map_err(|_| Error::Process(format!("pid {} out of range", pid)))?;
    // 0 and negatives address process groups.
    if raw <= 0 {
        return Err(Error::Process(format!("refusing to signal pid {}", pid)));
    }
    Ok(raw)
}

#[async_trait]
impl ProcessControl for SystemProcesses {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = to_raw_pid(pid) else {
            return false;
        };
        let res = unsafe { libc::kill(raw, 0) };
        if res == 0 {
            return true;
        }
        // EPERM: exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(windows)]
    fn is_alive(&self, pid: u32) -> bool {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    #[cfg(unix)]
    async fn child_pids(&self, pid: u32) -> Vec<u32> {
        match Command::new("pgrep").args(["-P", &pid.to_string()]).output().await {
            Ok(out) => parse_pid_lines(&String::from_utf8_lossy(&out.stdout)),
            Err(e) => {
                debug!(pid, error = %e, "pgrep unavailable");
                Vec::new()
            }
        }
    }

    #[cfg(windows)]
    async fn child_pids(&self, pid: u32) -> Vec<u32> {
        let filter = format!("(ParentProcessId={})", pid);
        match Command::new("wmic")
            .args(["process", "where", &filter, "get", "ProcessId"])
            .output()
            .await
        {
            Ok(out) => parse_pid_lines(&String::from_utf8_lossy(&out.stdout)),
            Err(e) => {
                debug!(pid, error = %e, "wmic unavailable");
                Vec::new()
            }
        }
    }

    #[cfg(unix)]
    async fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        let raw = to_raw_pid(pid)?;
        let sig = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        let res = unsafe { libc::kill(raw, sig) };
        if res == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(Error::Process(format!("kill({}, {:?}) failed: {}", pid, signal, err)))
    }

    #[cfg(windows)]
    async fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        let pid_arg = pid.to_string();
        let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
        if signal == Signal::Kill {
            args.push("/F");
        }
        let status = Command::new("taskkill")
            .args(&args)
            .status()
            .await
            .map_err(|e| Error::Process(format!("taskkill failed to start: {}", e)))?;
        if status.success() || !self.is_alive(pid) {
            Ok(())
        } else {
            Err(Error::Process(format!("taskkill exited with {}", status)))
        }
    }
}

fn parse_pid_lines(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pid_lines_skips_headers_and_blanks() {
        let out = "ProcessId  \r\n4242  \r\n\r\n4243\n";
        assert_eq!(parse_pid_lines(out), vec![4242, 4243]);
        assert!(parse_pid_lines("").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_current_process_is_alive() {
        assert!(SystemProcesses.is_alive(std::process::id()));
        assert!(!SystemProcesses.is_alive(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_refuses_pid_zero() {
        let err = SystemProcesses.signal(0, Signal::Kill).await.unwrap_err();
        assert!(matches!(err, Error::Process(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_spawned_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();
        assert!(SystemProcesses.is_alive(pid));

        SystemProcesses.signal(pid, Signal::Kill).await.unwrap();
        child.wait().await.unwrap();
        assert!(!SystemProcesses.is_alive(pid));
    }
}
