//! Process-backed daemon manager
//!
//! Daemons are spawned as detached children and tracked through pidfiles
//! under the run directory, so a restarted clusterd still finds them.

use super::{Daemon, DaemonManager, DaemonRpc, HttpDaemonClient};
use crate::common::Result;
use crate::metadata::MetadataStore;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info};

/// Time a freshly spawned daemon must survive before `start(wait = true)` succeeds
const STARTUP_GRACE: Duration = Duration::from_millis(200);

pub struct ProcessManager {
    run_dir: PathBuf,
    metadata: MetadataStore,
    rpc_timeout: Duration,
}

impl ProcessManager {
    pub fn new(run_dir: impl AsRef<Path>, metadata: MetadataStore, rpc_timeout: Duration) -> Self {
        Self {
            run_dir: run_dir.as_ref().to_path_buf(),
            metadata,
            rpc_timeout,
        }
    }

    fn pidfile(&self, daemon: &Daemon) -> PathBuf {
        let file: String = daemon
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.run_dir.join(format!("{}.pid", file))
    }

    async fn read_pid(&self, daemon: &Daemon) -> Result<Option<i32>> {
        match tokio::fs::read_to_string(self.pidfile(daemon)).await {
            Ok(contents) => Ok(contents.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pid of the daemon if its process is alive
    pub async fn running_pid(&self, daemon: &Daemon) -> Result<Option<i32>> {
        Ok(self
            .read_pid(daemon)
            .await?
            .filter(|pid| signal::kill(Pid::from_raw(*pid), None).is_ok()))
    }

    async fn remove_pidfile(&self, daemon: &Daemon) -> Result<()> {
        match tokio::fs::remove_file(self.pidfile(daemon)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DaemonManager for ProcessManager {
    async fn start(&self, daemon: &Daemon, wait: bool) -> Result<()> {
        if let Some(pid) = self.running_pid(daemon).await? {
            debug!(daemon = %daemon.name, pid, "Daemon already running");
            return Err(crate::Error::AlreadyRunning(daemon.name.clone()));
        }

        tokio::fs::create_dir_all(&self.run_dir).await?;

        let mut child = tokio::process::Command::new(&daemon.binary)
            .args(&daemon.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| crate::Error::Internal(format!("{} exited at spawn", daemon.name)))?;

        if wait {
            tokio::time::sleep(STARTUP_GRACE).await;
            if let Some(status) = child.try_wait()? {
                return Err(crate::Error::Other(format!(
                    "{} exited during startup: {}",
                    daemon.name, status
                )));
            }
        }

        tokio::fs::write(self.pidfile(daemon), pid.to_string()).await?;
        self.metadata.put_daemon(daemon).await?;

        // reap the child whenever it exits
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        info!(daemon = %daemon.name, pid, "Daemon started");
        Ok(())
    }

    async fn stop(&self, daemon: &Daemon, force: bool) -> Result<()> {
        let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };

        match self.read_pid(daemon).await? {
            Some(pid) => match signal::kill(Pid::from_raw(pid), sig) {
                Ok(()) => info!(daemon = %daemon.name, pid, signal = sig.as_str(), "Daemon signalled"),
                Err(Errno::ESRCH) => debug!(daemon = %daemon.name, pid, "Daemon already gone"),
                Err(e) => {
                    return Err(crate::Error::Other(format!(
                        "failed to signal {} (pid {}): {}",
                        daemon.name, pid, e
                    )))
                }
            },
            None => debug!(daemon = %daemon.name, "No pidfile, nothing to stop"),
        }

        self.remove_pidfile(daemon).await?;
        self.metadata.del_daemon(&daemon.id).await
    }

    async fn client(&self, daemon: &Daemon) -> Result<Box<dyn DaemonRpc>> {
        let addr = daemon
            .rpc_addr
            .as_deref()
            .ok_or_else(|| crate::Error::DaemonUnreachable(format!("{}: no rpc address", daemon.name)))?;

        match tokio::time::timeout(self.rpc_timeout, tokio::net::TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(crate::Error::DaemonUnreachable(format!(
                    "{}: {}",
                    daemon.name, e
                )))
            }
            Err(_) => {
                return Err(crate::Error::DaemonUnreachable(format!(
                    "{}: connect timed out",
                    daemon.name
                )))
            }
        }

        Ok(Box::new(HttpDaemonClient::new(addr, self.rpc_timeout)?))
    }

    async fn del_daemon_record(&self, daemon: &Daemon) -> Result<()> {
        self.remove_pidfile(daemon).await?;
        self.metadata.del_daemon(&daemon.id).await
    }
}
