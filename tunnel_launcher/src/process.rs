use crate::error::LauncherError;
use std::{
    process::{ExitStatus, Stdio},
    time::Duration,
};
use sysinfo::{Pid, Signal, System};
use tokio::process::{Child, Command};

/// A spawned child that is killed when dropped or stopped.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
}

impl ManagedProcess {
    pub fn spawn(
        name: &str,
        program: &str,
        args: &[String],
        envs: &[(&str, &str)],
        quiet: bool,
    ) -> Result<Self, LauncherError> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        if quiet {
            cmd.stdout(Stdio::null());
        }

        let child = cmd.spawn().map_err(|source| LauncherError::Spawn {
            program: program.to_string(),
            source,
        })?;

        tracing::info!(pid = child.id(), "{} started", name);
        Ok(Self {
            name: name.to_string(),
            child,
        })
    }

    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Sends SIGTERM and waits up to `grace` before falling back to SIGKILL.
    pub async fn stop(mut self, grace: Duration) -> Option<ExitStatus> {
        if self.terminate() {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!("{} stopped ({})", self.name, status);
                    return Some(status);
                }
                Ok(Err(e)) => tracing::warn!("Failed to wait for {}: {}", self.name, e),
                Err(_) => tracing::warn!(
                    "{} ignored SIGTERM for {:?}, killing it",
                    self.name,
                    grace
                ),
            }
        }

        if let Err(e) = self.child.start_kill() {
            tracing::debug!("{} already stopped: {}", self.name, e);
        }
        match self.child.wait().await {
            Ok(status) => {
                tracing::info!("{} killed ({})", self.name, status);
                Some(status)
            }
            Err(e) => {
                tracing::warn!("Failed to reap {}: {}", self.name, e);
                None
            }
        }
    }

    fn terminate(&self) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        if !system.refresh_process(pid) {
            return false;
        }
        system
            .process(pid)
            .and_then(|process| process.kill_with(Signal::Term))
            .unwrap_or(false)
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::{os::unix::process::ExitStatusExt, path::Path};

    const GRACE: Duration = Duration::from_secs(5);

    /// True while `pid` is alive or an unreaped zombie.
    pub(crate) fn is_present(pid: u32) -> bool {
        System::new().refresh_process(Pid::from_u32(pid))
    }

    pub(crate) async fn wait_for_file(path: &Path) {
        for _ in 0..200 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{:?} never appeared", path);
    }

    fn shell(script: String) -> ManagedProcess {
        ManagedProcess::spawn("shell", "sh", &["-c".to_string(), script], &[], true).unwrap()
    }

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let mut process =
            ManagedProcess::spawn("sleeper", "sleep", &["30".to_string()], &[], true).unwrap();

        assert!(!process.has_exited());
        let status = process.stop(GRACE).await.unwrap();
        assert_eq!(status.signal(), Some(15));
    }

    #[tokio::test]
    async fn test_stop_lets_child_handle_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let process = shell(format!(
            "trap 'exit 3' TERM; touch {}; while :; do sleep 0.1; done",
            ready.display()
        ));
        wait_for_file(&ready).await;

        let status = process.stop(GRACE).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_stop_kills_child_ignoring_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let process = shell(format!(
            "trap '' TERM; touch {}; while :; do sleep 0.1; done",
            ready.display()
        ));
        wait_for_file(&ready).await;

        let status = process.stop(Duration::from_millis(300)).await.unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[tokio::test]
    async fn test_stop_after_exit() {
        let mut process = shell("exit 7".to_string());
        for _ in 0..200 {
            if process.has_exited() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = process.stop(GRACE).await.unwrap();
        assert_eq!(status.code(), Some(7));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = ManagedProcess::spawn("ghost", "./definitely-not-a-binary", &[], &[], true);

        match result {
            Err(LauncherError::Spawn { program, .. }) => {
                assert_eq!(program, "./definitely-not-a-binary")
            }
            other => panic!("expected spawn error, got {:?}", other),
        }
    }
}
