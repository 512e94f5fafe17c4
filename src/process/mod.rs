//! Process management for spawning RPC services.
//!
//! Spawns child processes from configured command arrays, passes the
//! requested name and address as environment variables, and waits for the
//! child to announce the address it actually bound on stdout:
//!
//! ```text
//! ready <name> <scheme://host:port>
//! ```
//!
//! Anything else the child prints before or after that line is forwarded
//! to the debug log.

use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::config::LauncherConfig;
use crate::interfaces::{LaunchError, LaunchedProcess, ProcessLauncher};

/// Environment variable carrying the suggested RPC name.
pub const RPC_NAME_ENV_VAR: &str = "ACQMAN_RPC_NAME";
/// Environment variable carrying the requested address (may have a `*` port).
pub const RPC_ADDRESS_ENV_VAR: &str = "ACQMAN_RPC_ADDRESS";
/// First word of the readiness handshake line.
pub const READY_PREFIX: &str = "ready";

/// Format the readiness handshake line.
pub fn ready_line(name: &str, address: &Address) -> String {
    format!("{} {} {}", READY_PREFIX, name, address)
}

/// Print the readiness handshake on stdout.
///
/// A service started by [`SubprocessLauncher`] must call this once it is
/// accepting connections.
pub fn announce_ready(name: &str, address: &Address) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", ready_line(name, address))?;
    stdout.flush()
}

/// Parse a readiness line.
///
/// Returns `None` for lines that are not handshakes at all and an error
/// for handshakes that are malformed.
pub fn parse_ready_line(line: &str) -> Option<Result<(String, Address), String>> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some(READY_PREFIX) {
        return None;
    }
    let parsed = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(address), None) => Address::parse(address)
            .map(|address| (name.to_string(), address))
            .map_err(|e| e.to_string()),
        _ => Err("expected `ready <name> <address>`".to_string()),
    };
    Some(parsed)
}

/// Manages a spawned child process.
pub struct ManagedProcess {
    child: Child,
    entry: String,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
}

impl ManagedProcess {
    /// Spawn a new process with the given command array and environment.
    ///
    /// Command is an array where the first element is the executable and
    /// the rest are arguments. No shell interpretation - direct exec.
    pub fn spawn(
        entry: &str,
        command: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, LaunchError> {
        let (executable, args) = command.split_first().ok_or_else(|| LaunchError::Spawn {
            entry: entry.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        info!(entry = %entry, executable = %executable, ?args, "Spawning process");

        let mut cmd = Command::new(executable);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }

        // stdout carries the handshake; stderr stays visible in our logs
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            error!(entry = %entry, executable = %executable, error = %e, "Failed to spawn process");
            LaunchError::Spawn {
                entry: entry.to_string(),
                source: e,
            }
        })?;

        info!(entry = %entry, pid = ?child.id(), "Process spawned");

        let stdout = child
            .stdout
            .take()
            .map(|stdout| BufReader::new(stdout).lines());

        Ok(Self {
            child,
            entry: entry.to_string(),
            stdout,
        })
    }

    /// Read stdout until the child reports ready.
    ///
    /// Once the handshake is seen, the rest of stdout is drained in the
    /// background so the child never blocks on a full pipe.
    pub async fn wait_for_ready(&mut self) -> Result<(String, Address), LaunchError> {
        let mut lines = self.stdout.take().ok_or_else(|| LaunchError::ExitedEarly {
            entry: self.entry.clone(),
        })?;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => {
                    return Err(LaunchError::ExitedEarly {
                        entry: self.entry.clone(),
                    })
                }
            };

            match parse_ready_line(&line) {
                None => debug!(entry = %self.entry, output = %line, "Child output"),
                Some(Err(_)) => {
                    return Err(LaunchError::Handshake {
                        entry: self.entry.clone(),
                        line,
                    })
                }
                Some(Ok((name, address))) => {
                    info!(entry = %self.entry, name = %name, address = %address, "Process ready");
                    let entry = self.entry.clone();
                    tokio::spawn(async move {
                        while let Ok(Some(line)) = lines.next_line().await {
                            debug!(entry = %entry, output = %line, "Child output");
                        }
                    });
                    return Ok((name, address));
                }
            }
        }
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(status = ?status, entry = %self.entry, "Process exited");
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to check process status");
                false
            }
        }
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        info!(pid = ?self.child.id(), entry = %self.entry, "Killing process");
        self.child.kill().await
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        // Try to kill the process on drop
        if let Ok(None) = self.child.try_wait() {
            warn!(pid = ?self.child.id(), "Killing orphaned process on drop");
            // Use start_kill for non-async drop
            let _ = self.child.start_kill();
        }
    }
}

/// A service process launched by [`SubprocessLauncher`].
pub struct SpawnedService {
    process: ManagedProcess,
    name: String,
    address: Address,
}

#[async_trait]
impl LaunchedProcess for SpawnedService {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &Address {
        &self.address
    }

    async fn stop(&mut self) -> Result<(), LaunchError> {
        self.process.kill().await.map_err(|e| LaunchError::Stop {
            name: self.name.clone(),
            source: e,
        })
    }
}

/// Launches configured entry points as child processes.
pub struct SubprocessLauncher {
    entries: HashMap<String, Vec<String>>,
    ready_timeout: Duration,
}

impl SubprocessLauncher {
    pub fn new(config: &LauncherConfig) -> Self {
        Self {
            entries: config.entries.clone(),
            ready_timeout: config.ready_timeout(),
        }
    }
}

#[async_trait]
impl ProcessLauncher for SubprocessLauncher {
    async fn launch(
        &self,
        entry: &str,
        suggested_name: &str,
        address: &Address,
    ) -> Result<Box<dyn LaunchedProcess>, LaunchError> {
        let command = self
            .entries
            .get(entry)
            .ok_or_else(|| LaunchError::UnknownEntry(entry.to_string()))?;

        let env = HashMap::from([
            (RPC_NAME_ENV_VAR.to_string(), suggested_name.to_string()),
            (RPC_ADDRESS_ENV_VAR.to_string(), address.to_string()),
        ]);

        let mut process = ManagedProcess::spawn(entry, command, &env)?;
        let (name, address) = tokio::time::timeout(self.ready_timeout, process.wait_for_ready())
            .await
            .map_err(|_| {
                warn!(entry = %entry, timeout = ?self.ready_timeout, "Process never reported ready");
                LaunchError::ReadyTimeout {
                    entry: entry.to_string(),
                    timeout: self.ready_timeout,
                }
            })??;

        Ok(Box::new(SpawnedService {
            process,
            name,
            address,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_line_round_trips_through_parser() {
        let address = Address::parse("tcp://127.0.0.1:40123").unwrap();
        let line = ready_line("default-host", &address);
        assert_eq!(line, "ready default-host tcp://127.0.0.1:40123");

        let (name, parsed) = parse_ready_line(&line).unwrap().unwrap();
        assert_eq!(name, "default-host");
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_parse_ignores_other_output() {
        assert!(parse_ready_line("starting up...").is_none());
        assert!(parse_ready_line("").is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_handshake() {
        assert!(matches!(parse_ready_line("ready host"), Some(Err(_))));
        assert!(matches!(
            parse_ready_line("ready host 127.0.0.1:5000"),
            Some(Err(_))
        ));
        assert!(matches!(
            parse_ready_line("ready host tcp://h:1 extra"),
            Some(Err(_))
        ));
    }

    fn launcher(command: &[&str], timeout_secs: u64) -> SubprocessLauncher {
        let mut entries = HashMap::new();
        if !command.is_empty() {
            let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
            entries.insert("host".to_string(), command);
        }
        SubprocessLauncher::new(&LauncherConfig {
            entries,
            ready_timeout_secs: timeout_secs,
        })
    }

    #[tokio::test]
    async fn test_unknown_entry() {
        let launcher = launcher(&[], 1);
        let address = Address::parse("tcp://127.0.0.1:*").unwrap();
        let result = launcher.launch("host", "h", &address).await;
        assert!(matches!(result, Err(LaunchError::UnknownEntry(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_reads_handshake_and_env() {
        // Echo the requested name back with a concrete port.
        let script = "echo booting; echo \"ready $ACQMAN_RPC_NAME tcp://127.0.0.1:41234\"; sleep 30";
        let launcher = launcher(&["sh", "-c", script], 10);
        let address = Address::parse("tcp://127.0.0.1:*").unwrap();

        let mut process = launcher.launch("host", "rig-host", &address).await.unwrap();
        assert_eq!(process.name(), "rig-host");
        assert_eq!(process.address().to_string(), "tcp://127.0.0.1:41234");

        process.stop().await.unwrap();
        // Stopping twice is fine.
        process.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_child_exits_without_handshake() {
        let launcher = launcher(&["sh", "-c", "echo nope"], 10);
        let address = Address::parse("tcp://127.0.0.1:*").unwrap();
        let result = launcher.launch("host", "h", &address).await;
        assert!(matches!(result, Err(LaunchError::ExitedEarly { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_times_out() {
        let launcher = launcher(&["sh", "-c", "sleep 30"], 1);
        let address = Address::parse("tcp://127.0.0.1:*").unwrap();
        let result = launcher.launch("host", "h", &address).await;
        assert!(matches!(result, Err(LaunchError::ReadyTimeout { .. })));
    }
}
