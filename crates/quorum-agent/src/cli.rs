//! Command-line agent caller
//!
//! Runs an agent CLI as a child process inside the environment's working
//! directory. The prompt is written to stdin while the reply is read from
//! stdout, all under the call's timeout. A call that outlives its timeout gets SIGTERM, then a grace
//! period, then SIGKILL.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::caller::AgentCaller;
use crate::error::AgentError;
use crate::types::{AgentRequest, AgentResponse};

const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CliAgentCaller {
    /// Program followed by its arguments
    command: Vec<String>,
    grace: Duration,
}

impl CliAgentCaller {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            grace: DEFAULT_GRACE,
        }
    }

    /// Time between SIGTERM and SIGKILL for a timed-out child
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                debug!("Reading agent output failed: {}", e);
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Write `input` to the child's stdin, then close it
fn feed<W>(writer: Option<W>, input: Vec<u8>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(mut writer) = writer {
            // The child may exit without reading its input
            if let Err(e) = writer.write_all(&input).await {
                debug!("Writing prompt to agent failed: {}", e);
            }
        }
    })
}

/// SIGTERM, wait up to `grace`, then SIGKILL
async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, "SIGTERM failed: {}", e);
        }
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!("Agent process ignored SIGTERM for {:?}, killing", grace);
        if let Err(e) = child.kill().await {
            warn!("Failed to kill agent process: {}", e);
        }
    }
}

#[async_trait]
impl AgentCaller for CliAgentCaller {
    #[instrument(skip(self, request), fields(role = %request.role, dir = %request.working_dir.display()))]
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AgentError::permanent("agent command is empty"))?;

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&request.working_dir)
            .env("QUORUM_ROLE", request.role.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::permanent(format!("Failed to spawn {}: {}", program, e)))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let writer = feed(child.stdin.take(), request.prompt.clone().into_bytes());

        let status = match tokio::time::timeout(request.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                writer.abort();
                return Err(AgentError::permanent(format!("Failed to wait for agent: {}", e)));
            }
            Err(_) => {
                writer.abort();
                terminate(&mut child, self.grace).await;
                return Err(AgentError::timeout(format!(
                    "{} exceeded {:?}",
                    request.role, request.timeout
                )));
            }
        };

        let text = stdout.await.unwrap_or_default();
        let errors = stderr.await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        if !status.success() {
            return Err(AgentError::permanent(format!(
                "agent exited with {}: {}",
                status,
                errors.trim()
            )));
        }

        debug!(duration_ms, chars = text.len(), "Agent process finished");
        Ok(AgentResponse {
            text: text.trim_end().to_string(),
            usage: Default::default(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::Role;

    fn request(prompt: &str, timeout: Duration) -> AgentRequest {
        AgentRequest {
            role: Role::Coder,
            prompt: prompt.to_string(),
            working_dir: std::env::temp_dir(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_prompt_round_trips_through_stdin() {
        let caller = CliAgentCaller::new(vec!["cat".to_string()]);
        let response = caller
            .invoke(request("hello agent", Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(response.text, "hello agent");
    }

    #[tokio::test]
    async fn test_timeout_terminates_child() {
        let caller = CliAgentCaller::new(vec!["sleep".to_string(), "30".to_string()])
            .with_grace(Duration::from_millis(200));

        let started = Instant::now();
        let err = caller
            .invoke(request("", Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_large_prompt_does_not_deadlock() {
        let prompt = "x".repeat(1024 * 1024);
        let caller = CliAgentCaller::new(vec!["cat".to_string()]);

        let response = tokio::time::timeout(
            Duration::from_secs(15),
            caller.invoke(request(&prompt, Duration::from_secs(10))),
        )
        .await
        .expect("invoke hung")
        .unwrap();
        assert_eq!(response.text.len(), prompt.len());
    }

    #[tokio::test]
    async fn test_timeout_fires_while_child_ignores_large_prompt() {
        let prompt = "x".repeat(1024 * 1024);
        let caller = CliAgentCaller::new(vec!["sleep".to_string(), "30".to_string()])
            .with_grace(Duration::from_millis(200));

        let started = Instant::now();
        let err = tokio::time::timeout(
            Duration::from_secs(15),
            caller.invoke(request(&prompt, Duration::from_millis(300))),
        )
        .await
        .expect("invoke hung")
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_permanent() {
        let caller = CliAgentCaller::new(vec!["false".to_string()]);
        let err = caller
            .invoke(request("", Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_empty_command() {
        let caller = CliAgentCaller::new(vec![]);
        assert!(caller
            .invoke(request("", Duration::from_secs(1)))
            .await
            .is_err());
    }
}
