// ABOUTME: Tool server transport over a child process speaking line-delimited JSON-RPC
// ABOUTME: Spawns the server, performs the initialize handshake and serialises requests

use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{initialize_params, RpcRequest, RpcResponse, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Result, ToolError};

struct StdioSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

pub struct StdioTransport {
    name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
    // One request in flight at a time; the stream has no multiplexing
    session: Mutex<Option<StdioSession>>,
    next_id: AtomicU64,
}

impl StdioTransport {
    pub fn new(
        name: &str,
        command: &str,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args,
            env,
            timeout: timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        {
            let mut session = self.session.lock().await;
            if session.is_some() {
                return Err(ToolError::AlreadyConnected(self.name.clone()));
            }

            info!("Starting tool server {}: {} {:?}", self.name, self.command, self.args);

            let mut child = Command::new(&self.command)
                .args(&self.args)
                .envs(&self.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    ToolError::Transport(format!("failed to spawn {}: {}", self.command, e))
                })?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| ToolError::Transport("child stdin unavailable".to_string()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| ToolError::Transport("child stdout unavailable".to_string()))?;

            *session = Some(StdioSession {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            });
        }

        let handshake = async {
            self.request("initialize", Some(initialize_params())).await?;
            self.notify("notifications/initialized").await
        }
        .await;

        if let Err(e) = handshake {
            warn!("Tool server {} failed its handshake: {}", self.name, e);
            let _ = self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        let Some(mut session) = session else {
            return Err(ToolError::NotConnected(self.name.clone()));
        };

        drop(session.stdin);
        if let Err(e) = session.child.kill().await {
            debug!("Tool server {} already exited: {}", self.name, e);
        }
        info!("Stopped tool server {}", self.name);
        Ok(())
    }

    async fn write_line(session: &mut StdioSession, message: &RpcRequest<'_>) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        session.stdin.write_all(line.as_bytes()).await?;
        session.stdin.flush().await?;
        Ok(())
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ToolError::NotConnected(self.name.clone()))?;
        Self::write_line(session, &RpcRequest::notification(method)).await
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| ToolError::NotConnected(self.name.clone()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!("-> {} {} #{}", self.name, method, id);

        let exchange = async {
            Self::write_line(session, &RpcRequest::call(id, method, params)).await?;

            loop {
                let line = session.stdout.next_line().await?.ok_or_else(|| {
                    ToolError::Transport(format!("tool server {} closed its output", self.name))
                })?;
                if line.trim().is_empty() {
                    continue;
                }

                let message: Value = serde_json::from_str(&line)
                    .map_err(|e| ToolError::Protocol(format!("unparseable line: {}", e)))?;
                // Server-initiated notifications carry no id
                if message.get("id").map_or(true, Value::is_null) {
                    continue;
                }

                let response: RpcResponse = serde_json::from_value(message)
                    .map_err(|e| ToolError::Protocol(e.to_string()))?;
                if response.id.as_ref().and_then(Value::as_u64) != Some(id) {
                    debug!("Skipping stale response from {}", self.name);
                    continue;
                }
                return response.into_result();
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Transport(format!(
                "{} on {} timed out after {:?}",
                method, self.name, self.timeout
            ))),
        }
    }
}
