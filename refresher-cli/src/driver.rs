//! Browser sessions backed by an external automation helper process.
//!
//! The helper binary owns the real browser; we speak a newline-delimited
//! JSON protocol over its stdin/stdout. One helper process per session
//! keeps accounts isolated from each other.
//!
//! Request:  `{"id": 3, "op": "fill", "params": {...}}`
//! Response: `{"id": 3, "ok": true, "value": ...}` or
//!           `{"id": 3, "ok": false, "error": "..."}`

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use refresher::browser::{
    BrowserDriver, BrowserProvider, DriverError, PageCondition, Role, Target,
};

/// Spawns one helper process per browser session.
pub struct HelperProvider {
    command: String,
    args: Vec<String>,
}

impl HelperProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl BrowserProvider for HelperProvider {
    async fn open_session(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        debug!(command = %self.command, "spawning browser helper");
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Protocol("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Protocol("helper stdout unavailable".to_string()))?;

        Ok(Box::new(HelperDriver {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            next_id: 0,
            closed: false,
        }))
    }
}

#[derive(Deserialize)]
struct HelperResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct HelperDriver {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    closed: bool,
}

impl HelperDriver {
    async fn call(&mut self, op: &str, params: Value) -> Result<Value, DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.next_id += 1;
        let id = self.next_id;
        let request = json!({ "id": id, "op": op, "params": params });
        let mut line = request.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self
            .lines
            .next_line()
            .await?
            .ok_or(DriverError::Closed)?;
        let response: HelperResponse = serde_json::from_str(&reply)
            .map_err(|e| DriverError::Protocol(format!("malformed helper reply: {e}")))?;
        if response.id != id {
            return Err(DriverError::Protocol(format!(
                "helper answered request {} while {} was pending",
                response.id, id
            )));
        }
        if !response.ok {
            return Err(DriverError::Protocol(
                response.error.unwrap_or_else(|| format!("{op} failed")),
            ));
        }
        Ok(response.value)
    }
}

fn role_json(role: Role) -> &'static str {
    match role {
        Role::Button => "button",
        Role::Link => "link",
        Role::Any => "any",
    }
}

fn target_json(target: &Target) -> Value {
    match target {
        Target::Field(name) => json!({ "kind": "field", "name": name }),
        Target::Labeled { role, label } => {
            json!({ "kind": "labeled", "role": role_json(*role), "label": label })
        }
        Target::FirstEditable => json!({ "kind": "first_editable" }),
    }
}

fn condition_json(condition: &PageCondition) -> Value {
    match condition {
        PageCondition::TargetVisible(target) => {
            json!({ "kind": "visible", "target": target_json(target) })
        }
        PageCondition::TextPresent(text) => json!({ "kind": "text", "text": text }),
    }
}

#[async_trait]
impl BrowserDriver for HelperDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.call("navigate", json!({ "url": url })).await?;
        Ok(())
    }

    async fn fill(&mut self, target: &Target, text: &str) -> Result<bool, DriverError> {
        let value = self
            .call("fill", json!({ "target": target_json(target), "text": text }))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn activate(&mut self, target: &Target) -> Result<bool, DriverError> {
        let value = self
            .call("activate", json!({ "target": target_json(target) }))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn type_text(&mut self, text: &str) -> Result<(), DriverError> {
        self.call("type", json!({ "text": text })).await?;
        Ok(())
    }

    async fn press_enter(&mut self) -> Result<(), DriverError> {
        self.call("press_enter", json!({})).await?;
        Ok(())
    }

    async fn wait_any(
        &mut self,
        conditions: &[PageCondition],
        timeout: Duration,
    ) -> Result<Option<usize>, DriverError> {
        let payload = json!({
            "conditions": conditions.iter().map(condition_json).collect::<Vec<_>>(),
            "timeout_ms": timeout.as_millis() as u64,
        });
        let value = self.call("wait_any", payload).await?;
        Ok(value.as_u64().map(|index| index as usize))
    }

    async fn cookie(&mut self, name: &str) -> Result<Option<String>, DriverError> {
        let value = self.call("cookie", json!({ "name": name })).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        let value = self.call("current_url", json!({})).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Protocol("current_url returned no string".to_string()))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        // Best effort: ask the helper to shut down cleanly, then make sure
        // the process is gone.
        if let Err(e) = self.call("close", json!({})).await {
            debug!(error = %e, "helper close request failed");
        }
        self.closed = true;
        if let Err(e) = self.child.start_kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!(error = %e, "failed to kill browser helper");
            }
        }
        let _ = self.child.wait().await;
        Ok(())
    }
}
