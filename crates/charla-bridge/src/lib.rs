// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bridge transport: drives an external messaging bridge as a child
//! process per tenant.
//!
//! The bridge binary owns the actual protocol. This adapter spawns it with
//! the tenant's session directory, writes JSON commands to its stdin (one
//! per line), and reads JSON events from its stdout. Send results are
//! correlated by a numeric `corr` id. Bridge exit surfaces as a
//! `disconnected` event followed by stream closure.

pub mod protocol;

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use charla_config::model::TransportConfig;
use charla_core::types::{AdapterType, HealthStatus, TransportEvent};
use charla_core::{
    CharlaError, MessageId, PluginAdapter, TenantId, TransportAdapter, TransportSession,
};
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{BridgeCommand, Parsed};

/// Transport adapter spawning one bridge child process per tenant session.
pub struct BridgeTransport {
    config: TransportConfig,
}

impl BridgeTransport {
    /// Requires `transport.bridge_command` to be configured.
    pub fn new(config: TransportConfig) -> Result<Self, CharlaError> {
        let command = config.bridge_command.as_deref().ok_or_else(|| {
            CharlaError::Config("transport.bridge_command is required for the bridge transport".into())
        })?;
        if command.trim().is_empty() {
            return Err(CharlaError::Config(
                "transport.bridge_command cannot be empty".into(),
            ));
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl PluginAdapter for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Transport
    }

    async fn health_check(&self) -> Result<HealthStatus, CharlaError> {
        // The bridge binary must at least exist on disk.
        let command = self.config.bridge_command.as_deref().unwrap_or_default();
        let path = Path::new(command);
        if path.is_absolute() && !path.exists() {
            return Ok(HealthStatus::Unhealthy(format!(
                "bridge command not found: {command}"
            )));
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CharlaError> {
        // Sessions own their children; nothing adapter-wide to release.
        Ok(())
    }
}

#[async_trait]
impl TransportAdapter for BridgeTransport {
    async fn open_session(
        &self,
        tenant: TenantId,
        session_dir: &Path,
    ) -> Result<Box<dyn TransportSession>, CharlaError> {
        let command = self
            .config
            .bridge_command
            .as_deref()
            .ok_or_else(|| CharlaError::Config("transport.bridge_command unset".into()))?;

        let mut child = tokio::process::Command::new(command)
            .args(&self.config.bridge_args)
            .arg("--session-dir")
            .arg(session_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CharlaError::Transport {
                message: format!("failed to spawn bridge process: {e}"),
                source: Some(Box::new(e)),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| CharlaError::Transport {
            message: "bridge stdin unavailable".into(),
            source: None,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| CharlaError::Transport {
            message: "bridge stdout unavailable".into(),
            source: None,
        })?;

        info!(tenant = %tenant, command = %command, "bridge process spawned");

        let pending: Arc<DashMap<u64, oneshot::Sender<Result<MessageId, CharlaError>>>> =
            Arc::new(DashMap::new());
        let (events_tx, events_rx) = mpsc::channel(256);

        let reader = spawn_reader(tenant, stdout, events_tx, Arc::clone(&pending));

        Ok(Box::new(BridgeSession {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            events_rx: Mutex::new(events_rx),
            pending,
            corr: AtomicU64::new(0),
            reader: Mutex::new(Some(reader)),
        }))
    }
}

/// Reads stdout lines, resolving send acks and forwarding events.
fn spawn_reader(
    tenant: TenantId,
    stdout: tokio::process::ChildStdout,
    events_tx: mpsc::Sender<TransportEvent>,
    pending: Arc<DashMap<u64, oneshot::Sender<Result<MessageId, CharlaError>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match protocol::parse_line(line) {
                        Parsed::Ack(ack) => {
                            if let Some((_, waiter)) = pending.remove(&ack.corr) {
                                let _ = waiter.send(ack.into_result());
                            } else {
                                debug!(tenant = %tenant, corr = ack.corr, "ack for unknown corr");
                            }
                        }
                        Parsed::Event(event) => {
                            if events_tx.send(event).await.is_err() {
                                // Session was dropped; stop reading.
                                break;
                            }
                        }
                        Parsed::Unknown => {
                            warn!(tenant = %tenant, line, "unparseable bridge line");
                        }
                    }
                }
                Ok(None) => {
                    debug!(tenant = %tenant, "bridge stdout closed");
                    let _ = events_tx
                        .send(TransportEvent::Disconnected {
                            reason: "bridge process exited".into(),
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    warn!(tenant = %tenant, error = %e, "bridge stdout read error");
                    break;
                }
            }
        }
        // Dropping events_tx closes the event stream for the consumer.
    })
}

/// One live bridge child process bound to a tenant.
struct BridgeSession {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    pending: Arc<DashMap<u64, oneshot::Sender<Result<MessageId, CharlaError>>>>,
    corr: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeSession {
    async fn write_command(&self, command: &BridgeCommand) -> Result<(), CharlaError> {
        let mut line = serde_json::to_string(command).map_err(|e| CharlaError::Transport {
            message: format!("failed to encode bridge command: {e}"),
            source: Some(Box::new(e)),
        })?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CharlaError::Transport {
                message: format!("failed to write to bridge: {e}"),
                source: Some(Box::new(e)),
            })?;
        stdin.flush().await.map_err(|e| CharlaError::Transport {
            message: format!("failed to flush bridge stdin: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[async_trait]
impl TransportSession for BridgeSession {
    async fn connect(&self) -> Result<(), CharlaError> {
        self.write_command(&BridgeCommand::Connect).await
    }

    async fn destroy(&self) -> Result<(), CharlaError> {
        // Best-effort polite shutdown, then the hammer.
        let _ = self.write_command(&BridgeCommand::Destroy).await;

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }

        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "bridge child already gone");
        }
        Ok(())
    }

    async fn send_message(&self, to: &str, content: &str) -> Result<MessageId, CharlaError> {
        let corr = self.corr.fetch_add(1, Ordering::SeqCst) + 1;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending.insert(corr, ack_tx);

        let command = BridgeCommand::Send {
            corr,
            to: to.to_string(),
            content: content.to_string(),
        };
        if let Err(e) = self.write_command(&command).await {
            self.pending.remove(&corr);
            return Err(e);
        }

        match ack_rx.await {
            Ok(result) => result,
            Err(_) => {
                self.pending.remove(&corr);
                Err(CharlaError::TransientSend {
                    message: "bridge closed before acknowledging send".into(),
                })
            }
        }
    }

    async fn receive(&self) -> Result<TransportEvent, CharlaError> {
        let mut rx = self.events_rx.lock().await;
        rx.recv().await.ok_or_else(|| CharlaError::Transport {
            message: "bridge event stream closed".into(),
            source: None,
        })
    }
}
