// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock transport adapter for deterministic testing.
//!
//! Each opened session immediately replays a configurable event script,
//! then stays open for events pushed by the test via
//! [`MockTransport::push_event`]. Sends are recorded and may be scripted
//! to fail.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use charla_core::types::{AdapterType, HealthStatus, TransportEvent};
use charla_core::{
    CharlaError, MessageId, PluginAdapter, TenantId, TransportAdapter, TransportSession,
};
use dashmap::DashMap;
use tokio::sync::mpsc;

/// A recorded outbound send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub tenant: i64,
    pub to: String,
    pub content: String,
    /// Present when the send succeeded.
    pub message_id: Option<String>,
}

/// Mock transport: scripted events per session, recorded sends.
pub struct MockTransport {
    script: StdMutex<Vec<TransportEvent>>,
    handles: DashMap<i64, mpsc::Sender<TransportEvent>>,
    opened: AtomicUsize,
    sent: Arc<StdMutex<Vec<SentMessage>>>,
    send_results: Arc<StdMutex<VecDeque<Result<MessageId, CharlaError>>>>,
}

impl MockTransport {
    /// A transport whose sessions become ready immediately.
    pub fn new() -> Self {
        Self::with_script(vec![TransportEvent::Ready {
            phone: "5511999990000".to_string(),
        }])
    }

    /// A transport replaying `script` on every opened session.
    pub fn with_script(script: Vec<TransportEvent>) -> Self {
        Self {
            script: StdMutex::new(script),
            handles: DashMap::new(),
            opened: AtomicUsize::new(0),
            sent: Arc::new(StdMutex::new(Vec::new())),
            send_results: Arc::new(StdMutex::new(VecDeque::new())),
        }
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Push an event into a tenant's live session.
    ///
    /// Returns false when the tenant has no live session.
    pub fn push_event(&self, tenant: i64, event: TransportEvent) -> bool {
        match self.handles.get(&tenant) {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Queue the result of the next send.
    pub fn push_send_result(&self, result: Result<MessageId, CharlaError>) {
        self.send_results
            .lock()
            .expect("send_results lock")
            .push_back(result);
    }

    /// All sends recorded so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockTransport {
    fn name(&self) -> &str {
        "mock-transport"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Transport
    }

    async fn health_check(&self) -> Result<HealthStatus, CharlaError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CharlaError> {
        Ok(())
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    async fn open_session(
        &self,
        tenant: TenantId,
        _session_dir: &Path,
    ) -> Result<Box<dyn TransportSession>, CharlaError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(256);
        for event in self.script.lock().expect("script lock").iter() {
            let _ = tx.try_send(event.clone());
        }
        self.handles.insert(tenant.0, tx.clone());

        Ok(Box::new(MockSession {
            tenant: tenant.0,
            events: tokio::sync::Mutex::new(rx),
            _events_tx: tx,
            sent: Arc::clone(&self.sent),
            send_results: Arc::clone(&self.send_results),
        }))
    }
}

struct MockSession {
    tenant: i64,
    events: tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>,
    // Keeps the channel open so receive() blocks once the script drains.
    _events_tx: mpsc::Sender<TransportEvent>,
    sent: Arc<StdMutex<Vec<SentMessage>>>,
    send_results: Arc<StdMutex<VecDeque<Result<MessageId, CharlaError>>>>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn connect(&self) -> Result<(), CharlaError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), CharlaError> {
        Ok(())
    }

    async fn send_message(&self, to: &str, content: &str) -> Result<MessageId, CharlaError> {
        let scripted = self
            .send_results
            .lock()
            .expect("send_results lock")
            .pop_front();
        let result = match scripted {
            Some(result) => result,
            None => Ok(MessageId(format!("sent-{}", uuid::Uuid::new_v4()))),
        };

        self.sent.lock().expect("sent lock").push(SentMessage {
            tenant: self.tenant,
            to: to.to_string(),
            content: content.to_string(),
            message_id: result.as_ref().ok().map(|id| id.0.clone()),
        });

        result
    }

    async fn receive(&self) -> Result<TransportEvent, CharlaError> {
        let mut rx = self.events.lock().await;
        rx.recv().await.ok_or_else(|| CharlaError::Transport {
            message: "mock event stream closed".to_string(),
            source: None,
        })
    }
}
