// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tenant transport session lifecycle management.
//!
//! The [`SessionManager`] owns the single authoritative registry of live
//! sessions, keyed by tenant id. Each entry serializes its lifecycle
//! operations behind a per-tenant lock while independent tenants proceed
//! fully in parallel; there is no cross-tenant lock.
//!
//! State machine per session:
//! `uninitialized -> awaiting_scan -> authenticated -> ready`, with
//! `disconnected`/`error` reachable from any state. Sends are accepted
//! only in `ready`.

mod cleanup;
mod events;
pub mod tracking;

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use charla_config::model::SessionConfig;
use charla_core::types::{ChangeEvent, InboundEnvelope, SessionState};
use charla_core::{
    CharlaError, MessageId, StorageAdapter, TenantId, TransportAdapter, TransportSession,
};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use tracking::{AutomatedSendTags, LastInboundTracker};

/// A cached QR credential with its issue instant.
#[derive(Debug, Clone)]
pub(crate) struct QrArtifact {
    pub payload: String,
    pub issued_at: DateTime<Utc>,
}

impl QrArtifact {
    pub(crate) fn new(payload: String) -> Self {
        Self {
            payload,
            issued_at: Utc::now(),
        }
    }
}

/// Mutable per-session state guarded by a short-held lock.
#[derive(Default)]
pub(crate) struct SlotInner {
    pub handle: Option<Arc<dyn TransportSession>>,
    pub qr: Option<QrArtifact>,
    pub phone: Option<String>,
    pub last_error: Option<String>,
    pub auth_failure: Option<String>,
    pub pump: Option<JoinHandle<()>>,
}

/// One registry entry: the exclusive owner of a tenant's transport handle.
pub(crate) struct TenantSession {
    /// Serializes connect/disconnect/cleanup for this tenant.
    pub op_lock: Arc<tokio::sync::Mutex<()>>,
    /// Current state, observable by waiters.
    pub state_tx: watch::Sender<SessionState>,
    pub inner: StdMutex<SlotInner>,
}

impl TenantSession {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        Self {
            op_lock: Arc::new(tokio::sync::Mutex::new(())),
            state_tx,
            inner: StdMutex::new(SlotInner::default()),
        }
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, SlotInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Result state of a connect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// The session reached `ready`.
    Connected,
    /// A QR credential was issued and awaits a scan.
    Initializing,
}

/// Outcome of [`SessionManager::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub state: ConnectState,
    /// True when a healthy session already existed and no work was done.
    pub reused: bool,
    /// The QR payload, present when `state` is `Initializing`.
    pub qr: Option<String>,
}

/// State as reported by [`SessionManager::status`].
///
/// Mirrors [`SessionState`] plus the synthetic `qr_expired` value, derived
/// when the cached QR outlived its validity window. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedState {
    Uninitialized,
    AwaitingScan,
    QrExpired,
    Authenticated,
    Ready,
    Disconnected,
    Error,
}

impl From<SessionState> for ReportedState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Uninitialized => ReportedState::Uninitialized,
            SessionState::AwaitingScan => ReportedState::AwaitingScan,
            SessionState::Authenticated => ReportedState::Authenticated,
            SessionState::Ready => ReportedState::Ready,
            SessionState::Disconnected => ReportedState::Disconnected,
            SessionState::Error => ReportedState::Error,
        }
    }
}

impl std::fmt::Display for ReportedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportedState::Uninitialized => write!(f, "uninitialized"),
            ReportedState::AwaitingScan => write!(f, "awaiting_scan"),
            ReportedState::QrExpired => write!(f, "qr_expired"),
            ReportedState::Authenticated => write!(f, "authenticated"),
            ReportedState::Ready => write!(f, "ready"),
            ReportedState::Disconnected => write!(f, "disconnected"),
            ReportedState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot returned by [`SessionManager::status`].
#[derive(Debug, Clone)]
pub struct SessionStatusView {
    pub state: ReportedState,
    /// Whether a non-expired QR credential is cached.
    pub qr_available: bool,
    /// Connected phone identity, present only in `ready`.
    pub phone: Option<String>,
}

/// Owns one transport handle per tenant and drives its lifecycle.
pub struct SessionManager {
    registry: DashMap<i64, Arc<TenantSession>>,
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    transport: Arc<dyn TransportAdapter + Send + Sync>,
    config: SessionConfig,
    tags: Arc<AutomatedSendTags>,
    last_inbound: Arc<LastInboundTracker>,
    ingest_tx: mpsc::Sender<InboundEnvelope>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SessionManager {
    /// Creates a session manager.
    ///
    /// Message events from every tenant's transport are forwarded into
    /// `ingest_tx`; state changes fan out on `changes`.
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        transport: Arc<dyn TransportAdapter + Send + Sync>,
        config: SessionConfig,
        ingest_tx: mpsc::Sender<InboundEnvelope>,
        changes: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        Self {
            registry: DashMap::new(),
            storage,
            transport,
            config,
            tags: Arc::new(AutomatedSendTags::new()),
            last_inbound: Arc::new(LastInboundTracker::new()),
            ingest_tx,
            changes,
        }
    }

    /// The automated-send tag set shared with the classifier.
    pub fn automated_tags(&self) -> Arc<AutomatedSendTags> {
        Arc::clone(&self.tags)
    }

    /// The last-inbound tracker shared with the classifier and pipeline.
    pub fn last_inbound(&self) -> Arc<LastInboundTracker> {
        Arc::clone(&self.last_inbound)
    }

    /// Number of sessions currently held in the registry.
    pub fn live_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Directory holding a tenant's transport credential artifacts.
    pub fn session_dir(&self, tenant: i64) -> PathBuf {
        PathBuf::from(&self.config.data_dir).join(format!("tenant-{tenant}"))
    }

    fn entry(&self, tenant: i64) -> Arc<TenantSession> {
        let entry = self
            .registry
            .entry(tenant)
            .or_insert_with(|| Arc::new(TenantSession::new()));
        Arc::clone(entry.value())
    }

    /// Get (or create) the tenant's registry entry and acquire its
    /// operation lock, retrying if the entry was removed while waiting.
    async fn locked_entry(&self, tenant: i64) -> (Arc<TenantSession>, OwnedMutexGuard<()>) {
        loop {
            let entry = self.entry(tenant);
            let guard = Arc::clone(&entry.op_lock).lock_owned().await;
            let still_current = self
                .registry
                .get(&tenant)
                .map(|e| Arc::ptr_eq(e.value(), &entry))
                .unwrap_or(false);
            if still_current {
                return (entry, guard);
            }
            // The entry was torn down while we waited; start over.
        }
    }

    /// Connect a tenant to the transport.
    ///
    /// A `ready` session is reused without any work. A handshake already in
    /// flight is a [`CharlaError::Conflict`]. Stale or inconsistent
    /// persisted artifacts are force-cleaned before the new handle is
    /// created. Bounded by the configured connect timeout; never blocks
    /// past it.
    pub async fn connect(&self, tenant: TenantId) -> Result<ConnectOutcome, CharlaError> {
        let (entry, _op) = self.locked_entry(tenant.0).await;

        match *entry.state_tx.borrow() {
            SessionState::Ready => {
                debug!(tenant = %tenant, "reusing healthy session");
                return Ok(ConnectOutcome {
                    state: ConnectState::Connected,
                    reused: true,
                    qr: None,
                });
            }
            SessionState::AwaitingScan | SessionState::Authenticated => {
                return Err(CharlaError::Conflict { tenant: tenant.0 });
            }
            _ => {}
        }

        self.reconcile_persisted(tenant.0, &entry).await?;

        let session_dir = self.session_dir(tenant.0);
        tokio::fs::create_dir_all(&session_dir)
            .await
            .map_err(|e| CharlaError::Transport {
                message: format!("cannot create session directory: {e}"),
                source: Some(Box::new(e)),
            })?;

        let handle: Arc<dyn TransportSession> =
            Arc::from(self.transport.open_session(tenant, &session_dir).await?);

        let (old_handle, old_pump) = {
            let mut inner = entry.lock_inner();
            let old = (inner.handle.take(), inner.pump.take());
            inner.handle = Some(Arc::clone(&handle));
            inner.qr = None;
            inner.phone = None;
            inner.last_error = None;
            inner.auth_failure = None;
            old
        };
        if let Some(old_pump) = old_pump {
            old_pump.abort();
        }
        if let Some(old_handle) = old_handle {
            if let Err(e) = old_handle.destroy().await {
                warn!(tenant = %tenant, error = %e, "stale handle destroy failed");
            }
        }
        entry.state_tx.send_replace(SessionState::Uninitialized);

        let pump = events::spawn_pump(events::PumpContext {
            tenant,
            session: Arc::clone(&entry),
            handle: Arc::clone(&handle),
            storage: Arc::clone(&self.storage),
            ingest_tx: self.ingest_tx.clone(),
            changes: self.changes.clone(),
        });
        entry.lock_inner().pump = Some(pump);

        let mut rx = entry.state_tx.subscribe();
        if let Err(e) = handle.connect().await {
            self.destroy_entry(tenant.0, &entry, true, Some(&e.to_string()))
                .await;
            return Err(e);
        }

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let wait = tokio::time::timeout(timeout, async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    SessionState::Ready => return Ok(ConnectState::Connected),
                    SessionState::AwaitingScan => return Ok(ConnectState::Initializing),
                    SessionState::Error => {
                        let (auth_failure, last_error) = {
                            let inner = entry.lock_inner();
                            (inner.auth_failure.clone(), inner.last_error.clone())
                        };
                        if let Some(reason) = auth_failure {
                            return Err(CharlaError::AuthenticationFailed { reason });
                        }
                        return Err(CharlaError::Transport {
                            message: last_error
                                .unwrap_or_else(|| "session failed during connect".to_string()),
                            source: None,
                        });
                    }
                    SessionState::Disconnected => {
                        return Err(CharlaError::Transport {
                            message: "transport closed during connect".to_string(),
                            source: None,
                        });
                    }
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(CharlaError::Transport {
                        message: "session event pump terminated".to_string(),
                        source: None,
                    });
                }
            }
        })
        .await;

        match wait {
            Ok(Ok(state)) => {
                let qr = if state == ConnectState::Initializing {
                    self.current_qr(&entry)
                } else {
                    None
                };
                info!(tenant = %tenant, state = ?state, "connect completed");
                Ok(ConnectOutcome {
                    state,
                    reused: false,
                    qr,
                })
            }
            Ok(Err(e)) => {
                self.destroy_entry(tenant.0, &entry, true, Some(&e.to_string()))
                    .await;
                Err(e)
            }
            Err(_) => {
                warn!(tenant = %tenant, timeout_secs = self.config.connect_timeout_secs, "connect timed out");
                self.destroy_entry(tenant.0, &entry, true, Some("connect timed out"))
                    .await;
                Err(CharlaError::Timeout { duration: timeout })
            }
        }
    }

    /// Current state snapshot for a tenant.
    ///
    /// Falls back to the persisted record when no in-memory session exists.
    pub async fn status(&self, tenant: TenantId) -> Result<SessionStatusView, CharlaError> {
        if let Some(entry) = self.registry.get(&tenant.0).map(|e| Arc::clone(e.value())) {
            let state = *entry.state_tx.borrow();
            let inner = entry.lock_inner();
            let (qr_available, qr_expired) = match &inner.qr {
                Some(qr) => {
                    let expired = self.qr_expired(qr);
                    (!expired, expired)
                }
                None => (false, false),
            };
            let reported = match state {
                SessionState::AwaitingScan if qr_expired => ReportedState::QrExpired,
                other => ReportedState::from(other),
            };
            let phone = if state == SessionState::Ready {
                inner.phone.clone()
            } else {
                None
            };
            return Ok(SessionStatusView {
                state: reported,
                qr_available,
                phone,
            });
        }

        let record = self.storage.get_session_record(tenant.0).await?;
        let state = record
            .and_then(|r| r.state.parse::<SessionState>().ok())
            .map(ReportedState::from)
            .unwrap_or(ReportedState::Uninitialized);
        Ok(SessionStatusView {
            state,
            qr_available: false,
            phone: None,
        })
    }

    /// The cached QR payload, if one exists and has not expired.
    pub fn qr(&self, tenant: TenantId) -> Option<String> {
        let entry = self.registry.get(&tenant.0).map(|e| Arc::clone(e.value()))?;
        self.current_qr(&entry)
    }

    /// Gracefully tear down a tenant's session.
    ///
    /// Clears the QR cache and per-tenant tracking, persists
    /// `disconnected`, and removes the entry from the registry. Session
    /// files on disk are left in place for a later reconnect.
    pub async fn disconnect(&self, tenant: TenantId) -> Result<(), CharlaError> {
        let (entry, _op) = self.locked_entry(tenant.0).await;
        self.destroy_entry(tenant.0, &entry, false, None).await;
        info!(tenant = %tenant, "session disconnected");
        Ok(())
    }

    /// Unconditional teardown: in-memory handle, caches, child processes,
    /// and persisted session files. Idempotent; safe when nothing exists.
    pub async fn force_cleanup(&self, tenant: TenantId) -> Result<(), CharlaError> {
        let (entry, _op) = self.locked_entry(tenant.0).await;
        self.destroy_entry(tenant.0, &entry, true, None).await;
        info!(tenant = %tenant, "session force-cleaned");
        Ok(())
    }

    /// Send a message through the tenant's session.
    ///
    /// Requires state `ready`. Transient failures retry with increasing
    /// backoff up to the configured attempt limit; terminal rejections
    /// and per-attempt timeouts fail immediately. On success with
    /// `automated` set, the message id joins the bounded automated-send
    /// tag set.
    pub async fn send(
        &self,
        tenant: TenantId,
        to: &str,
        content: &str,
        automated: bool,
    ) -> Result<MessageId, CharlaError> {
        let entry = self
            .registry
            .get(&tenant.0)
            .map(|e| Arc::clone(e.value()))
            .ok_or(CharlaError::NotConnected { tenant: tenant.0 })?;

        if *entry.state_tx.borrow() != SessionState::Ready {
            return Err(CharlaError::NotConnected { tenant: tenant.0 });
        }

        let handle = entry
            .lock_inner()
            .handle
            .clone()
            .ok_or(CharlaError::NotConnected { tenant: tenant.0 })?;

        let attempt_timeout = Duration::from_secs(self.config.send_timeout_secs);
        let mut last_error = None;

        for attempt in 1..=self.config.send_retries {
            match tokio::time::timeout(attempt_timeout, handle.send_message(to, content)).await {
                Err(_) => {
                    warn!(tenant = %tenant, attempt, "send attempt timed out");
                    return Err(CharlaError::Timeout {
                        duration: attempt_timeout,
                    });
                }
                Ok(Ok(message_id)) => {
                    if automated {
                        self.tags
                            .insert(tenant.0, &message_id.0, self.config.tag_capacity);
                    }
                    debug!(
                        tenant = %tenant,
                        message_id = %message_id.0,
                        automated,
                        attempt,
                        "message sent"
                    );
                    return Ok(message_id);
                }
                Ok(Err(e)) if e.is_retryable_send() => {
                    warn!(tenant = %tenant, attempt, error = %e, "transient send failure");
                    last_error = Some(e);
                    if attempt < self.config.send_retries {
                        let backoff =
                            Duration::from_millis(self.config.send_backoff_ms * u64::from(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
                Ok(Err(e)) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| CharlaError::Internal("send retries exhausted".to_string())))
    }

    fn qr_expired(&self, qr: &QrArtifact) -> bool {
        let validity = TimeDelta::seconds(self.config.qr_validity_secs as i64);
        Utc::now() - qr.issued_at > validity
    }

    fn current_qr(&self, entry: &Arc<TenantSession>) -> Option<String> {
        let inner = entry.lock_inner();
        inner
            .qr
            .as_ref()
            .filter(|qr| !self.qr_expired(qr))
            .map(|qr| qr.payload.clone())
    }

    /// Force-clean when persisted artifacts disagree with reality:
    /// a record claiming a live session without local artifacts (or the
    /// reverse), or artifacts older than the staleness window.
    async fn reconcile_persisted(
        &self,
        tenant: i64,
        entry: &Arc<TenantSession>,
    ) -> Result<(), CharlaError> {
        let record = self.storage.get_session_record(tenant).await?;
        let session_dir = self.session_dir(tenant);
        let artifacts_exist = tokio::fs::try_exists(&session_dir).await.unwrap_or(false);

        let Some(record) = record else {
            if artifacts_exist {
                debug!(tenant, "orphaned session artifacts found, cleaning");
                self.teardown(tenant, entry, true, None).await;
            }
            return Ok(());
        };

        let stale = match DateTime::parse_from_rfc3339(&record.updated_at) {
            Ok(updated_at) => {
                let age = Utc::now().signed_duration_since(updated_at);
                age > TimeDelta::seconds(self.config.staleness_secs as i64)
            }
            // An unparseable timestamp is treated as stale.
            Err(_) => true,
        };

        let claims_live = matches!(
            record.state.as_str(),
            "awaiting_scan" | "authenticated" | "ready"
        );
        let inconsistent = (claims_live && !artifacts_exist) || (!claims_live && artifacts_exist);

        if stale || inconsistent {
            debug!(
                tenant,
                stale, inconsistent, "persisted session state needs cleanup before connect"
            );
            self.teardown(tenant, entry, true, None).await;
        }

        Ok(())
    }

    /// Tear down the entry's runtime state. With `forced`, also kill
    /// scoped child processes and remove the session directory, then wait
    /// the settle interval.
    async fn teardown(
        &self,
        tenant: i64,
        entry: &Arc<TenantSession>,
        forced: bool,
        error_message: Option<&str>,
    ) {
        let (handle, pump) = {
            let mut inner = entry.lock_inner();
            inner.qr = None;
            inner.phone = None;
            inner.auth_failure = None;
            (inner.handle.take(), inner.pump.take())
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.destroy().await {
                warn!(tenant, error = %e, "transport destroy failed");
            }
        }

        self.tags.clear_tenant(tenant);
        self.last_inbound.clear_tenant(tenant);

        let final_state = if error_message.is_some() {
            SessionState::Error
        } else {
            SessionState::Disconnected
        };
        entry.state_tx.send_replace(final_state);

        if forced {
            let dir = self.session_dir(tenant);
            cleanup::kill_session_processes(&dir).await;
            cleanup::remove_session_dir(&dir).await;
        }

        if let Err(e) = self
            .storage
            .upsert_session_record(tenant, &final_state.to_string(), None, error_message)
            .await
        {
            warn!(tenant, error = %e, "failed to persist session teardown");
        }

        let _ = self.changes.send(ChangeEvent::SessionStatus {
            tenant: TenantId(tenant),
            state: final_state,
        });

        if forced {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }
    }

    /// Teardown plus removal from the registry.
    async fn destroy_entry(
        &self,
        tenant: i64,
        entry: &Arc<TenantSession>,
        forced: bool,
        error_message: Option<&str>,
    ) {
        self.teardown(tenant, entry, forced, error_message).await;
        self.registry
            .remove_if(&tenant, |_, value| Arc::ptr_eq(value, entry));
    }

    /// Backdate the cached QR artifact. Test hook for expiry derivation.
    #[cfg(test)]
    fn backdate_qr(&self, tenant: i64, by: TimeDelta) {
        if let Some(entry) = self.registry.get(&tenant) {
            let mut inner = entry.lock_inner();
            if let Some(qr) = inner.qr.as_mut() {
                qr.issued_at -= by;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use charla_config::model::StorageConfig;
    use charla_core::types::{now_iso, AdapterType, HealthStatus, Tenant, TenantStatus, TransportEvent};
    use charla_core::{PluginAdapter, SendRejectReason};
    use charla_storage::SqliteStorage;
    use std::path::Path;
    use tempfile::tempdir;

    /// Scripted transport: each opened session immediately replays the
    /// script, then idles until destroyed.
    struct ScriptedTransport {
        script: Vec<TransportEvent>,
        opened: AtomicUsize,
        sent: Arc<StdMutex<Vec<(String, String)>>>,
        send_results: Arc<StdMutex<VecDeque<Result<MessageId, CharlaError>>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<TransportEvent>) -> Self {
            Self {
                script,
                opened: AtomicUsize::new(0),
                sent: Arc::new(StdMutex::new(Vec::new())),
                send_results: Arc::new(StdMutex::new(VecDeque::new())),
            }
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        fn push_send_result(&self, result: Result<MessageId, CharlaError>) {
            self.send_results.lock().unwrap().push_back(result);
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    struct ScriptedSession {
        events: tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>,
        // Held so receive() blocks instead of erroring once the script is
        // drained.
        _events_tx: mpsc::Sender<TransportEvent>,
        sent: Arc<StdMutex<Vec<(String, String)>>>,
        send_results: Arc<StdMutex<VecDeque<Result<MessageId, CharlaError>>>>,
    }

    #[async_trait]
    impl PluginAdapter for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
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
    impl TransportAdapter for ScriptedTransport {
        async fn open_session(
            &self,
            _tenant: TenantId,
            _session_dir: &Path,
        ) -> Result<Box<dyn TransportSession>, CharlaError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(64);
            for event in &self.script {
                let _ = tx.try_send(event.clone());
            }
            Ok(Box::new(ScriptedSession {
                events: tokio::sync::Mutex::new(rx),
                _events_tx: tx,
                sent: Arc::clone(&self.sent),
                send_results: Arc::clone(&self.send_results),
            }))
        }
    }

    #[async_trait]
    impl TransportSession for ScriptedSession {
        async fn connect(&self) -> Result<(), CharlaError> {
            Ok(())
        }
        async fn destroy(&self) -> Result<(), CharlaError> {
            Ok(())
        }
        async fn send_message(&self, to: &str, content: &str) -> Result<MessageId, CharlaError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), content.to_string()));
            let scripted = self.send_results.lock().unwrap().pop_front();
            match scripted {
                Some(result) => result,
                None => Ok(MessageId(format!("sent-{}", uuid::Uuid::new_v4()))),
            }
        }
        async fn receive(&self) -> Result<TransportEvent, CharlaError> {
            let mut rx = self.events.lock().await;
            rx.recv().await.ok_or_else(|| CharlaError::Transport {
                message: "event stream closed".to_string(),
                source: None,
            })
        }
    }

    async fn setup(
        script: Vec<TransportEvent>,
    ) -> (
        Arc<SessionManager>,
        Arc<ScriptedTransport>,
        i64,
        mpsc::Receiver<InboundEnvelope>,
        tempfile::TempDir,
    ) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("sessions.db");
        let storage = SqliteStorage::new(StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        });
        storage.initialize().await.unwrap();
        let storage: Arc<dyn StorageAdapter + Send + Sync> = Arc::new(storage);

        let tenant = Tenant {
            id: 0,
            code: "t1".into(),
            name: "Tenant One".into(),
            status: TenantStatus::Active,
            message_limit: 100,
            message_usage: 0,
            token_limit: 10_000,
            token_usage: 0,
            usage_reset_at: now_iso(),
            system_prompt: None,
            work_start_hour: 0,
            work_end_hour: 24,
            work_days: String::new(),
            created_at: now_iso(),
        };
        let tenant_id = storage.create_tenant(&tenant).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new(script));
        let config = SessionConfig {
            data_dir: dir.path().join("sessions").to_string_lossy().to_string(),
            connect_timeout_secs: 5,
            send_timeout_secs: 2,
            send_retries: 3,
            send_backoff_ms: 10,
            qr_validity_secs: 300,
            staleness_secs: 3600,
            settle_ms: 10,
            tag_capacity: 8,
        };
        let (ingest_tx, ingest_rx) = mpsc::channel(64);
        let (changes, _) = broadcast::channel(64);
        let transport_adapter: Arc<dyn TransportAdapter + Send + Sync> = transport.clone();
        let manager = Arc::new(SessionManager::new(
            storage,
            transport_adapter,
            config,
            ingest_tx,
            changes,
        ));
        (manager, transport, tenant_id, ingest_rx, dir)
    }

    fn ready_script() -> Vec<TransportEvent> {
        vec![TransportEvent::Ready {
            phone: "5511999990000".into(),
        }]
    }

    #[tokio::test]
    async fn connect_reaches_ready() {
        let (manager, transport, tenant_id, _rx, _dir) = setup(ready_script()).await;

        let outcome = manager.connect(TenantId(tenant_id)).await.unwrap();
        assert_eq!(outcome.state, ConnectState::Connected);
        assert!(!outcome.reused);
        assert_eq!(transport.opened(), 1);

        let status = manager.status(TenantId(tenant_id)).await.unwrap();
        assert_eq!(status.state, ReportedState::Ready);
        assert_eq!(status.phone.as_deref(), Some("5511999990000"));
    }

    #[tokio::test]
    async fn connect_on_ready_session_reuses_without_new_handle() {
        let (manager, transport, tenant_id, _rx, _dir) = setup(ready_script()).await;

        manager.connect(TenantId(tenant_id)).await.unwrap();
        let second = manager.connect(TenantId(tenant_id)).await.unwrap();

        assert!(second.reused);
        assert_eq!(second.state, ConnectState::Connected);
        assert_eq!(transport.opened(), 1, "no second handle may be created");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connects_yield_exactly_one_handle() {
        let (manager, transport, tenant_id, _rx, _dir) = setup(ready_script()).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.connect(TenantId(tenant_id)).await.unwrap()
            }));
        }

        let mut fresh = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.state, ConnectState::Connected);
            if !outcome.reused {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1, "exactly one connect may do the work");
        assert_eq!(transport.opened(), 1);
        assert_eq!(manager.live_sessions(), 1);
    }

    #[tokio::test]
    async fn connect_with_qr_script_reports_initializing() {
        let (manager, _transport, tenant_id, _rx, _dir) = setup(vec![TransportEvent::Qr {
            payload: "qr-payload-1".into(),
        }])
        .await;

        let outcome = manager.connect(TenantId(tenant_id)).await.unwrap();
        assert_eq!(outcome.state, ConnectState::Initializing);
        assert_eq!(outcome.qr.as_deref(), Some("qr-payload-1"));

        let status = manager.status(TenantId(tenant_id)).await.unwrap();
        assert_eq!(status.state, ReportedState::AwaitingScan);
        assert!(status.qr_available);
        assert_eq!(manager.qr(TenantId(tenant_id)).as_deref(), Some("qr-payload-1"));
    }

    #[tokio::test]
    async fn connect_while_awaiting_scan_is_a_conflict() {
        let (manager, _transport, tenant_id, _rx, _dir) = setup(vec![TransportEvent::Qr {
            payload: "qr-payload-1".into(),
        }])
        .await;

        manager.connect(TenantId(tenant_id)).await.unwrap();
        let err = manager.connect(TenantId(tenant_id)).await.unwrap_err();
        assert!(matches!(err, CharlaError::Conflict { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn expired_qr_reports_synthetic_state() {
        let (manager, _transport, tenant_id, _rx, _dir) = setup(vec![TransportEvent::Qr {
            payload: "qr-payload-1".into(),
        }])
        .await;

        manager.connect(TenantId(tenant_id)).await.unwrap();
        // Validity window is 300s; a 6-minute-old QR is expired.
        manager.backdate_qr(tenant_id, TimeDelta::seconds(360));

        let status = manager.status(TenantId(tenant_id)).await.unwrap();
        assert_eq!(status.state, ReportedState::QrExpired);
        assert!(!status.qr_available);
        assert!(manager.qr(TenantId(tenant_id)).is_none());
    }

    #[tokio::test]
    async fn auth_failure_surfaces_as_typed_error() {
        let (manager, _transport, tenant_id, _rx, _dir) =
            setup(vec![TransportEvent::AuthFailure {
                reason: "credential rejected".into(),
            }])
            .await;

        let err = manager.connect(TenantId(tenant_id)).await.unwrap_err();
        assert!(
            matches!(err, CharlaError::AuthenticationFailed { .. }),
            "got {err:?}"
        );
        assert_eq!(manager.live_sessions(), 0, "failed session must not linger");
    }

    #[tokio::test]
    async fn send_requires_ready_state() {
        let (manager, _transport, tenant_id, _rx, _dir) = setup(ready_script()).await;

        let err = manager
            .send(TenantId(tenant_id), "contact-1", "hi", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CharlaError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn send_retries_transient_failures() {
        let (manager, transport, tenant_id, _rx, _dir) = setup(ready_script()).await;
        manager.connect(TenantId(tenant_id)).await.unwrap();

        transport.push_send_result(Err(CharlaError::TransientSend {
            message: "socket reset".into(),
        }));
        transport.push_send_result(Ok(MessageId("sent-ok".into())));

        let id = manager
            .send(TenantId(tenant_id), "contact-1", "hi", false)
            .await
            .unwrap();
        assert_eq!(id.0, "sent-ok");
        assert_eq!(transport.sent_count(), 2, "one retry expected");
    }

    #[tokio::test]
    async fn terminal_send_failures_do_not_retry() {
        let (manager, transport, tenant_id, _rx, _dir) = setup(ready_script()).await;
        manager.connect(TenantId(tenant_id)).await.unwrap();

        transport.push_send_result(Err(CharlaError::TerminalSend {
            reason: SendRejectReason::RateLimited,
        }));

        let err = manager
            .send(TenantId(tenant_id), "contact-1", "hi", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CharlaError::TerminalSend { .. }));
        assert_eq!(transport.sent_count(), 1, "terminal failures are final");
    }

    #[tokio::test]
    async fn automated_sends_are_tagged() {
        let (manager, _transport, tenant_id, _rx, _dir) = setup(ready_script()).await;
        manager.connect(TenantId(tenant_id)).await.unwrap();

        let id = manager
            .send(TenantId(tenant_id), "contact-1", "auto reply", true)
            .await
            .unwrap();

        assert!(manager.automated_tags().contains(tenant_id, &id.0));

        let manual = manager
            .send(TenantId(tenant_id), "contact-1", "manual", false)
            .await
            .unwrap();
        assert!(!manager.automated_tags().contains(tenant_id, &manual.0));
    }

    #[tokio::test]
    async fn disconnect_removes_entry_and_persists_state() {
        let (manager, _transport, tenant_id, _rx, _dir) = setup(ready_script()).await;
        manager.connect(TenantId(tenant_id)).await.unwrap();
        manager.automated_tags().insert(tenant_id, "tagged", 8);

        manager.disconnect(TenantId(tenant_id)).await.unwrap();

        assert_eq!(manager.live_sessions(), 0);
        assert!(!manager.automated_tags().contains(tenant_id, "tagged"));

        let status = manager.status(TenantId(tenant_id)).await.unwrap();
        assert_eq!(status.state, ReportedState::Disconnected);

        let err = manager
            .send(TenantId(tenant_id), "contact-1", "hi", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CharlaError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn force_cleanup_is_idempotent_and_scrubs_disk() {
        let (manager, _transport, tenant_id, _rx, _dir) = setup(ready_script()).await;
        manager.connect(TenantId(tenant_id)).await.unwrap();

        let session_dir = manager.session_dir(tenant_id);
        tokio::fs::write(session_dir.join("creds.json"), b"{}")
            .await
            .unwrap();

        manager.force_cleanup(TenantId(tenant_id)).await.unwrap();
        assert!(!session_dir.exists());
        assert_eq!(manager.live_sessions(), 0);

        // Second cleanup with nothing left must still succeed.
        manager.force_cleanup(TenantId(tenant_id)).await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_after_disconnect_builds_fresh_handle() {
        let (manager, transport, tenant_id, _rx, _dir) = setup(ready_script()).await;

        manager.connect(TenantId(tenant_id)).await.unwrap();
        manager.disconnect(TenantId(tenant_id)).await.unwrap();
        let outcome = manager.connect(TenantId(tenant_id)).await.unwrap();

        assert!(!outcome.reused);
        assert_eq!(transport.opened(), 2);
    }

    #[tokio::test]
    async fn inconsistent_artifacts_are_cleaned_before_connect() {
        let (manager, transport, tenant_id, _rx, _dir) = setup(ready_script()).await;

        // Leftover artifacts with no persisted record: connect must scrub
        // them before opening the new handle.
        let session_dir = manager.session_dir(tenant_id);
        tokio::fs::create_dir_all(&session_dir).await.unwrap();
        let leftover = session_dir.join("stale-creds.json");
        tokio::fs::write(&leftover, b"{}").await.unwrap();

        let outcome = manager.connect(TenantId(tenant_id)).await.unwrap();
        assert_eq!(outcome.state, ConnectState::Connected);
        assert_eq!(transport.opened(), 1);
        assert!(
            !leftover.exists(),
            "stale artifacts must be removed by the pre-connect cleanup"
        );
    }

    #[tokio::test]
    async fn message_events_are_forwarded_to_ingest() {
        use charla_core::types::{MessageEvent, MessageKind};

        let script = vec![
            TransportEvent::Ready {
                phone: "5511999990000".into(),
            },
            TransportEvent::Message(MessageEvent {
                id: "ext-1".into(),
                chat: "contact-1".into(),
                sender: "contact-1".into(),
                from_me: false,
                body: "hello".into(),
                kind: MessageKind::Text,
                timestamp: Utc::now(),
            }),
        ];
        let (manager, _transport, tenant_id, mut rx, _dir) = setup(script).await;

        manager.connect(TenantId(tenant_id)).await.unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("message event should be forwarded")
            .expect("channel open");
        assert_eq!(envelope.tenant.0, tenant_id);
        assert_eq!(envelope.event.id, "ext-1");
    }
}
