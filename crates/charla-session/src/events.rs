// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-tenant event pump driving the session state machine.
//!
//! One pump task per live session consumes typed [`TransportEvent`]s and
//! applies transitions. Errors inside the pump are logged and contained:
//! one tenant's event failure must never crash the manager for others.

use std::sync::Arc;

use charla_core::types::{ChangeEvent, InboundEnvelope, SessionState, TransportEvent};
use charla_core::{StorageAdapter, TenantId, TransportSession};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{QrArtifact, TenantSession};

/// Everything a pump task needs, captured at spawn time.
pub(crate) struct PumpContext {
    pub tenant: TenantId,
    pub session: Arc<TenantSession>,
    pub handle: Arc<dyn TransportSession>,
    pub storage: Arc<dyn StorageAdapter + Send + Sync>,
    pub ingest_tx: mpsc::Sender<InboundEnvelope>,
    pub changes: broadcast::Sender<ChangeEvent>,
}

/// Spawn the event pump for a freshly opened transport session.
pub(crate) fn spawn_pump(ctx: PumpContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match ctx.handle.receive().await {
                Ok(event) => apply_event(&ctx, event).await,
                Err(e) => {
                    debug!(
                        tenant = %ctx.tenant,
                        error = %e,
                        "transport event stream closed"
                    );
                    let state = *ctx.session.state_tx.borrow();
                    if !matches!(state, SessionState::Disconnected | SessionState::Error) {
                        transition(&ctx, SessionState::Disconnected, None).await;
                    }
                    break;
                }
            }
        }
    })
}

/// Apply one transport event. Never returns an error: failures are logged
/// so the pump keeps serving subsequent events.
async fn apply_event(ctx: &PumpContext, event: TransportEvent) {
    match event {
        TransportEvent::Qr { payload } => {
            {
                let mut inner = ctx.session.lock_inner();
                inner.qr = Some(QrArtifact::new(payload));
            }
            info!(tenant = %ctx.tenant, "QR credential issued");
            transition(ctx, SessionState::AwaitingScan, None).await;
        }
        TransportEvent::Authenticated => {
            info!(tenant = %ctx.tenant, "credential accepted, handshake pending");
            transition(ctx, SessionState::Authenticated, None).await;
        }
        TransportEvent::Ready { phone } => {
            {
                let mut inner = ctx.session.lock_inner();
                inner.phone = Some(phone.clone());
                inner.qr = None;
            }
            info!(tenant = %ctx.tenant, phone = %phone, "session ready");
            transition(ctx, SessionState::Ready, None).await;
        }
        TransportEvent::AuthFailure { reason } => {
            {
                let mut inner = ctx.session.lock_inner();
                inner.auth_failure = Some(reason.clone());
                inner.last_error = Some(reason.clone());
            }
            warn!(tenant = %ctx.tenant, reason = %reason, "authentication failed");
            transition(ctx, SessionState::Error, Some(reason)).await;
        }
        TransportEvent::Disconnected { reason } => {
            info!(tenant = %ctx.tenant, reason = %reason, "transport disconnected");
            transition(ctx, SessionState::Disconnected, None).await;
        }
        TransportEvent::Message(event) => {
            let envelope = InboundEnvelope {
                tenant: ctx.tenant,
                event,
            };
            if ctx.ingest_tx.send(envelope).await.is_err() {
                warn!(tenant = %ctx.tenant, "ingest channel closed, dropping message event");
            }
        }
    }
}

/// Publish a state change, persist it, and notify subscribers.
async fn transition(ctx: &PumpContext, state: SessionState, error: Option<String>) {
    ctx.session.state_tx.send_replace(state);

    let phone = ctx.session.lock_inner().phone.clone();
    if let Err(e) = ctx
        .storage
        .upsert_session_record(
            ctx.tenant.0,
            &state.to_string(),
            phone.as_deref(),
            error.as_deref(),
        )
        .await
    {
        warn!(tenant = %ctx.tenant, error = %e, "failed to persist session state");
    }

    let _ = ctx.changes.send(ChangeEvent::SessionStatus {
        tenant: ctx.tenant,
        state,
    });
}
