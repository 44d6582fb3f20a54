// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport adapter traits for the external messaging protocol.
//!
//! The transport itself is a black box: it pairs via QR scan, emits typed
//! [`TransportEvent`]s, and accepts sends. One [`TransportSession`] exists
//! per tenant and is owned exclusively by the session manager.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CharlaError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{MessageId, TenantId, TransportEvent};

/// A live session binding one tenant to the external messaging transport.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Starts the connection handshake. Events follow via [`receive`].
    ///
    /// [`receive`]: TransportSession::receive
    async fn connect(&self) -> Result<(), CharlaError>;

    /// Tears the session down. Idempotent; errors are reported but the
    /// session must be considered dead afterwards either way.
    async fn destroy(&self) -> Result<(), CharlaError>;

    /// Sends a message and returns the transport-assigned identifier.
    async fn send_message(&self, to: &str, content: &str) -> Result<MessageId, CharlaError>;

    /// Receives the next event from the transport.
    ///
    /// Returns an error once the session is closed and no further events
    /// will be delivered.
    async fn receive(&self) -> Result<TransportEvent, CharlaError>;
}

/// Factory for per-tenant transport sessions.
#[async_trait]
pub trait TransportAdapter: PluginAdapter {
    /// Opens a new session for `tenant`, persisting its credential
    /// artifacts under `session_dir`.
    async fn open_session(
        &self,
        tenant: TenantId,
        session_dir: &Path,
    ) -> Result<Box<dyn TransportSession>, CharlaError>;
}
