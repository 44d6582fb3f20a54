// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line protocol between the engine and a bridge child process.
//!
//! Commands flow engine -> bridge on stdin; events and send acks flow
//! bridge -> engine on stdout. One JSON document per line, tagged by
//! `type` (events/acks) or `op` (commands).

use charla_core::types::TransportEvent;
use charla_core::{CharlaError, MessageId, SendRejectReason};
use serde::{Deserialize, Serialize};

/// Commands written to the bridge's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Start the connection handshake.
    Connect,
    /// Tear down and exit.
    Destroy,
    /// Deliver a message; the bridge answers with a `send_ok`/`send_error`
    /// ack carrying the same `corr`.
    Send { corr: u64, to: String, content: String },
}

/// A send acknowledgement from the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendAckLine {
    SendOk {
        corr: u64,
        message_id: String,
    },
    SendError {
        corr: u64,
        reason: String,
        /// Terminal rejection class, absent for transient failures.
        #[serde(default)]
        reject: Option<SendRejectReason>,
    },
}

/// A send ack, normalized.
#[derive(Debug)]
pub struct SendAck {
    pub corr: u64,
    result: Result<MessageId, CharlaError>,
}

impl SendAck {
    pub fn into_result(self) -> Result<MessageId, CharlaError> {
        self.result
    }
}

impl From<SendAckLine> for SendAck {
    fn from(line: SendAckLine) -> Self {
        match line {
            SendAckLine::SendOk { corr, message_id } => Self {
                corr,
                result: Ok(MessageId(message_id)),
            },
            SendAckLine::SendError {
                corr,
                reason,
                reject,
            } => {
                let result = match reject {
                    Some(reject) => Err(CharlaError::TerminalSend { reason: reject }),
                    None => Err(CharlaError::TransientSend { message: reason }),
                };
                Self { corr, result }
            }
        }
    }
}

/// Result of parsing one stdout line.
#[derive(Debug)]
pub enum Parsed {
    Ack(SendAck),
    Event(TransportEvent),
    Unknown,
}

/// Parse one bridge stdout line: acks take precedence, then events.
pub fn parse_line(line: &str) -> Parsed {
    if let Ok(ack) = serde_json::from_str::<SendAckLine>(line) {
        return Parsed::Ack(ack.into());
    }
    if let Ok(event) = serde_json::from_str::<TransportEvent>(line) {
        return Parsed::Event(event);
    }
    Parsed::Unknown
}
