// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock adapters and test harness for the Charla engine.
//!
//! Everything here is CI-runnable: no external transport, no network, temp
//! SQLite databases only.

pub mod harness;
pub mod mock_completion;
pub mod mock_transport;

pub use harness::{wait_until, TestHarness, TestHarnessBuilder};
pub use mock_completion::{CompletionCall, MockCompletion};
pub use mock_transport::{MockTransport, SentMessage};
