// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the Charla collaborator boundaries.
//!
//! All adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod completion;
pub mod storage;
pub mod transport;

// Re-export all traits at the traits module level for convenience.
pub use adapter::PluginAdapter;
pub use completion::{Completion, CompletionAdapter, CompletionTurn};
pub use storage::StorageAdapter;
pub use transport::{TransportAdapter, TransportSession};
