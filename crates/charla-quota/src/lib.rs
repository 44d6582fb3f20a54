// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quota enforcement for the Charla engine.
//!
//! Monthly message-count and token-count ceilings per tenant, combined with
//! AND semantics, consumed through a single atomic conditional update.

pub mod ledger;

pub use ledger::{ConsumeOutcome, DimensionUsage, QuotaLedger, QuotaSnapshot};
