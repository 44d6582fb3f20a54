// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Working-hours gate for automated replies.
//!
//! Tenants configure a daily hour window and a weekday set. Outside the
//! window, inbound messages are stored but not auto-answered.

use charla_core::types::Tenant;
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Whether automation may respond for this tenant at `now`.
///
/// The weekday set is a CSV of ISO weekday numbers (1 = Monday .. 7 =
/// Sunday); empty means every day. The hour window is `[start, end)` and
/// wraps midnight when `start > end`; equal bounds disable the hour gate.
pub fn within_working_hours(tenant: &Tenant, now: DateTime<Utc>) -> bool {
    if !tenant.work_days.trim().is_empty() {
        let today = now.weekday().number_from_monday();
        let allowed = tenant
            .work_days
            .split(',')
            .filter_map(|day| day.trim().parse::<u32>().ok())
            .any(|day| day == today);
        if !allowed {
            return false;
        }
    }

    let hour = now.hour();
    let start = u32::from(tenant.work_start_hour);
    let end = u32::from(tenant.work_end_hour);

    if start == end {
        return true;
    }
    if start < end {
        start <= hour && hour < end
    } else {
        // Overnight window, e.g. 22 -> 6.
        hour >= start || hour < end
    }
}
