// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `status` subcommand: inspect a tenant's session and quota state.

use charla_config::model::CharlaConfig;
use charla_core::{CharlaError, StorageAdapter};
use charla_quota::QuotaLedger;
use charla_storage::SqliteStorage;

/// Print session and quota status for the tenant identified by `code`.
pub async fn run(config: CharlaConfig, code: &str) -> Result<(), CharlaError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;

    let Some(tenant) = storage.get_tenant_by_code(code).await? else {
        return Err(CharlaError::Internal(format!("no tenant with code `{code}`")));
    };

    println!("tenant:  {} ({})", tenant.name, tenant.code);
    println!("status:  {}", tenant.status);

    match storage.get_session_record(tenant.id).await? {
        Some(record) => {
            println!("session: {} (updated {})", record.state, record.updated_at);
            if let Some(phone) = record.phone {
                println!("phone:   {phone}");
            }
            if let Some(error) = record.last_error {
                println!("error:   {error}");
            }
        }
        None => println!("session: never connected"),
    }

    let quota = QuotaLedger::open(&config.storage.database_path).await?;
    let snapshot = quota.check_available(tenant.id).await?;
    println!(
        "messages: {}/{} ({}%)",
        snapshot.messages.usage, snapshot.messages.limit, snapshot.messages.percentage
    );
    println!(
        "tokens:   {}/{} ({}%)",
        snapshot.tokens.usage, snapshot.tokens.limit, snapshot.tokens.percentage
    );
    println!(
        "available: {}",
        if snapshot.available { "yes" } else { "no" }
    );

    storage.close().await?;
    Ok(())
}
