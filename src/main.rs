//! Escrow engine maintenance entry point
//!
//! ```text
//! escrow_engine [--env dev] [--report] [--sweep] [--query <tx-id>]
//! ```
//!
//! - `--report` (default): table sizes and authorizations awaiting capture
//! - `--sweep`: retire expired phone verification codes
//! - `--query`: ask the gateway for the live status of a transaction's payment

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{error, info};

use escrow_engine::config::AppConfig;
use escrow_engine::core_types::EscrowId;
use escrow_engine::logging::init_logging;
use escrow_engine::notify::StoreNotifier;
use escrow_engine::payment::{HttpGateway, PaymentCoordinator};
use escrow_engine::store::RecordStore;
use escrow_engine::users::StoreUserDirectory;

// ============================================================
// ARGUMENTS
// ============================================================

fn arg_value(args: &[String], names: &[&str]) -> Option<String> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

// ============================================================
// COMMANDS
// ============================================================

fn report(store: &RecordStore, payments: &PaymentCoordinator) -> Result<()> {
    println!("=== Store: {} ===", store.path().display());
    println!("Schema version: {}", store.schema_version()?);
    for table in store.tables()? {
        println!("  {:<24} {:>6} rows  ({} columns)", table.name, table.rows, table.columns.len());
    }

    let pending = payments.pending_captures()?;
    println!("\nAuthorizations awaiting capture: {}", pending.len());
    for auth in &pending {
        let expired = auth.is_expired_at(chrono::Utc::now());
        println!(
            "  tx {:<6} {:>12.2}  payment {}{}",
            auth.transaction_id,
            auth.amount,
            auth.gateway_payment_id,
            if expired { "  (expired)" } else { "" }
        );
    }
    println!("Captured payments: {}", payments.captured()?.len());
    Ok(())
}

fn sweep(users: &StoreUserDirectory) -> Result<()> {
    let retired = users.sweep_expired()?;
    info!(retired, "Expired verification codes swept");
    println!("Retired {retired} expired verification code(s)");
    Ok(())
}

async fn query(payments: &PaymentCoordinator, raw_id: &str) -> Result<()> {
    let tx_id: EscrowId = raw_id
        .parse()
        .with_context(|| format!("invalid transaction id {raw_id:?}"))?;
    let state = payments.query(tx_id).await?;
    println!(
        "tx {tx_id}: payment {} status {} ({}) trx {}",
        state.payment_id,
        state.transaction_status,
        state.status_message,
        if state.trx_id.is_empty() { "-" } else { state.trx_id.as_str() }
    );
    Ok(())
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = arg_value(&args, &["--env", "-e"]).unwrap_or_else(|| "dev".to_string());

    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);
    info!("Starting escrow engine in {} mode", env);

    let store = Arc::new(
        RecordStore::open(&app_config.store)
            .with_context(|| format!("opening store {}", app_config.store.path.display()))?,
    );
    let users = Arc::new(StoreUserDirectory::new(
        store.clone(),
        chrono::Duration::seconds(app_config.verification.code_ttl_secs),
    ));
    let notifier = Arc::new(StoreNotifier::new(store.clone()));
    let gateway = Arc::new(HttpGateway::new(app_config.gateway.clone())?);
    let payments = PaymentCoordinator::new(
        store.clone(),
        gateway,
        notifier,
        users.clone(),
        &app_config.escrow,
    );

    let mut ran = false;
    if has_flag(&args, "--sweep") {
        sweep(&users)?;
        ran = true;
    }
    if has_flag(&args, "--query") {
        let Some(raw_id) = arg_value(&args, &["--query"]) else {
            bail!("--query needs a transaction id");
        };
        if let Err(e) = query(&payments, &raw_id).await {
            error!(error = %e, "Payment query failed");
            return Err(e);
        }
        ran = true;
    }
    if has_flag(&args, "--report") || !ran {
        report(&store, &payments)?;
    }

    Ok(())
}
