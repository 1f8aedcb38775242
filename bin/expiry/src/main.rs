//! BlinkShare Expiry Scanner — reports role purchases that are about to lapse.
//!
//! Flow:
//! 1. Connect to PostgreSQL and apply migrations
//! 2. Every scan interval, list purchases in the expiring window
//! 3. Log one line per purchase for the notifier to pick up
//!
//! Scan failures are logged and retried on the next tick.

use blinkshare_core::{Settings, telemetry};
use blinkshare_storage::{self as storage, Database, models::ExpiringPurchase};
use chrono::Utc;
use eyre::Result;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Initialisation ──────────────────────────────────────────────────
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(
        interval_secs = settings.expiry_scan_interval_secs,
        "Starting BlinkShare Expiry Scanner"
    );

    let db = storage::initialize(&settings).await?;

    sqlx::migrate!("../../migrations").run(db.pool()).await?;
    tracing::info!("Database migrations applied");

    // ── Scan Loop ───────────────────────────────────────────────────────
    let period = Duration::from_secs(settings.expiry_scan_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down gracefully…");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = scan(&db).await {
                    tracing::error!(error = %e, "Expiry scan failed, retrying next tick");
                }
            }
        }
    }

    tracing::info!("Expiry scanner stopped.");
    Ok(())
}

/// Run one scan and log every expiring purchase. Returns how many were found.
async fn scan(db: &Database) -> Result<usize> {
    let now = Utc::now();
    let purchases = storage::repos::list_expiring_purchases_at(db.pool(), now).await?;

    for purchase in &purchases {
        report(purchase);
    }

    tracing::info!(count = purchases.len(), at = %now, "Expiry scan complete");
    Ok(purchases.len())
}

fn report(purchase: &ExpiringPurchase) {
    tracing::info!(
        purchase_id = purchase.purchase.id,
        discord_user_id = %purchase.purchase.discord_user_id,
        guild_id = %purchase.guild.id,
        role_id = %purchase.role.id,
        expires_at = %purchase.purchase.expires_at,
        "Role purchase expiring"
    );
}
