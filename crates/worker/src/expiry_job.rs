//! Subscription Expiry Job
//!
//! Downgrades users whose paid period has lapsed. Runs on a cron schedule
//! and once at start-up so a restart never leaves a backlog.

use innerai_billing::{ExpirySummary, SubscriptionExpiry};
use time::OffsetDateTime;
use tracing::{error, info};

/// Hourly, on the hour
pub const DEFAULT_EXPIRY_CRON: &str = "0 0 * * * *";

/// Run one sweep; failures are logged, never propagated to the scheduler
pub async fn run_expiry_sweep(expiry: &SubscriptionExpiry) -> Option<ExpirySummary> {
    let started = OffsetDateTime::now_utc();
    match expiry.run(started).await {
        Ok(summary) => {
            let elapsed_ms = (OffsetDateTime::now_utc() - started).whole_milliseconds();
            if summary.found > 0 || summary.failed > 0 {
                info!(
                    found = summary.found,
                    expired = summary.expired,
                    failed = summary.failed,
                    elapsed_ms,
                    "Subscription expiry sweep finished"
                );
            }
            Some(summary)
        }
        Err(e) => {
            error!(error = %e, "Subscription expiry sweep failed");
            None
        }
    }
}
