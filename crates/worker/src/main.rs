//! Auditora Background Worker
//!
//! Handles scheduled jobs including:
//! - Lapsed subscription sweep (daily at 00:05 UTC by default)
//! - Billing invariant checks (hourly by default)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use auditora_billing::{db, BillingService, InvariantCheckSummary, SweepReport};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// At 00:05 UTC, once the previous day's windows have closed
const DEFAULT_EXPIRY_SWEEP_CRON: &str = "0 5 0 * * *";
const DEFAULT_INVARIANT_CHECK_CRON: &str = "0 30 * * * *";
const HEARTBEAT_CRON: &str = "0 */5 * * * *";

/// Cron expression from the environment, falling back to `default`
fn cron_from_env(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn log_sweep_report(report: &SweepReport) {
    if report.failures > 0 {
        warn!(
            owners = report.owners,
            organizations_blocked = report.organizations_blocked,
            auditors_blocked = report.auditors_blocked,
            skipped = report.skipped,
            failures = report.failures,
            "Lapsed subscription sweep finished with failures"
        );
    } else {
        info!(
            owners = report.owners,
            organizations_blocked = report.organizations_blocked,
            auditors_blocked = report.auditors_blocked,
            skipped = report.skipped,
            "Lapsed subscription sweep complete"
        );
    }
}

fn log_invariant_summary(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(
            checks_run = summary.checks_run,
            "Billing invariants hold"
        );
        return;
    }

    for violation in &summary.violations {
        error!(
            invariant = %violation.invariant,
            severity = %violation.severity,
            owner_ids = ?violation.owner_ids,
            context = %violation.context,
            "{}",
            violation.description
        );
    }
    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        violations = summary.violations.len(),
        "Billing invariant check found violations"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Auditora Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = db::create_pool(&database_url, 5).await?;
    info!("Database pool created");

    let billing = Arc::new(BillingService::from_env(pool)?);

    let sweep_cron = cron_from_env("EXPIRY_SWEEP_CRON", DEFAULT_EXPIRY_SWEEP_CRON);
    let invariant_cron = cron_from_env("INVARIANT_CHECK_CRON", DEFAULT_INVARIANT_CHECK_CRON);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Block resources of subscriptions whose window has ended
    let sweep_billing = billing.clone();
    scheduler
        .add(Job::new_async(sweep_cron.as_str(), move |_uuid, _l| {
            let billing = sweep_billing.clone();
            Box::pin(async move {
                let today = OffsetDateTime::now_utc().date();
                info!(today = %today, "Running lapsed subscription sweep");
                match billing.access.sweep_lapsed(today).await {
                    Ok(report) => log_sweep_report(&report),
                    Err(e) => error!(error = %e, "Lapsed subscription sweep failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %sweep_cron, "Scheduled: Lapsed subscription sweep");

    // Job 2: Read-only consistency checks
    let invariant_billing = billing.clone();
    scheduler
        .add(Job::new_async(invariant_cron.as_str(), move |_uuid, _l| {
            let billing = invariant_billing.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                match billing.invariants.run_all_checks().await {
                    Ok(summary) => log_invariant_summary(&summary),
                    Err(e) => error!(error = %e, "Billing invariant checks failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %invariant_cron, "Scheduled: Billing invariant checks");

    // Job 3: Health check heartbeat
    scheduler
        .add(Job::new_async(HEARTBEAT_CRON, |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Auditora Worker started successfully with 3 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
