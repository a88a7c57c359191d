//! Job Poller
//!
//! Waits for an appliance job by repeatedly checking
//! [`StorageProvider::is_job_done`], bounded only by the caller's context.

use crate::context::RequestContext;
use crate::domain::ports::StorageProvider;
use crate::error::Result;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;
use tracing::debug;

/// Interval between job status checks
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            multiplier: 1.5,
        }
    }
}

/// Wait until `job_id` completes.
///
/// A failed job surfaces as [`crate::Error::JobFailed`]; an expired or
/// cancelled context as `DeadlineExceeded` / `Cancelled`.
pub async fn wait_for_job<P>(
    provider: &P,
    ctx: &RequestContext,
    job_id: &str,
    policy: &PollPolicy,
) -> Result<()>
where
    P: StorageProvider + ?Sized,
{
    let mut interval = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
        .with_multiplier(policy.multiplier)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build();

    let mut checks = 0u32;
    loop {
        checks += 1;
        if provider.is_job_done(ctx, job_id).await? {
            debug!("job {} done after {} checks", job_id, checks);
            return Ok(());
        }

        let delay = interval.next_backoff().unwrap_or(policy.max_interval);
        debug!("job {} still running, next check in {:?}", job_id, delay);
        ctx.run("Wait for job", tokio::time::sleep(delay)).await?;
    }
}
