use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};

pub mod mailer;

/// Starts the background job that clears expired email-verification tokens.
///
/// Runs daily; an unverified account whose token lapsed keeps its row (the
/// user can re-register or ask for a new token) but the stale token itself
/// is removed.
pub async fn schedule_maintenance(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let sched = JobScheduler::new().await?;

    // Daily at 03:10 server time
    let job = Job::new_async("0 10 3 * * *", move |_uuid, _l| {
        let pool = pool.clone();
        Box::pin(async move {
            match purge_expired_verification_tokens(&pool).await {
                Ok(0) => {}
                Ok(cleared) => log::info!("cleared {} expired verification tokens", cleared),
                Err(e) => log::error!("verification token cleanup failed: {}", e),
            }
        })
    })?;

    sched.add(job).await?;

    tokio::spawn(async move {
        if let Err(e) = sched.start().await {
            log::error!("Scheduler error: {}", e);
        }
    });

    log::info!("Maintenance scheduler started");
    Ok(())
}

async fn purge_expired_verification_tokens(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users
         SET verification_token = NULL,
             verification_token_expires = NULL
         WHERE is_verified = FALSE
           AND verification_token IS NOT NULL
           AND verification_token_expires < now()",
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
