//! Background job: prune notifications that have no recipients left.
//!
//! A `message_created` notification is stored even when the message has no
//! assignees; dismissals normally delete the last notification themselves.
//! This sweep picks up the empty ones. A short grace period keeps it off
//! notifications whose recipients are still being inserted.

use sqlx::PgPool;
use std::time::Duration;
use tokio::time;

/// Spawn the background prune task. Call this once at startup.
/// `every_secs == 0` disables it.
pub fn spawn(pool: PgPool, every_secs: u64) {
    if every_secs == 0 {
        tracing::info!("orphaned-notification prune job disabled");
        return;
    }
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(every_secs));
        loop {
            interval.tick().await;
            if let Err(e) = prune_orphaned_notifications(&pool).await {
                tracing::error!("prune job failed: {}", e);
            }
        }
    });
}

/// Delete notifications older than five minutes that have no recipients.
pub async fn prune_orphaned_notifications(pool: &PgPool) -> anyhow::Result<u64> {
    let deleted = sqlx::query(
        r#"
        DELETE FROM notifications n
        WHERE NOT EXISTS (
            SELECT 1 FROM notification_recipients r WHERE r.notification_id = n.id
        )
        AND n.created_at < NOW() - INTERVAL '5 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    if deleted.rows_affected() > 0 {
        tracing::info!(
            rows = deleted.rows_affected(),
            "pruned notifications without recipients"
        );
    }

    Ok(deleted.rows_affected())
}
