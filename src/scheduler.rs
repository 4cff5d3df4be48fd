use crate::registry::VersionRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Initialize and start the garbage-collection scheduler.
///
/// `schedule` is a six-field cron expression (with seconds), e.g.
/// `0 */15 * * * *` for every fifteen minutes.
pub async fn start_scheduler(registry: Arc<VersionRegistry>, schedule: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    info!("Scheduling version garbage collection (cron: {})", schedule);
    let job = Job::new_async(schedule, move |_uuid, _l| {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            run_gc_job(&registry).await;
        })
    })
    .with_context(|| format!("Invalid GC_SCHEDULE cron expression: {}", schedule))?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}

/// Run one sweep. Failures are logged; the next tick retries.
pub async fn run_gc_job(registry: &VersionRegistry) {
    match registry.collect_garbage().await {
        Ok(report) if report.versions_collected > 0 => info!(
            "⏰ Garbage collection removed {} versions ({} blobs)",
            report.versions_collected, report.blobs_deleted
        ),
        Ok(_) => {}
        Err(e) => error!("Garbage collection failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobStore, MemoryBlobStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_invalid_cron_rejected() {
        let registry = Arc::new(VersionRegistry::new(Arc::new(MemoryBlobStore::new()), Duration::ZERO));
        let Err(err) = start_scheduler(registry, "every now and then").await else { panic!("expected invalid cron to be rejected") };
        assert!(err.to_string().contains("GC_SCHEDULE"));
    }

    #[tokio::test]
    async fn test_gc_job_sweeps_abandoned_versions() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = VersionRegistry::new(blobs.clone(), Duration::ZERO);
        let id = registry.begin_publish("main");
        blobs.store(&format!("{}/manifest.json", id), b"{}").await.unwrap();
        registry.cancel_publish(id).await.unwrap();

        run_gc_job(&registry).await;

        assert!(registry.get(id).await.is_none());
        assert!(blobs.is_empty());
    }
}
