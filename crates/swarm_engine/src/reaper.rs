use crate::artifacts::{ArtifactSweeper, Removal};
use crate::error::StoreError;
use crate::registry::TargetRegistry;
use crate::store::{ReapedJob, SwarmStore};
use swarm_model::{JobId, ReapReport, SubmitterId};
use tracing::{info, instrument, warn};

/// Enforces the retention window for one submitter.
///
/// The newest fully-successful job is always kept; when there is none, the
/// job passed as `just_created` (or else the submitter's newest job) is kept
/// instead. Database rows go first, in one transaction; artifact directories
/// are removed only after that transaction has committed, and a directory
/// that cannot be removed is logged and skipped.
#[instrument(skip(store, registry), fields(submitter = submitter_id))]
pub fn reap<R: TargetRegistry + ?Sized>(
    store: &mut SwarmStore,
    registry: &R,
    submitter_id: SubmitterId,
    just_created: Option<JobId>,
) -> Result<ReapReport, StoreError> {
    let sweeper = registry.artifact_root().map(ArtifactSweeper::new);
    reap_with(
        store,
        registry.retention_window(),
        sweeper.as_ref(),
        submitter_id,
        just_created,
    )
}

fn reap_with(
    store: &mut SwarmStore,
    window: usize,
    sweeper: Option<&ArtifactSweeper>,
    submitter_id: SubmitterId,
    just_created: Option<JobId>,
) -> Result<ReapReport, StoreError> {
    let keep = match store.most_recent_success_job(submitter_id)? {
        Some(job_id) => job_id,
        None => match just_created {
            Some(job_id) => job_id,
            None => match store.newest_job(submitter_id)? {
                Some(job_id) => job_id,
                None => return Ok(ReapReport::default()),
            },
        },
    };

    let Some(cutoff) = store.job_at_depth(submitter_id, window.max(1) - 1)? else {
        return Ok(ReapReport::default());
    };

    let reaped = store.delete_jobs_before(submitter_id, cutoff, keep)?;
    let mut report = ReapReport {
        deleted_job_count: reaped.len(),
        ..ReapReport::default()
    };
    if reaped.is_empty() {
        return Ok(report);
    }
    info!(
        target: "swarm::reaper",
        "deleted {} job(s) older than job {} (kept job {})",
        reaped.len(),
        cutoff,
        keep
    );

    if let Some(sweeper) = sweeper {
        remove_artifacts(sweeper, submitter_id, &reaped, &mut report);
    }
    Ok(report)
}

fn remove_artifacts(
    sweeper: &ArtifactSweeper,
    submitter_id: SubmitterId,
    reaped: &[ReapedJob],
    report: &mut ReapReport,
) {
    for job in reaped {
        match sweeper.remove_job_dir(submitter_id, job.id) {
            Ok(Removal::Removed) => report.artifact_dirs_removed += 1,
            Ok(Removal::Missing) => {}
            Err(err) => {
                warn!(
                    target: "swarm::reaper",
                    "job={} ({}) artifacts not removed: {err}",
                    job.id,
                    job.name
                );
                report.artifact_dirs_skipped += 1;
            }
        }
    }
}
