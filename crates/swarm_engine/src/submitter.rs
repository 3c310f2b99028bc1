use crate::error::SubmitError;
use crate::reaper;
use crate::registry::TargetRegistry;
use crate::store::{NewJob, SwarmStore};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use swarm_model::{
    RunSpec, SubmitReceipt, Submission, SubmitterId, TargetSet, MAX_ATTEMPTS, MAX_NAME_LEN,
    MIN_ATTEMPTS,
};
use tracing::{error, info, instrument, warn};

/// A submission that passed every check and is ready to be written.
#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub submitter_id: SubmitterId,
    pub job_name: String,
    pub max_attempts: i64,
    pub runs: Vec<RunSpec>,
    pub targets: TargetSet,
}

/// Checks a submission without touching storage.
pub fn validate<R: TargetRegistry + ?Sized>(
    submission: &Submission,
    registry: &R,
) -> Result<ValidatedSubmission, SubmitError> {
    if submission.job_name.is_empty()
        || submission.run_names.is_empty()
        || submission.run_urls.is_empty()
        || submission.groups.is_empty()
    {
        return Err(SubmitError::MissingParameters(
            "job name, runs and groups are required".into(),
        ));
    }

    if !(MIN_ATTEMPTS..=MAX_ATTEMPTS).contains(&submission.max_attempts) {
        return Err(SubmitError::InvalidInput(format!(
            "max attempts must be a number between {MIN_ATTEMPTS} and {MAX_ATTEMPTS}"
        )));
    }

    let runs = collect_runs(&submission.run_names, &submission.run_urls)?;

    if submission.job_name.chars().count() > MAX_NAME_LEN {
        return Err(SubmitError::InvalidInput(format!(
            "job name too long (up to {MAX_NAME_LEN} characters)"
        )));
    }

    let targets = resolve_groups(&submission.groups, registry)?;

    Ok(ValidatedSubmission {
        submitter_id: submission.submitter_id,
        job_name: submission.job_name.clone(),
        max_attempts: submission.max_attempts,
        runs,
        targets,
    })
}

fn collect_runs(names: &[String], urls: &[String]) -> Result<Vec<RunSpec>, SubmitError> {
    let mut runs = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let Some(url) = urls.get(idx) else {
            return Err(SubmitError::InvalidInput(
                "one or more runs is missing a URL".into(),
            ));
        };
        // Blank rows from a form with more fields than runs.
        if name.is_empty() && url.is_empty() {
            continue;
        }
        if name.is_empty() || url.is_empty() {
            return Err(SubmitError::InvalidInput(
                "run names and urls must be non-empty".into(),
            ));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(SubmitError::InvalidInput(format!(
                "run #{} name was too long (up to {MAX_NAME_LEN} characters)",
                idx + 1
            )));
        }
        runs.push(RunSpec::new(name.as_str(), url.as_str()));
    }

    if runs.is_empty() {
        return Err(SubmitError::MissingParameters(
            "job must have at least 1 run".into(),
        ));
    }
    Ok(runs)
}

fn resolve_groups<R: TargetRegistry + ?Sized>(
    groups: &[String],
    registry: &R,
) -> Result<TargetSet, SubmitError> {
    let mut seen = HashSet::with_capacity(groups.len());
    if !groups.iter().all(|group| seen.insert(group.as_str())) {
        return Err(SubmitError::InvalidInput(
            "duplicate entries in groups".into(),
        ));
    }

    let mut targets = TargetSet::new();
    for group in groups {
        let Some(members) = registry.resolve(group) else {
            return Err(SubmitError::InvalidInput(format!("unknown group: {group}")));
        };
        targets.extend_from(members);
    }

    if targets.is_empty() {
        return Err(SubmitError::DataCorrupt(
            "no targets matched the requested groups".into(),
        ));
    }
    Ok(targets)
}

/// Validates a submission, writes its Job/Run/Assignment graph atomically and
/// then enforces the submitter's retention window.
///
/// A retention failure is logged; it never fails a committed submission.
#[instrument(
    skip(store, registry, submission, now),
    fields(submitter = submission.submitter_id, job = %submission.job_name)
)]
pub fn submit<R: TargetRegistry + ?Sized>(
    store: &mut SwarmStore,
    registry: &R,
    submission: &Submission,
    now: DateTime<Utc>,
) -> Result<SubmitReceipt, SubmitError> {
    let plan = validate(submission, registry)?;

    let job_id = store
        .insert_job_graph(
            NewJob {
                submitter_id: plan.submitter_id,
                name: &plan.job_name,
                max_attempts: plan.max_attempts,
                runs: &plan.runs,
                targets: &plan.targets,
            },
            now,
        )
        .map_err(|err| {
            error!(target: "swarm::submitter", "insertion of job into database failed: {err}");
            SubmitError::Internal(err)
        })?;

    let receipt = SubmitReceipt {
        job_id,
        run_count: plan.runs.len(),
        target_count: plan.targets.len(),
    };
    info!(
        target: "swarm::submitter",
        "created job {} with {} run(s) across {} target(s)",
        job_id,
        receipt.run_count,
        receipt.target_count
    );

    if let Err(err) = reaper::reap(store, registry, plan.submitter_id, Some(job_id)) {
        warn!(target: "swarm::submitter", "retention sweep after job {} failed: {err}", job_id);
    }

    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwarmConfig;

    fn registry() -> SwarmConfig {
        SwarmConfig::default()
            .with_group("stable", ["5", "7"])
            .with_group("nightly", ["7", "9"])
            .with_group("empty", Vec::<String>::new())
    }

    fn base() -> Submission {
        Submission::new(1, "Smoke Test", 3)
            .run("Unit", "http://x/unit")
            .group("stable")
    }

    #[test]
    fn accepts_minimal_submission() {
        let plan = validate(&base(), &registry()).expect("valid");
        assert_eq!(plan.runs.len(), 1);
        assert_eq!(plan.targets.len(), 2);
    }

    #[test]
    fn missing_parameters() {
        let reg = registry();
        let mut no_name = base();
        no_name.job_name.clear();
        let mut no_runs = base();
        no_runs.run_names.clear();
        no_runs.run_urls.clear();
        let mut no_groups = base();
        no_groups.groups.clear();

        for submission in [no_name, no_runs, no_groups] {
            let err = validate(&submission, &reg).expect_err("must fail");
            assert!(matches!(err, SubmitError::MissingParameters(_)), "{err}");
        }
    }

    #[test]
    fn max_attempts_bounds() {
        let reg = registry();
        for attempts in [0, 100, -1] {
            let mut submission = base();
            submission.max_attempts = attempts;
            let err = validate(&submission, &reg).expect_err("out of range");
            assert!(matches!(err, SubmitError::InvalidInput(_)));
        }
        for attempts in [1, 99] {
            let mut submission = base();
            submission.max_attempts = attempts;
            assert!(validate(&submission, &reg).is_ok());
        }
    }

    #[test]
    fn blank_rows_are_dropped() {
        let submission = base().run("", "").run("Integration", "http://x/it");
        let plan = validate(&submission, &registry()).expect("valid");
        let names: Vec<_> = plan.runs.iter().map(|run| run.name.as_str()).collect();
        assert_eq!(names, vec!["Unit", "Integration"]);
    }

    #[test]
    fn only_blank_rows_is_missing_parameters() {
        let submission = Submission::new(1, "Job", 1).run("", "").group("stable");
        let err = validate(&submission, &registry()).expect_err("no runs");
        assert!(matches!(err, SubmitError::MissingParameters(_)));
    }

    #[test]
    fn half_filled_run_is_invalid() {
        for (name, url) in [("Unit", ""), ("", "http://x/unit")] {
            let submission = base().run(name, url);
            let err = validate(&submission, &registry()).expect_err("half row");
            assert!(matches!(err, SubmitError::InvalidInput(_)));
        }
    }

    #[test]
    fn run_without_url_slot_is_invalid() {
        let mut submission = base();
        submission.run_names.push("Orphan".into());
        let err = validate(&submission, &registry()).expect_err("missing url");
        assert!(err.to_string().contains("missing a URL"));
    }

    #[test]
    fn long_run_name_names_the_run() {
        let submission = base().run("x".repeat(256), "http://x/long");
        let err = validate(&submission, &registry()).expect_err("too long");
        assert!(err.to_string().contains("run #2"), "{err}");

        let at_limit = base().run("x".repeat(255), "http://x/ok");
        assert!(validate(&at_limit, &registry()).is_ok());
    }

    #[test]
    fn long_job_name_aborts() {
        let mut submission = base();
        submission.job_name = "j".repeat(256);
        let err = validate(&submission, &registry()).expect_err("too long");
        assert!(matches!(err, SubmitError::InvalidInput(_)));
    }

    #[test]
    fn duplicate_groups_rejected_even_when_unknown() {
        for groups in [["stable", "stable"], ["nope", "nope"]] {
            let mut submission = base();
            submission.groups = groups.iter().map(|g| g.to_string()).collect();
            let err = validate(&submission, &registry()).expect_err("duplicate");
            assert!(err.to_string().contains("duplicate"), "{err}");
        }
    }

    #[test]
    fn unknown_group_is_invalid_input() {
        let submission = base().group("beta");
        let err = validate(&submission, &registry()).expect_err("unknown");
        assert!(matches!(err, SubmitError::InvalidInput(ref msg) if msg.contains("beta")));
    }

    #[test]
    fn overlapping_groups_are_unioned() {
        let submission = base().group("nightly");
        let plan = validate(&submission, &registry()).expect("valid");
        let targets: Vec<_> = plan.targets.iter().cloned().collect();
        assert_eq!(targets, vec!["5", "7", "9"]);
    }

    #[test]
    fn empty_resolution_is_data_corrupt() {
        let mut submission = base();
        submission.groups = vec!["empty".into()];
        let err = validate(&submission, &registry()).expect_err("empty");
        assert!(matches!(err, SubmitError::DataCorrupt(_)));
        assert_eq!(err.kind(), swarm_model::ErrorKind::DataCorrupt);
    }
}
