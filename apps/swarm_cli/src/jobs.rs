use crate::{emit, reject, Workspace};
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use swarm_model::{
    AssignmentRow, ErrorKind, Failure, JobId, JobRow, RunRow, Submission, SubmitterId,
};

#[derive(Args)]
pub struct SubmitCmd {
    #[arg(long)]
    pub submitter: SubmitterId,
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value_t = 1)]
    pub max_attempts: i64,
    /// Repeat once per run; paired by position with --run-url
    #[arg(long = "run-name")]
    pub run_names: Vec<String>,
    #[arg(long = "run-url")]
    pub run_urls: Vec<String>,
    #[arg(long = "group")]
    pub groups: Vec<String>,
}

#[derive(Args)]
pub struct ReapCmd {
    #[arg(long)]
    pub submitter: SubmitterId,
}

#[derive(Args)]
pub struct StatusCmd {
    #[arg(long)]
    pub job: Option<JobId>,
}

#[derive(Serialize)]
struct JobStatus {
    job: JobRow,
    runs: Vec<RunRow>,
    assignments: Vec<AssignmentRow>,
}

pub fn submit(workspace: &Workspace, cmd: SubmitCmd) -> Result<()> {
    let submission = Submission {
        submitter_id: cmd.submitter,
        job_name: cmd.name,
        max_attempts: cmd.max_attempts,
        run_names: cmd.run_names,
        run_urls: cmd.run_urls,
        groups: cmd.groups,
    };
    let mut engine = workspace.engine()?;
    let receipt = engine
        .submit(&submission, Utc::now())
        .map_err(|err| reject(err.to_failure()))?;
    emit(&receipt)
}

pub fn reap(workspace: &Workspace, cmd: ReapCmd) -> Result<()> {
    let mut engine = workspace.engine()?;
    let report = engine
        .reap(cmd.submitter)
        .map_err(|err| reject(internal(err)))?;
    emit(&report)
}

pub fn status(workspace: &Workspace, cmd: StatusCmd) -> Result<()> {
    let store = workspace.open_store()?;
    let Some(job_id) = cmd.job else {
        return emit(&store.counts().map_err(|err| reject(internal(err)))?);
    };

    let lookup = || -> Result<Option<JobStatus>, swarm_engine::StoreError> {
        let Some(job) = store.job(job_id)? else {
            return Ok(None);
        };
        Ok(Some(JobStatus {
            job,
            runs: store.runs_for_job(job_id)?,
            assignments: store.assignments_for_job(job_id)?,
        }))
    };
    match lookup().map_err(|err| reject(internal(err)))? {
        Some(status) => emit(&status),
        None => Err(reject(Failure {
            kind: ErrorKind::InvalidInput,
            message: format!("no job with id {job_id}"),
        })),
    }
}

fn internal(err: impl std::fmt::Display) -> Failure {
    Failure {
        kind: ErrorKind::InternalError,
        message: err.to_string(),
    }
}
