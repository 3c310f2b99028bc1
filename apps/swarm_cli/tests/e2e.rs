use anyhow::Result;
use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn workspace() -> Result<TempDir> {
    let temp = tempdir()?;
    let config = r#"
target_groups:
  stable: ["5", "7"]
  nightly: ["7", "9"]
client:
  heartbeat_interval_secs: 300
  heartbeat_margin_secs: 300
storage:
  retention_window: 5
"#;
    fs::write(temp.path().join("swarm.yaml"), config)?;
    Ok(temp)
}

fn swarm(dir: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("swarm")?;
    cmd.env("SWARM_CONFIG", dir.join("swarm.yaml"))
        .env("SWARM_DB", dir.join("swarm.db"))
        .env_remove("SWARM_LOG_FORMAT");
    Ok(cmd)
}

fn json_stdout(cmd: &mut Command) -> Result<Value> {
    let output = cmd.assert().success().get_output().stdout.clone();
    Ok(serde_json::from_slice(&output)?)
}

fn create_account(dir: &Path, name: &str) -> Result<i64> {
    let body = json_stdout(
        swarm(dir)?
            .arg("account")
            .args(["--name", name, "--password-hash", "x", "--token", "t"]),
    )?;
    Ok(body["submitter_id"].as_i64().expect("submitter id"))
}

#[test]
fn submit_fans_out_over_group() -> Result<()> {
    let temp = workspace()?;
    json_stdout(swarm(temp.path())?.arg("init"))?;
    let submitter = create_account(temp.path(), "alice")?;

    let receipt = json_stdout(swarm(temp.path())?.args([
        "submit",
        "--submitter",
        &submitter.to_string(),
        "--name",
        "Smoke Test",
        "--max-attempts",
        "3",
        "--run-name",
        "Unit",
        "--run-url",
        "http://x/unit",
        "--run-name",
        "Integration",
        "--run-url",
        "http://x/it",
        "--group",
        "stable",
    ]))?;
    assert_eq!(receipt["run_count"], 2);
    assert_eq!(receipt["target_count"], 2);
    let job_id = receipt["job_id"].as_i64().expect("job id");

    let status = json_stdout(
        swarm(temp.path())?.args(["status", "--job", &job_id.to_string()]),
    )?;
    assert_eq!(status["job"]["name"], "Smoke Test");
    assert_eq!(status["runs"].as_array().map(Vec::len), Some(2));
    assert_eq!(status["assignments"].as_array().map(Vec::len), Some(4));

    let counts = json_stdout(swarm(temp.path())?.arg("status"))?;
    assert_eq!(counts["assignments"], 4);
    Ok(())
}

#[test]
fn duplicate_groups_are_rejected() -> Result<()> {
    let temp = workspace()?;
    let submitter = create_account(temp.path(), "alice")?;

    swarm(temp.path())?
        .args([
            "submit",
            "--submitter",
            &submitter.to_string(),
            "--name",
            "Dup",
            "--run-name",
            "Unit",
            "--run-url",
            "http://x/unit",
            "--group",
            "stable",
            "--group",
            "stable",
        ])
        .assert()
        .failure()
        .stdout(contains("invalid-input"))
        .stdout(contains("duplicate"));

    let counts = json_stdout(swarm(temp.path())?.arg("status"))?;
    assert_eq!(counts["jobs"], 0);
    Ok(())
}

#[test]
fn missing_runs_report_missing_parameters() -> Result<()> {
    let temp = workspace()?;
    let submitter = create_account(temp.path(), "alice")?;

    swarm(temp.path())?
        .args([
            "submit",
            "--submitter",
            &submitter.to_string(),
            "--name",
            "Empty",
            "--group",
            "stable",
        ])
        .assert()
        .failure()
        .stdout(contains("missing-parameters"));
    Ok(())
}

#[test]
fn cleanup_on_quiet_database_recovers_nothing() -> Result<()> {
    let temp = workspace()?;
    create_account(temp.path(), "alice")?;

    let report = json_stdout(swarm(temp.path())?.arg("cleanup"))?;
    assert_eq!(report["recovered_count"], 0);
    let again = json_stdout(swarm(temp.path())?.arg("cleanup"))?;
    assert_eq!(again, report);
    Ok(())
}

#[test]
fn groups_and_reap_commands() -> Result<()> {
    let temp = workspace()?;
    let groups = json_stdout(swarm(temp.path())?.arg("groups"))?;
    assert_eq!(groups["nightly"], serde_json::json!(["7", "9"]));

    let submitter = create_account(temp.path(), "alice")?;
    let report = json_stdout(
        swarm(temp.path())?.args(["reap", "--submitter", &submitter.to_string()]),
    )?;
    assert_eq!(report["deleted_job_count"], 0);
    Ok(())
}

#[test]
fn unknown_job_status_fails() -> Result<()> {
    let temp = workspace()?;
    swarm(temp.path())?
        .args(["status", "--job", "42"])
        .assert()
        .failure()
        .stdout(contains("no job with id 42"));
    Ok(())
}
