use crate::{emit, Workspace};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde_json::json;

#[derive(Args)]
pub struct AccountCmd {
    #[arg(long)]
    pub name: String,
    /// Leave both credentials empty to create an unregistered account
    #[arg(long, default_value = "")]
    pub password_hash: String,
    #[arg(long, default_value = "")]
    pub token: String,
}

pub fn run(workspace: &Workspace, cmd: AccountCmd) -> Result<()> {
    let mut store = workspace.open_store()?;
    let id = store
        .create_account(&cmd.name, &cmd.password_hash, &cmd.token, Utc::now())
        .with_context(|| format!("creating account '{}'", cmd.name))?;
    emit(&json!({ "submitter_id": id, "name": cmd.name }))
}
