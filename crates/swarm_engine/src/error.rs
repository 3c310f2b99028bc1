use swarm_model::{ErrorKind, Failure};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown {entity} id {id}")]
    UnknownId { entity: &'static str, id: i64 },
    #[error("{0}")]
    Conflict(&'static str),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("missing parameters: {0}")]
    MissingParameters(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("data corrupt: {0}")]
    DataCorrupt(String),
    #[error("internal error: {0}")]
    Internal(#[from] StoreError),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::MissingParameters(_) => ErrorKind::MissingParameters,
            SubmitError::InvalidInput(_) => ErrorKind::InvalidInput,
            SubmitError::DataCorrupt(_) => ErrorKind::DataCorrupt,
            SubmitError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn to_failure(&self) -> Failure {
        let message = match self {
            SubmitError::MissingParameters(msg)
            | SubmitError::InvalidInput(msg)
            | SubmitError::DataCorrupt(msg) => msg.clone(),
            SubmitError::Internal(_) => "insertion of job into database failed".into(),
        };
        Failure {
            kind: self.kind(),
            message,
        }
    }
}

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("watchdog may only be triggered from a local origin")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(#[from] StoreError),
}

impl WatchdogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WatchdogError::Unauthorized => ErrorKind::Unauthorized,
            WatchdogError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("bad {field} name: {value:?}")]
    BadName { field: &'static str, value: String },
    #[error("refusing to remove artifacts with elevated privileges")]
    Elevated,
    #[error("{0} escapes the artifact root")]
    OutsideRoot(String),
    #[error("{0} is a symlink")]
    Symlink(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
