use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Detection server exited before the tunnel was opened")]
    ServerExited,
    #[error("ngrok API request failed: {0}")]
    Api(#[from] reqwest::Error),
    #[error("ngrok API returned {status}: {body}")]
    ApiStatus { status: u16, body: String },
    #[error("ngrok agent did not answer within {0:?}")]
    StartupTimeout(Duration),
}
