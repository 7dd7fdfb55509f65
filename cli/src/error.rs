use reqwest::{Method, StatusCode};
use thiserror::Error;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 1;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(
        "Battle.net Agent not running: no reachable port on {host} (tried {ports:?}). Start the Battle.net client and retry"
    )]
    Discovery { host: String, ports: Vec<u16> },

    #[error("agent refused authentication: status={status} body={body}")]
    Auth { status: StatusCode, body: String },

    #[error("{method} {path} failed: status={status} body={body}")]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{uid}' is not installed")]
    NotInstalled { uid: String },

    #[error("unable to determine an install directory for '{uid}' (use --game-dir or --prompt-dir)")]
    NoInstallTarget { uid: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Every failure that escapes a workflow is fatal for the command.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Discovery { .. }
            | Self::Auth { .. }
            | Self::Status { .. }
            | Self::Http(_)
            | Self::Decode { .. }
            | Self::NotInstalled { .. }
            | Self::NoInstallTarget { .. }
            | Self::Other(_) => EXIT_FATAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
