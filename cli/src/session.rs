use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::discovery::{discover, AgentEndpoint, PROBE_TIMEOUT};
use crate::error::{AgentError, Result};
use crate::http_client::{decode_json, Client};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub host: String,
    pub ports: Vec<u16>,
    pub probe_timeout: Duration,
    pub request_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn new(host: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            host: host.into(),
            ports,
            probe_timeout: PROBE_TIMEOUT,
            request_timeout: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentToken {
    authorization: String,
}

/// Authentication state for one command invocation.
///
/// The authorized [`Client`] is only handed out by [`Session::authenticated`],
/// so nothing can talk to the agent API before a token exists.
#[derive(Debug)]
pub struct Session {
    settings: SessionSettings,
    endpoint: Option<AgentEndpoint>,
    client: Option<Client>,
}

impl Session {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            endpoint: None,
            client: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_some()
    }

    pub fn endpoint(&self) -> Option<&AgentEndpoint> {
        self.endpoint.as_ref()
    }

    /// Discovers the agent and fetches a token on first use; later calls are free.
    pub async fn authenticated(&mut self) -> Result<&Client> {
        let client = match self.client.take() {
            Some(client) => client,
            None => self.login().await?,
        };
        Ok(self.client.insert(client))
    }

    async fn login(&mut self) -> Result<Client> {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let endpoint = discover(
                    &self.settings.host,
                    &self.settings.ports,
                    self.settings.probe_timeout,
                )
                .await?;
                self.endpoint = Some(endpoint.clone());
                endpoint
            }
        };

        info!("Authenticating...");
        let client = Client::new(&endpoint, self.settings.request_timeout)?;
        let (status, bytes) = client.send(Method::GET, "/agent", None).await?;
        if status != StatusCode::OK {
            return Err(AgentError::Auth {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let token: AgentToken = serde_json::from_value(decode_json("/agent", &bytes)?)
            .map_err(|source| AgentError::Decode {
                path: "/agent".to_string(),
                source,
            })?;
        info!(%endpoint, "authenticated with agent");
        client.with_authorization(&token.authorization)
    }
}
