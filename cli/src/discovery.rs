//! Locating the agent's control port.
//!
//! The agent listens on its default port unless something else holds it, in
//! which case it falls back to a short, fixed run of alternates. We probe the
//! candidates in order and take the first one that accepts a connection.

use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::http_client::default_headers;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1120;
pub const ALTERNATE_PORT: u16 = 6881;
pub const LAST_FALLBACK_PORT: u16 = 6883;
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub host: String,
    pub port: u16,
}

impl AgentEndpoint {
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for AgentEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Ordered candidate ports: default, alternate, then `alternate+1..=upper`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSequence {
    pub default: u16,
    pub alternate: u16,
    pub upper: u16,
}

impl Default for PortSequence {
    fn default() -> Self {
        Self {
            default: DEFAULT_PORT,
            alternate: ALTERNATE_PORT,
            upper: LAST_FALLBACK_PORT,
        }
    }
}

impl PortSequence {
    pub fn ports(&self) -> Vec<u16> {
        let mut ports = vec![self.default, self.alternate];
        if let Some(start) = self.alternate.checked_add(1) {
            ports.extend(start..=self.upper);
        }
        ports
    }
}

/// Probes `candidates` in order and returns the first reachable endpoint.
///
/// Any HTTP response counts as reachable; only connection failures (and
/// probe timeouts) move the scan forward. The scan never revisits a port.
pub async fn discover(host: &str, candidates: &[u16], probe_timeout: Duration) -> Result<AgentEndpoint> {
    let probe = reqwest::Client::builder()
        .default_headers(default_headers())
        .timeout(probe_timeout)
        .build()?;

    for &port in candidates {
        let endpoint = AgentEndpoint {
            host: host.to_string(),
            port,
        };
        let url = format!("{}/", endpoint.base_url());
        match probe.get(&url).send().await {
            Ok(res) => {
                debug!(%endpoint, status = %res.status(), "agent reachable");
                return Ok(endpoint);
            }
            Err(e) => {
                debug!(%endpoint, error = %e, "agent not reachable, trying next port");
            }
        }
    }

    Err(AgentError::Discovery {
        host: host.to_string(),
        ports: candidates.to_vec(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;

    /// A localhost port with nothing listening on it.
    pub(crate) fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        port
    }

    #[test]
    fn default_sequence_is_bounded_and_ordered() {
        assert_eq!(PortSequence::default().ports(), vec![1120, 6881, 6882, 6883]);
    }

    #[test]
    fn sequence_without_range_is_just_default_and_alternate() {
        let seq = PortSequence {
            default: 1120,
            alternate: 7000,
            upper: 6000,
        };
        assert_eq!(seq.ports(), vec![1120, 7000]);
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let endpoint = AgentEndpoint {
            host: "::1".to_string(),
            port: 1120,
        };
        assert_eq!(endpoint.base_url(), "http://[::1]:1120");
        let endpoint = AgentEndpoint {
            host: "127.0.0.1".to_string(),
            port: 6881,
        };
        assert_eq!(endpoint.base_url(), "http://127.0.0.1:6881");
    }

    #[tokio::test]
    async fn picks_first_reachable_port_in_order() {
        let server = MockServer::start_async().await;
        let root = server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(404);
            })
            .await;

        let dead = closed_port();
        let endpoint = discover("127.0.0.1", &[dead, server.port()], PROBE_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(endpoint.port, server.port());
        root.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn silent_port_times_out_and_scan_moves_on() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200);
            })
            .await;

        // Accepts connections at the kernel level but never answers.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let silent_port = silent.local_addr().expect("addr").port();

        let started = std::time::Instant::now();
        let endpoint = discover("127.0.0.1", &[silent_port, server.port()], PROBE_TIMEOUT)
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert_eq!(endpoint.port, server.port());
        assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
        drop(silent);
    }

    #[tokio::test]
    async fn gives_up_after_last_candidate() {
        let ports = vec![closed_port(), closed_port(), closed_port()];
        let err = discover("127.0.0.1", &ports, PROBE_TIMEOUT).await.unwrap_err();
        match err {
            AgentError::Discovery { ports: tried, .. } => assert_eq!(tried, ports),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_candidate_list_fails_immediately() {
        let err = discover("127.0.0.1", &[], PROBE_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, AgentError::Discovery { .. }));
        assert!(err.to_string().contains("not running"));
    }
}
