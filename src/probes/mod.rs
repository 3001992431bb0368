//! TCP reachability probing for relay namespaces.
//!
//! A [`ProbeTarget`] names one `(host, address, port)` triple; [`probe`] dials
//! it with a timeout and captures the outcome into a [`ProbeResult`]. Probe
//! failures are data, not errors -- a probe never fails its caller.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpStream;

pub mod report;

pub use report::{run_probe_report, ProbeReport};

/// Ports a relay namespace is expected to listen on: HTTPS, AMQP, and the
/// relay gateway port range.
pub const WELL_KNOWN_PORTS: [u16; 7] = [443, 5671, 9350, 9351, 9352, 9353, 9354];

/// One `(host, address, port)` triple to dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeTarget {
    /// DNS name the address was resolved from.
    pub host: String,
    pub address: IpAddr,
    pub port: u16,
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}):{}", self.host, self.address, self.port)
    }
}

/// Why a probe did not connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProbeFailure {
    Timeout,
    Refused,
    Other(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "connect timed out"),
            ProbeFailure::Refused => write!(f, "connection refused"),
            ProbeFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Outcome of a single probe. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub target: ProbeTarget,
    pub succeeded: bool,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
}

/// Dial `target` with a connect timeout and report the outcome.
///
/// Elapsed time is wall-clock from dial start to connect completion or
/// failure. The socket is dropped before returning; a probe leaves no
/// residue. All connection errors are captured into the result -- this
/// function does not return `Err`.
pub async fn probe(target: ProbeTarget, timeout: Duration) -> ProbeResult {
    let addr = SocketAddr::new(target.address, target.port);
    let start = Instant::now();

    let outcome = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(Ok(stream)) => {
            drop(stream);
            tracing::debug!(endpoint = %target, elapsed_ms, "probe succeeded");
            ProbeResult {
                target,
                succeeded: true,
                elapsed_ms,
                failure: None,
            }
        }
        Ok(Err(e)) => {
            let failure = match e.kind() {
                std::io::ErrorKind::ConnectionRefused => ProbeFailure::Refused,
                std::io::ErrorKind::TimedOut => ProbeFailure::Timeout,
                _ => ProbeFailure::Other(e.to_string()),
            };
            tracing::debug!(endpoint = %target, error = %failure, "probe failed");
            ProbeResult {
                target,
                succeeded: false,
                elapsed_ms,
                failure: Some(failure),
            }
        }
        Err(_) => {
            tracing::debug!(
                endpoint = %target,
                timeout_ms = timeout.as_millis() as u64,
                "probe timed out"
            );
            ProbeResult {
                target,
                succeeded: false,
                elapsed_ms,
                failure: Some(ProbeFailure::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16) -> ProbeTarget {
        ProbeTarget {
            host: "localhost".into(),
            address: "127.0.0.1".parse().unwrap(),
            port,
        }
    }

    #[test]
    fn test_target_display() {
        let t = target(9350);
        assert_eq!(t.to_string(), "localhost (127.0.0.1):9350");
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(ProbeFailure::Timeout.to_string(), "connect timed out");
        assert_eq!(ProbeFailure::Refused.to_string(), "connection refused");
        assert_eq!(ProbeFailure::Other("boom".into()).to_string(), "boom");
    }

    #[tokio::test]
    async fn test_probe_listening_port_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe(target(port), Duration::from_secs(5)).await;
        assert!(result.succeeded);
        assert!(result.failure.is_none());
        assert!(result.elapsed_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_probe_closed_port_fails_within_timeout() {
        // Bind to grab a free port, then drop the listener so nothing is
        // listening on it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let timeout = Duration::from_secs(5);
        let start = Instant::now();
        let result = probe(target(port), timeout).await;

        assert!(!result.succeeded);
        assert!(result.failure.is_some());
        // Must give up within the configured timeout plus scheduling slack.
        assert!(start.elapsed() < timeout + Duration::from_secs(1));
    }
}
