//! Multi-endpoint reachability report for a relay namespace.
//!
//! Fans [`probe`] out over the well-known relay ports (plus any extras) for
//! every resolved address of the namespace host and of each numbered gateway
//! instance, then renders one line per probe in submission order.

use std::net::IpAddr;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use super::{probe, ProbeResult, ProbeTarget, WELL_KNOWN_PORTS};
use crate::namespace::NamespaceResolver;

/// Aggregate outcome of one probe run.
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    /// The host or namespace name the run was asked to check.
    pub target: String,
    /// Per-probe outcomes, in submission order.
    pub results: Vec<ProbeResult>,
    /// Set when the initial resolution failed and nothing could be probed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_error: Option<String>,
}

impl ProbeReport {
    /// Number of probes that connected.
    pub fn reachable(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded).count()
    }

    /// Render the human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push('\n');
        out.push_str("  Relay Network Probe\n");
        out.push_str("  ===================\n");
        out.push_str(&format!("  Target: {}\n\n", self.target));

        if let Some(ref err) = self.resolution_error {
            out.push_str(&format!("  Resolution failed: {}\n\n", err));
            return out;
        }

        out.push_str(&format!(
            "  {:<52} {:<6} {:>10}\n",
            "Endpoint", "Result", "Latency"
        ));
        out.push_str(&format!("  {}\n", "-".repeat(72)));

        for r in &self.results {
            let verdict = if r.succeeded { "OK" } else { "FAIL" };
            out.push_str(&format!(
                "  {:<52} {:<6} {:>7.1} ms",
                r.target.to_string(),
                verdict,
                r.elapsed_ms
            ));
            if let Some(ref failure) = r.failure {
                out.push_str(&format!("   -> {}", failure));
            }
            out.push('\n');
        }

        out.push_str(&format!(
            "\n  Summary: {}/{} endpoints reachable\n",
            self.reachable(),
            self.results.len()
        ));
        out
    }
}

/// Merge the well-known port list with caller-supplied extras, preserving
/// order and dropping duplicates.
fn merge_ports(extra_ports: &[u16]) -> Vec<u16> {
    let mut ports: Vec<u16> = WELL_KNOWN_PORTS.to_vec();
    for p in extra_ports {
        if !ports.contains(p) {
            ports.push(*p);
        }
    }
    ports
}

/// Expand `(host, addresses)` pairs into the full probe set.
///
/// Order is host block, then address, then port -- the rendered report
/// preserves this order regardless of probe completion order.
fn build_targets(hosts: &[(String, Vec<IpAddr>)], ports: &[u16]) -> Vec<ProbeTarget> {
    let mut targets = Vec::new();
    for (host, addresses) in hosts {
        for address in addresses {
            for port in ports {
                targets.push(ProbeTarget {
                    host: host.clone(),
                    address: *address,
                    port: *port,
                });
            }
        }
    }
    targets
}

/// Probe every well-known (and extra) port on every resolved address of
/// `target` and of gateway instances `0..gateway_instances`.
///
/// Resolution failure of the namespace host aborts the whole report -- there
/// is nothing to probe against. A gateway instance that fails to resolve is
/// logged and skipped; it does not affect the rest of the set. All probes run
/// concurrently and the total wall time is bounded by the slowest single
/// probe, not the sum.
pub async fn run_probe_report(
    resolver: &NamespaceResolver,
    target: &str,
    extra_ports: &[u16],
    gateway_instances: u32,
    timeout: Duration,
) -> ProbeReport {
    let details = match resolver.resolve(target).await {
        Ok(d) => d,
        Err(e) => {
            return ProbeReport {
                target: target.to_string(),
                results: Vec::new(),
                resolution_error: Some(format!("{:#}", e)),
            };
        }
    };

    if details.addresses.is_empty() {
        return ProbeReport {
            target: target.to_string(),
            results: Vec::new(),
            resolution_error: Some(format!("no addresses resolved for '{}'", target)),
        };
    }

    let mut hosts: Vec<(String, Vec<IpAddr>)> = vec![(
        details.service_namespace.clone(),
        details.addresses.clone(),
    )];

    if !details.gateway_dns_format.is_empty() {
        for index in 0..gateway_instances {
            let gateway = details.gateway_host(index);
            match resolver.lookup_addresses(&gateway).await {
                Ok(addresses) if !addresses.is_empty() => hosts.push((gateway, addresses)),
                Ok(_) => warn!(gateway = %gateway, "gateway resolved to no addresses, skipping"),
                Err(e) => warn!(gateway = %gateway, error = %e, "gateway resolution failed, skipping"),
            }
        }
    }

    let ports = merge_ports(extra_ports);
    let targets = build_targets(&hosts, &ports);

    tracing::info!(
        namespace = %target,
        probes = targets.len(),
        timeout_ms = timeout.as_millis() as u64,
        "launching probe set"
    );

    // join_all preserves submission order in its output.
    let results = join_all(targets.into_iter().map(|t| probe(t, timeout))).await;

    ProbeReport {
        target: target.to_string(),
        results,
        resolution_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_ports_dedups_and_preserves_order() {
        let ports = merge_ports(&[8080, 443, 9350, 8081]);
        assert_eq!(ports, vec![443, 5671, 9350, 9351, 9352, 9353, 9354, 8080, 8081]);
    }

    #[test]
    fn test_merge_ports_empty_extras() {
        assert_eq!(merge_ports(&[]), WELL_KNOWN_PORTS.to_vec());
    }

    #[test]
    fn test_build_targets_count_and_order() {
        let hosts = vec![
            (
                "ns.example.net".to_string(),
                vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()],
            ),
            ("g0.example.net".to_string(), vec!["10.0.1.1".parse().unwrap()]),
        ];
        let ports = vec![443, 5671];

        let targets = build_targets(&hosts, &ports);

        // |ports| x |addresses| summed over hosts.
        assert_eq!(targets.len(), 2 * 2 + 1 * 2);

        // Host block order, then address, then port.
        assert_eq!(targets[0].to_string(), "ns.example.net (10.0.0.1):443");
        assert_eq!(targets[1].to_string(), "ns.example.net (10.0.0.1):5671");
        assert_eq!(targets[2].to_string(), "ns.example.net (10.0.0.2):443");
        assert_eq!(targets[5].to_string(), "g0.example.net (10.0.1.1):5671");
    }

    #[test]
    fn test_render_resolution_error() {
        let report = ProbeReport {
            target: "nope.invalid".into(),
            results: Vec::new(),
            resolution_error: Some("no such host".into()),
        };
        let rendered = report.render();
        assert!(rendered.contains("Resolution failed: no such host"));
        assert!(!rendered.contains("Summary"));
    }

    #[test]
    fn test_render_counts_reachable() {
        let target = ProbeTarget {
            host: "ns.example.net".into(),
            address: "10.0.0.1".parse().unwrap(),
            port: 443,
        };
        let report = ProbeReport {
            target: "ns.example.net".into(),
            results: vec![
                ProbeResult {
                    target: target.clone(),
                    succeeded: true,
                    elapsed_ms: 12.5,
                    failure: None,
                },
                ProbeResult {
                    target,
                    succeeded: false,
                    elapsed_ms: 5000.0,
                    failure: Some(super::super::ProbeFailure::Timeout),
                },
            ],
            resolution_error: None,
        };
        let rendered = report.render();
        assert!(rendered.contains("Summary: 1/2 endpoints reachable"));
        assert!(rendered.contains("-> connect timed out"));
    }
}
