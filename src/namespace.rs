//! Relay namespace topology resolution.
//!
//! Turns a namespace name or host into [`NamespaceDetails`]: the fully
//! qualified host name, its address list, the CNAME alias chain, the
//! deployment identifier derived from the canonical host name, and a DNS
//! template for the numbered gateway instances.

use std::collections::HashMap;
use std::net::IpAddr;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use trust_dns_resolver::proto::rr::RData;
use trust_dns_resolver::TokioAsyncResolver;

/// Suffix appended when the input carries no domain of its own.
pub const DEFAULT_SUFFIX: &str = "servicebus.windows.net";

/// Environment tokens stripped from the front of a canonical host label
/// before the remainder becomes the deployment identifier.
const ENV_PREFIX_TOKENS: [&str; 3] = ["ns", "sb2", "sb"];

/// Internal deployment-cluster identifiers: two or more hyphen-separated
/// alphanumeric tokens, e.g. `prod-by3-010`.
const CLUSTER_NAME_PATTERN: &str = r"^[A-Za-z0-9]+(-[A-Za-z0-9]+)+$";

/// Resolved topology of a relay namespace.
///
/// Empty fields mean "unknown", not "error": a bare deployment-cluster input
/// populates only `deployment`, and callers that hit DNS failures may carry
/// partially-empty details forward.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NamespaceDetails {
    /// Fully qualified namespace name, e.g. `contoso.servicebus.windows.net`.
    pub service_namespace: String,
    /// Canonical host name at the end of the CNAME chain.
    pub host_name: String,
    /// Domain suffix of the namespace name.
    pub suffix: String,
    /// Uppercased deployment identifier, e.g. `PROD-BY3-010`.
    pub deployment: String,
    pub addresses: Vec<IpAddr>,
    /// Gateway DNS template with a `{0}` slot for the instance index.
    pub gateway_dns_format: String,
    /// Intermediate names in the CNAME chain.
    pub aliases: Vec<String>,
}

impl NamespaceDetails {
    /// Substitute a gateway instance index into the DNS template.
    pub fn gateway_host(&self, index: u32) -> String {
        self.gateway_dns_format.replace("{0}", &index.to_string())
    }
}

/// DNS-backed resolver for namespace topology.
pub struct NamespaceResolver {
    resolver: TokioAsyncResolver,
    cluster_pattern: Regex,
}

impl NamespaceResolver {
    /// Build a resolver from the system DNS configuration
    /// (`/etc/resolv.conf` on Unix).
    pub fn from_system_conf() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .context("failed to create DNS resolver from system configuration")?;
        Ok(Self {
            resolver,
            cluster_pattern: Regex::new(CLUSTER_NAME_PATTERN)
                .context("invalid cluster name pattern")?,
        })
    }

    /// Resolve a namespace name, host name, or bare deployment-cluster
    /// identifier into [`NamespaceDetails`].
    ///
    /// A dotless input matching the cluster pattern is already a deployment
    /// identifier: no DNS is performed and only `deployment` is populated.
    /// Anything else goes through a host lookup; DNS failures propagate to
    /// the caller, which is expected to log and degrade rather than abort a
    /// whole diagnostic run.
    pub async fn resolve(&self, name_or_host: &str) -> Result<NamespaceDetails> {
        let name = name_or_host.trim();

        if !name.contains('.') && self.cluster_pattern.is_match(name) {
            tracing::debug!(input = %name, "input is a deployment cluster identifier");
            return Ok(NamespaceDetails {
                deployment: name.to_uppercase(),
                ..Default::default()
            });
        }

        let (namespace, suffix) = split_namespace(name);
        let service_namespace = format!("{}.{}", namespace, suffix);

        let lookup = self
            .resolver
            .lookup_ip(service_namespace.as_str())
            .await
            .with_context(|| format!("DNS lookup failed for '{}'", service_namespace))?;

        let addresses: Vec<IpAddr> = lookup.iter().collect();

        // Walk the CNAME chain to find the canonical host name; everything
        // between the query name and the canonical name is an alias.
        let mut cnames: HashMap<String, String> = HashMap::new();
        for record in lookup.as_lookup().record_iter() {
            if let Some(RData::CNAME(cname)) = record.data() {
                cnames.insert(
                    trim_trailing_dot(&record.name().to_utf8()),
                    trim_trailing_dot(&cname.0.to_utf8()),
                );
            }
        }

        let mut aliases = Vec::new();
        let mut current = service_namespace.clone();
        while let Some(next) = cnames.get(&current) {
            aliases.push(current.clone());
            current = next.clone();
            if aliases.len() > cnames.len() {
                break; // malformed chain, bail out
            }
        }
        let host_name = current;

        let deployment = derive_deployment(&host_name);
        let gateway_dns_format = gateway_format(&host_name);

        tracing::debug!(
            namespace = %service_namespace,
            host = %host_name,
            deployment = %deployment,
            addresses = addresses.len(),
            "namespace resolved"
        );

        Ok(NamespaceDetails {
            service_namespace,
            host_name,
            suffix,
            deployment,
            addresses,
            gateway_dns_format,
            aliases,
        })
    }

    /// Plain A/AAAA lookup, used for gateway instance names.
    pub async fn lookup_addresses(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .with_context(|| format!("DNS lookup failed for '{}'", host))?;
        Ok(lookup.iter().collect())
    }
}

/// Split an input on its first dot into namespace and suffix, defaulting the
/// suffix when absent.
fn split_namespace(name: &str) -> (String, String) {
    match name.split_once('.') {
        Some((namespace, suffix)) => (namespace.to_string(), suffix.to_string()),
        None => (name.to_string(), DEFAULT_SUFFIX.to_string()),
    }
}

/// Derive the uppercased deployment identifier from a canonical host name:
/// take the first label, strip known environment prefix tokens, uppercase
/// the remainder.
fn derive_deployment(host_name: &str) -> String {
    let first_label = host_name.split('.').next().unwrap_or_default();
    stripped_cluster(first_label).to_uppercase()
}

/// Gateway DNS template for a canonical host name: `g{0}-<cluster>.<domain>`.
fn gateway_format(host_name: &str) -> String {
    match host_name.split_once('.') {
        Some((first_label, domain)) => {
            let cluster = stripped_cluster(first_label).to_lowercase();
            if cluster.is_empty() {
                String::new()
            } else {
                format!("g{{0}}-{}.{}", cluster, domain)
            }
        }
        None => String::new(),
    }
}

/// Strip leading environment tokens (`ns`, `sb2`, `sb`, case-insensitive)
/// from a hyphen-separated label.
fn stripped_cluster(label: &str) -> String {
    let tokens: Vec<&str> = label
        .split('-')
        .skip_while(|t| {
            ENV_PREFIX_TOKENS
                .iter()
                .any(|p| t.eq_ignore_ascii_case(p))
        })
        .collect();
    tokens.join("-")
}

fn trim_trailing_dot(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_namespace_defaults_suffix() {
        let (ns, suffix) = split_namespace("foo");
        assert_eq!(ns, "foo");
        assert_eq!(suffix, DEFAULT_SUFFIX);
        assert_eq!(format!("{}.{}", ns, suffix), "foo.servicebus.windows.net");
    }

    #[test]
    fn test_split_namespace_splits_on_first_dot() {
        let (ns, suffix) = split_namespace("foo.bar.net");
        assert_eq!(ns, "foo");
        assert_eq!(suffix, "bar.net");
    }

    #[test]
    fn test_cluster_pattern() {
        let pattern = Regex::new(CLUSTER_NAME_PATTERN).unwrap();
        assert!(pattern.is_match("prod-by3-010"));
        assert!(pattern.is_match("PPE-DM2"));
        assert!(!pattern.is_match("contoso"));
        assert!(!pattern.is_match("prod-by3.example"));
        assert!(!pattern.is_match("-prod"));
    }

    #[test]
    fn test_derive_deployment_strips_env_prefixes() {
        assert_eq!(
            derive_deployment("ns-sb2-prod-by3-010.cloudapp.net"),
            "PROD-BY3-010"
        );
        assert_eq!(derive_deployment("NS-prod-dm2-005.cloudapp.net"), "PROD-DM2-005");
        assert_eq!(derive_deployment("prod-by3-010.cloudapp.net"), "PROD-BY3-010");
    }

    #[test]
    fn test_gateway_format() {
        assert_eq!(
            gateway_format("ns-sb2-prod-by3-010.cloudapp.net"),
            "g{0}-prod-by3-010.cloudapp.net"
        );
        assert_eq!(gateway_format("bare"), "");
    }

    #[test]
    fn test_gateway_host_substitution() {
        let details = NamespaceDetails {
            gateway_dns_format: "g{0}-prod-by3-010.cloudapp.net".into(),
            ..Default::default()
        };
        assert_eq!(details.gateway_host(0), "g0-prod-by3-010.cloudapp.net");
        assert_eq!(details.gateway_host(12), "g12-prod-by3-010.cloudapp.net");
    }

    #[tokio::test]
    async fn test_resolve_cluster_identifier_skips_dns() {
        let resolver = match NamespaceResolver::from_system_conf() {
            Ok(r) => r,
            // No resolver config on this host; the cluster path is what we
            // exercise elsewhere via the pure helpers.
            Err(_) => return,
        };
        let details = resolver.resolve("  prod-by3-010  ").await.unwrap();
        assert_eq!(details.deployment, "PROD-BY3-010");
        assert!(details.service_namespace.is_empty());
        assert!(details.addresses.is_empty());
        assert!(details.aliases.is_empty());
    }
}
