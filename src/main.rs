use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use relaycheck::namespace::{NamespaceDetails, NamespaceResolver};
use relaycheck::probes;
use relaycheck::relay::loopback::LoopbackRelay;
use relaycheck::scenarios::{self, SuiteOptions};

#[derive(Parser)]
#[command(
    name = "relaycheck",
    about = "Diagnostics and conformance testing for tunneling relay namespaces",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the well-known relay ports on a namespace and its gateways
    Netstat {
        /// Namespace name or host to probe
        target: String,

        /// Extra ports to probe besides the well-known set
        #[arg(long, value_delimiter = ',')]
        ports: Vec<u16>,

        /// Number of gateway instances to expand and probe
        #[arg(long, default_value = "1")]
        instances: u32,

        /// Per-probe connect timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Resolve a namespace's deployment topology
    Namespace {
        /// Namespace name, host, or deployment cluster identifier
        name: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run the conformance suite against a relay endpoint
    Test {
        /// Endpoint path under test
        #[arg(long, default_value = "relaycheck-conformance")]
        path: String,

        /// Only run scenarios whose name matches this pattern
        #[arg(long)]
        filter: Option<String>,

        /// Log full error chains for failed scenarios
        #[arg(long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Netstat {
            target,
            ports,
            instances,
            timeout_ms,
            json,
        } => {
            tracing::info!(namespace = %target, instances, "probing relay namespace");
            let resolver = NamespaceResolver::from_system_conf()?;
            let report = probes::run_probe_report(
                &resolver,
                &target,
                &ports,
                instances,
                Duration::from_millis(timeout_ms),
            )
            .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }

            if report.resolution_error.is_some() {
                std::process::exit(1);
            }
        }

        Commands::Namespace { name, json } => {
            tracing::info!(%name, "resolving namespace");
            let resolver = NamespaceResolver::from_system_conf()?;

            // DNS failure degrades to partially-empty details rather than
            // aborting the diagnostic run.
            let details = match resolver.resolve(&name).await {
                Ok(details) => details,
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "namespace resolution failed");
                    NamespaceDetails::default()
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print_namespace_details(&name, &details);
            }
        }

        Commands::Test {
            path,
            filter,
            verbose,
        } => {
            let filter = filter
                .map(|pattern| regex::Regex::new(&pattern))
                .transpose()
                .context("invalid --filter pattern")?;

            tracing::info!(%path, "running conformance suite (loopback fabric)");
            let namespace = Arc::new(LoopbackRelay::new());
            let report =
                scenarios::run_conformance_suite(namespace, &path, SuiteOptions { filter, verbose })
                    .await?;

            std::process::exit(report.exit_code());
        }
    }

    Ok(())
}

fn print_namespace_details(name: &str, details: &NamespaceDetails) {
    println!();
    println!("  Relay Namespace Details");
    println!("  =======================");
    println!("  Input             : {}", name);
    println!("  Service namespace : {}", details.service_namespace);
    println!("  Host name         : {}", details.host_name);
    println!("  Suffix            : {}", details.suffix);
    println!("  Deployment        : {}", details.deployment);
    println!("  Gateway DNS       : {}", details.gateway_dns_format);
    if details.addresses.is_empty() {
        println!("  Addresses         : (none)");
    } else {
        for address in &details.addresses {
            println!("  Address           : {}", address);
        }
    }
    for alias in &details.aliases {
        println!("  Alias             : {}", alias);
    }
    println!();
}
