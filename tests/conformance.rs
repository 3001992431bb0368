//! End-to-end conformance suite runs over the loopback relay fabric.

use std::sync::Arc;

use regex::Regex;
use relaycheck::relay::loopback::LoopbackRelay;
use relaycheck::relay::RelayNamespace;
use relaycheck::scenarios::{run_conformance_suite, SuiteOptions};

#[tokio::test]
async fn full_suite_passes_on_loopback() {
    let relay = Arc::new(LoopbackRelay::new());

    let report = run_conformance_suite(
        Arc::clone(&relay) as Arc<dyn RelayNamespace>,
        "conformance-e2e",
        SuiteOptions::default(),
    )
    .await
    .expect("suite setup failed");

    assert_eq!(report.exit_code(), 0);

    let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "PostSmallRequestSmallResponse",
            "PostSmallRequestLargeResponse",
            "PostLargeRequestSmallResponse",
            "PostLargeRequestLargeResponse",
            "DuplexStreamEcho",
            "DuplexStreamEchoMultiBuffer",
        ]
    );
    assert!(report.results.iter().all(|r| r.passed));
}

#[tokio::test]
async fn suite_cleans_up_endpoint_it_created() {
    let relay = Arc::new(LoopbackRelay::new());

    run_conformance_suite(
        Arc::clone(&relay) as Arc<dyn RelayNamespace>,
        "conformance-cleanup",
        SuiteOptions::default(),
    )
    .await
    .expect("suite setup failed");

    // The suite created the endpoint, so it must have deleted it again.
    assert!(!relay.endpoint_exists("conformance-cleanup").await.unwrap());
}

#[tokio::test]
async fn suite_leaves_preexisting_endpoint_in_place() {
    let relay = Arc::new(LoopbackRelay::new());
    relay.create_endpoint("conformance-keep").await.unwrap();

    run_conformance_suite(
        Arc::clone(&relay) as Arc<dyn RelayNamespace>,
        "conformance-keep",
        SuiteOptions::default(),
    )
    .await
    .expect("suite setup failed");

    assert!(relay.endpoint_exists("conformance-keep").await.unwrap());
}

#[tokio::test]
async fn filter_runs_only_matching_scenarios() {
    let relay = Arc::new(LoopbackRelay::new());

    let report = run_conformance_suite(
        Arc::clone(&relay) as Arc<dyn RelayNamespace>,
        "conformance-filter",
        SuiteOptions {
            filter: Some(Regex::new("PostLargeRequestSmallResponse").unwrap()),
            verbose: false,
        },
    )
    .await
    .expect("suite setup failed");

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].name, "PostLargeRequestSmallResponse");
    assert!(report.results[0].passed);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn suite_is_repeatable_against_the_same_path() {
    let relay = Arc::new(LoopbackRelay::new());

    for _ in 0..2 {
        let report = run_conformance_suite(
            Arc::clone(&relay) as Arc<dyn RelayNamespace>,
            "conformance-repeat",
            SuiteOptions::default(),
        )
        .await
        .expect("suite setup failed");
        assert_eq!(report.exit_code(), 0);
    }
}
