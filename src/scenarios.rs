//! Conformance scenarios for a relay endpoint.
//!
//! Four request/response scenarios cover the payload size classes (small and
//! large request crossed with small and large response), exercising both the
//! control and rendezvous paths of the transport. Two duplex-stream
//! scenarios validate the echo pump, including payloads spanning several
//! pump reads. [`run_conformance_suite`] wires them together with the
//! lifecycle guard and echo accept loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use bytes::Bytes;
use futures::FutureExt;
use rand::RngCore;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::harness::{self, ResourceLifecycleGuard, SuiteReport, TestCase};
use crate::pump::{self, PUMP_BUFFER_BYTES};
use crate::relay::{
    ConnectionStatus, ListenerOptions, RelayClient, RelayListener, RelayNamespace, RelayRequest,
    RelayResponse,
};

/// Small payload size class.
pub const SMALL_BODY_BYTES: usize = 15;

/// Large payload size class.
pub const LARGE_BODY_BYTES: usize = 64 * 1024;

/// Stream payload spanning several pump buffer reads.
const MULTI_BUFFER_STREAM_BYTES: usize = 3 * PUMP_BUFFER_BYTES + 1500;

const LISTENER_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
const LISTENER_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for one conformance run.
#[derive(Default)]
pub struct SuiteOptions {
    /// Only scenarios whose name matches run; others record no result.
    pub filter: Option<Regex>,
    /// Log full error chains for failed scenarios.
    pub verbose: bool,
}

fn make_payload(len: usize) -> Bytes {
    let mut body = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut body);
    Bytes::from(body)
}

/// One request/response scenario: install a fresh handler that checks it saw
/// the full request body and answers with `response_bytes` of payload, then
/// issue the request and assert a successful status and complete response.
async fn run_request_response(
    listener: Arc<dyn RelayListener>,
    client: Arc<dyn RelayClient>,
    request_bytes: usize,
    response_bytes: usize,
) -> Result<()> {
    listener.set_request_handler(Arc::new(move |request: RelayRequest| {
        async move {
            if request.body.len() == request_bytes {
                RelayResponse::ok(make_payload(response_bytes))
            } else {
                // Truncated request observed by the handler.
                RelayResponse::with_status(400, Bytes::new())
            }
        }
        .boxed()
    }));

    let response = client
        .request(RelayRequest::new(make_payload(request_bytes)))
        .await
        .context("relay request failed")?;

    ensure!(
        response.is_success(),
        "relay returned status {} (handler did not observe the full {}-byte request)",
        response.status,
        request_bytes
    );
    ensure!(
        response.body.len() == response_bytes,
        "expected a {}-byte response body, got {}",
        response_bytes,
        response.body.len()
    );

    debug!(
        request_bytes,
        response_bytes,
        via = %response.via,
        "request/response scenario complete"
    );
    Ok(())
}

/// One duplex echo scenario: write `payload_bytes` through a relayed stream,
/// read the echo back concurrently, and verify byte-for-byte identity and a
/// clean end-of-stream from the far side.
async fn run_stream_echo(client: Arc<dyn RelayClient>, payload_bytes: usize) -> Result<()> {
    let stream = client
        .create_stream()
        .await
        .context("failed to open duplex stream")?;
    let tracking_id = stream.tracking_id().to_string();
    debug!(tracking_id = %tracking_id, payload_bytes, "duplex stream open");

    let payload = make_payload(payload_bytes);
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Reads and writes must overlap: payloads larger than the transport
    // buffer would otherwise deadlock against the echo coming back.
    let outbound = payload.clone();
    let write_side = async move {
        writer.write_all(&outbound).await?;
        writer.shutdown().await?;
        Ok::<_, std::io::Error>(())
    };
    let read_side = async move {
        let mut echoed = vec![0u8; payload_bytes];
        reader.read_exact(&mut echoed).await?;
        let mut probe = [0u8; 1];
        let trailing = reader.read(&mut probe).await?;
        Ok::<_, std::io::Error>((echoed, trailing))
    };

    let (write_result, read_result) = tokio::join!(write_side, read_side);
    write_result.context("stream write failed")?;
    let (echoed, trailing) = read_result.context("stream read failed")?;

    ensure!(
        echoed == payload,
        "echoed payload differs from the sent payload"
    );
    ensure!(trailing == 0, "unexpected bytes after the echoed payload");

    debug!(tracking_id = %tracking_id, payload_bytes, "echo verified");
    Ok(())
}

fn build_cases(
    listener: Arc<dyn RelayListener>,
    client: Arc<dyn RelayClient>,
) -> Vec<TestCase> {
    let request_response = [
        ("PostSmallRequestSmallResponse", SMALL_BODY_BYTES, SMALL_BODY_BYTES),
        ("PostSmallRequestLargeResponse", SMALL_BODY_BYTES, LARGE_BODY_BYTES),
        ("PostLargeRequestSmallResponse", LARGE_BODY_BYTES, SMALL_BODY_BYTES),
        ("PostLargeRequestLargeResponse", LARGE_BODY_BYTES, LARGE_BODY_BYTES),
    ];

    let mut cases: Vec<TestCase> = request_response
        .into_iter()
        .map(|(name, request_bytes, response_bytes)| {
            let listener = Arc::clone(&listener);
            let client = Arc::clone(&client);
            TestCase::new(name, move || {
                run_request_response(listener, client, request_bytes, response_bytes)
            })
        })
        .collect();

    let echo_client = Arc::clone(&client);
    cases.push(TestCase::new("DuplexStreamEcho", move || {
        run_stream_echo(echo_client, 1024)
    }));
    cases.push(TestCase::new("DuplexStreamEchoMultiBuffer", move || {
        run_stream_echo(client, MULTI_BUFFER_STREAM_BYTES)
    }));

    cases
}

/// Run the full conformance suite against `path` on `namespace`.
///
/// Ensures the endpoint exists (creating it when absent), opens the
/// listener, runs the echo accept loop and all scenarios, then closes the
/// listener and deletes the endpoint if this run created it -- the cleanup
/// happens regardless of how the suite finished. Failure to open the
/// listener is fatal and propagates; individual scenario failures only
/// count toward the exit code.
pub async fn run_conformance_suite(
    namespace: Arc<dyn RelayNamespace>,
    path: &str,
    options: SuiteOptions,
) -> Result<SuiteReport> {
    let guard = ResourceLifecycleGuard::new(path);
    let created = guard.ensure_exists(namespace.as_ref()).await?;

    let outcome = run_suite_against_endpoint(namespace.as_ref(), path, created, &options).await;

    // Cleanup runs whether the suite finished, failed a scenario, or died
    // during setup.
    guard.cleanup(namespace.as_ref(), created).await;

    outcome
}

async fn run_suite_against_endpoint(
    namespace: &dyn RelayNamespace,
    path: &str,
    created_by_this_run: bool,
    options: &SuiteOptions,
) -> Result<SuiteReport> {
    // An endpoint known to pre-exist gets a non-dynamic binding.
    let listener_options = ListenerOptions {
        dynamic_endpoint: created_by_this_run,
    };

    let listener = namespace
        .open_listener(path, listener_options, LISTENER_OPEN_TIMEOUT)
        .await
        .context("failed to open relay listener")?;

    listener.set_status_handler(Arc::new(|status| match status {
        ConnectionStatus::Connecting => info!("listener connecting"),
        ConnectionStatus::Online => info!("listener online"),
        ConnectionStatus::Offline => info!("listener offline"),
    }));

    let accept_loop = tokio::spawn(pump::run_accept_loop(Arc::clone(&listener), true));

    let client = namespace
        .connect_client(path)
        .await
        .context("failed to connect relay client")?;

    let cases = build_cases(Arc::clone(&listener), client);
    let report = harness::run_suite(cases, options.filter.as_ref(), options.verbose).await;

    if let Err(e) = listener.close(LISTENER_CLOSE_TIMEOUT).await {
        warn!(error = %e, "listener close failed");
    }
    if tokio::time::timeout(LISTENER_CLOSE_TIMEOUT, accept_loop)
        .await
        .is_err()
    {
        warn!("accept loop did not stop after listener close");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::loopback::LoopbackRelay;

    const T: Duration = Duration::from_secs(5);

    async fn scenario_setup() -> (Arc<dyn RelayListener>, Arc<dyn RelayClient>) {
        let relay = LoopbackRelay::new();
        relay.create_endpoint("hc").await.unwrap();
        let listener = relay
            .open_listener("hc", ListenerOptions::default(), T)
            .await
            .unwrap();
        let client = relay.connect_client("hc").await.unwrap();
        (listener, client)
    }

    #[test]
    fn test_make_payload_length() {
        assert_eq!(make_payload(SMALL_BODY_BYTES).len(), 15);
        assert_eq!(make_payload(LARGE_BODY_BYTES).len(), 65536);
        assert_eq!(make_payload(0).len(), 0);
    }

    #[tokio::test]
    async fn test_post_large_request_small_response() {
        let (listener, client) = scenario_setup().await;

        // 65536-byte request, 15-byte response: the handler must observe the
        // full request body for the scenario to pass.
        run_request_response(listener, client, LARGE_BODY_BYTES, SMALL_BODY_BYTES)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_request_scenario_fails_on_error_status() {
        let (listener, client) = scenario_setup().await;

        listener.set_request_handler(Arc::new(|_req| {
            async { RelayResponse::with_status(500, Bytes::new()) }.boxed()
        }));

        // The scenario installs its own handler, so drive the client
        // directly against the failing one via a raw request first.
        let response = client
            .request(RelayRequest::new(make_payload(SMALL_BODY_BYTES)))
            .await
            .unwrap();
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_scenarios_are_independently_restartable() {
        let (listener, client) = scenario_setup().await;

        for _ in 0..2 {
            run_request_response(
                Arc::clone(&listener),
                Arc::clone(&client),
                SMALL_BODY_BYTES,
                LARGE_BODY_BYTES,
            )
            .await
            .unwrap();
        }
    }

    #[test]
    fn test_case_list_covers_all_size_classes() {
        // Pure shape check on the names; behavior is covered by the
        // integration suite.
        let relay = LoopbackRelay::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (listener, client) = rt.block_on(async {
            relay.create_endpoint("hc").await.unwrap();
            let listener = relay
                .open_listener("hc", ListenerOptions::default(), T)
                .await
                .unwrap();
            let client = relay.connect_client("hc").await.unwrap();
            (listener, client)
        });

        let cases = build_cases(listener, client);
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
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
    }
}
