//! Fail-soft scenario orchestration.
//!
//! Runs named async scenarios strictly in declaration order, optionally
//! filtered by a name pattern, capturing each failure as a result instead of
//! aborting the suite. The purpose is diagnostic coverage, not fail-fast: a
//! broken scenario never prevents the remaining ones from running.

use anyhow::Result;
use futures::future::BoxFuture;
use regex::Regex;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, error, info};

pub mod lifecycle;

pub use lifecycle::ResourceLifecycleGuard;

/// One named scenario: a name and an async action.
pub struct TestCase {
    pub name: String,
    action: Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>,
}

impl TestCase {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(move || Box::pin(action())),
        }
    }
}

/// Verdict for one executed scenario. Appended in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
}

/// All results of one suite run, in execution order.
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub results: Vec<TestResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| r.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Process exit code: the number of failed scenarios, 0 when all passed.
    pub fn exit_code(&self) -> i32 {
        self.failed().count() as i32
    }
}

/// Run `cases` in declaration order, skipping names that do not match
/// `filter` (skipped cases record no result).
///
/// Each case runs to completion -- including any internally-concurrent
/// sub-work -- before the next one starts, which keeps trace output readable
/// and stops two scenarios from swapping the shared listener's request
/// handler under each other. Errors are logged (full chain in verbose mode)
/// and recorded as failed results. A pass/fail summary is printed at the
/// end.
pub async fn run_suite(
    cases: Vec<TestCase>,
    filter: Option<&Regex>,
    verbose: bool,
) -> SuiteReport {
    let mut results = Vec::new();

    for case in cases {
        if let Some(pattern) = filter {
            if !pattern.is_match(&case.name) {
                debug!(scenario = %case.name, "skipped by filter");
                continue;
            }
        }

        print_section_header(&case.name);

        match (case.action)().await {
            Ok(()) => {
                info!(scenario = %case.name, "scenario passed");
                results.push(TestResult {
                    name: case.name,
                    passed: true,
                });
            }
            Err(e) => {
                if verbose {
                    error!(scenario = %case.name, error = ?e, "scenario failed");
                } else {
                    error!(scenario = %case.name, error = %e, "scenario failed");
                }
                results.push(TestResult {
                    name: case.name,
                    passed: false,
                });
            }
        }
    }

    let report = SuiteReport { results };
    print_summary(&report);
    report
}

fn print_section_header(name: &str) {
    println!();
    println!("  {}", "-".repeat(60));
    println!("  Scenario: {}", name);
    println!("  {}", "-".repeat(60));
}

fn print_summary(report: &SuiteReport) {
    println!();
    println!("  Passed ({}):", report.passed().count());
    for result in report.passed() {
        println!("    + {}", result.name);
    }
    println!("  Failed ({}):", report.failed().count());
    for result in report.failed() {
        println!("    - {}", result.name);
    }
    println!();
}
