//! Sequential test case scheduler.
//!
//! Runs test cases one at a time in the order they were enqueued. A test case
//! reports its outcome through a [`Completion`] handle, possibly from another
//! thread; the next test case does not start until that happens.

use crate::error::HarnessError;
use crate::result::{TestCase, TestResult, Verdict};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Instant;
use tokio::sync::oneshot;

/// Single-use handle a test case reports its result through.
///
/// Consuming `self` makes a second report impossible. Dropping the handle
/// without reporting fails the test case.
#[derive(Debug)]
pub struct Completion {
    sender: oneshot::Sender<TestResult>,
}

impl Completion {
    pub fn complete(self, result: TestResult) {
        // The receiver is gone only if the action already faulted synchronously,
        // in which case the synthesized failure stands.
        let _ = self.sender.send(result);
    }
}

/// Run context owning the pending queue and the result log.
#[derive(Debug, Default)]
pub struct Scheduler {
    pending: VecDeque<TestCase>,
    completed: Vec<TestResult>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a test case to the end of the queue.
    pub fn enqueue(&mut self, test_case: TestCase) {
        tracing::debug!("Enqueued {}", test_case.name());
        self.pending.push_back(test_case);
    }

    /// Wait for the environment to signal readiness, then run every test case.
    pub async fn start_when_ready(
        self,
        ready: oneshot::Receiver<()>,
    ) -> Result<RunSummary, HarnessError> {
        ready.await.map_err(|_| {
            HarnessError::EnvironmentNotReady("ready signal was dropped".to_string())
        })?;
        Ok(self.start().await)
    }

    /// Run every queued test case in order and summarize the results.
    pub async fn start(mut self) -> RunSummary {
        tracing::info!("Running {} test case(s)", self.pending.len());
        while let Some(test_case) = self.pending.pop_front() {
            let result = run_test_case(test_case).await;
            self.record(result);
        }
        let summary = RunSummary {
            results: self.completed,
        };
        summary.log();
        summary
    }

    fn record(&mut self, result: TestResult) {
        match result.verdict() {
            Verdict::Passed => tracing::info!("{}: PASSED", result.name),
            Verdict::Skipped => tracing::warn!(
                "{}: SKIPPED ({})",
                result.name,
                result.error_messages.join("; ")
            ),
            Verdict::Failed => tracing::error!(
                "{}: FAILED\n  {}",
                result.name,
                result.error_messages.join("\n").replace('\n', "\n  ")
            ),
        }
        self.completed.push(result);
    }
}

async fn run_test_case(test_case: TestCase) -> TestResult {
    let (name, action) = test_case.into_parts();
    tracing::info!("Starting {name}");
    let started = Instant::now();

    let (sender, receiver) = oneshot::channel();
    // Actions do blocking file and process work, so keep them off the runtime threads.
    let invoked = tokio::task::spawn_blocking(move || action(Completion { sender })).await;

    let mut result = match invoked {
        Ok(Ok(())) => receiver.await.unwrap_or_else(|_| {
            TestResult::failed(["Test case dropped its completion handle without reporting"])
        }),
        Ok(Err(e)) => TestResult::failed([format!("{e:#}")]),
        Err(join) if join.is_panic() => {
            TestResult::failed([panic_message(join.into_panic().as_ref())])
        }
        Err(join) => TestResult::failed([format!("Test case was cancelled: {join}")]),
    };

    if result.name.is_empty() {
        result.name = name;
    }
    result.duration = started.elapsed();
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("Test case panicked: {detail}")
}

/// Final outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    results: Vec<TestResult>,
}

impl RunSummary {
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// True iff every recorded result succeeded.
    pub fn passed(&self) -> bool {
        self.results.iter().all(TestResult::succeeded)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }

    /// One short line per test case followed by the overall verdict.
    pub fn report(&self) -> String {
        let mut report = String::new();
        for result in &self.results {
            let _ = writeln!(report, "{}", result.summary_line());
        }
        let overall = if self.passed() { "PASSED" } else { "FAILED" };
        let _ = write!(
            report,
            "Test run {overall} ({} test case(s))",
            self.results.len()
        );
        report
    }

    fn log(&self) {
        tracing::info!("Summary:\n{}", self.report());
    }
}
