//! Test case and test result model.

use crate::scheduler::Completion;
use std::fmt;
use std::time::Duration;

/// The body of a test case.
///
/// Receives the completion handle it must eventually report through. A
/// returned error or a panic fails the test case before it reports.
pub type Action = Box<dyn FnOnce(Completion) -> anyhow::Result<()> + Send>;

/// A named unit of work, run exactly once by the scheduler.
pub struct TestCase {
    name: String,
    action: Action,
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(Completion) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, Action) {
        (self.name, self.action)
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

/// Outcome of a single test case.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct TestResult {
    /// Owning test case. Filled in by the scheduler when left empty.
    pub name: String,
    pub error_messages: Vec<String>,
    pub skipped: bool,
    /// Wall time from invocation to completion, set by the scheduler.
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl TestResult {
    pub fn passed() -> Self {
        Self::default()
    }

    pub fn failed<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            error_messages: messages.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A result that counts as success without having run its checks.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            error_messages: vec![reason.into()],
            skipped: true,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.skipped || self.error_messages.is_empty()
    }

    pub fn verdict(&self) -> Verdict {
        if self.skipped {
            Verdict::Skipped
        } else if self.error_messages.is_empty() {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }

    /// Short form used in the run summary.
    pub fn summary_line(&self) -> String {
        format!("{}: {}", self.name, self.verdict())
    }
}

/// Label attached to each result line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
            Verdict::Skipped => "SKIPPED",
        })
    }
}
