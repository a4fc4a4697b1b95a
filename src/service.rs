//! Collaborator interface for everything outside the bridge core:
//! persistence of submission/judge records, statistics, and the event
//! stream consumed by the frontend.

use serde_json::Value;

/// Terminal and in-progress submission states the bridge reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Grading,
    Graded,
    CompileError,
    InternalError,
    Aborted,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Grading => "grading",
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::CompileError => "compile-error",
            SubmissionStatus::InternalError => "internal-error",
            SubmissionStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence and event sink consumed by the bridge core.
///
/// Implementations must not block: the bridge calls these from connection
/// tasks. Anything slow belongs on a queue inside the implementation.
pub trait BridgeService: Send + Sync {
    /// Clear stale judge/submission state left over from a previous run.
    /// Called once at startup, before either listener binds.
    fn reset_in_flight(&self);

    fn record_submission_status(&self, submission_id: u64, status: SubmissionStatus);

    fn record_test_case(&self, submission_id: u64, case: &Value);

    fn mark_judge_connected(&self, name: &str);

    fn mark_judge_disconnected(&self, name: &str);

    /// Externally observable lifecycle event (grading progress, compile
    /// output, terminal results). `payload` is the raw packet body.
    fn emit_event(&self, kind: &str, submission_id: u64, payload: Value);
}

/// Service implementation that only logs. Stands in until a real
/// persistence layer is wired up behind the trait.
#[derive(Debug, Default)]
pub struct NullService;

impl BridgeService for NullService {
    fn reset_in_flight(&self) {
        tracing::info!("Resetting in-flight judge and submission state");
    }

    fn record_submission_status(&self, submission_id: u64, status: SubmissionStatus) {
        tracing::debug!(submission_id, status = %status, "Submission status");
    }

    fn record_test_case(&self, submission_id: u64, case: &Value) {
        tracing::debug!(submission_id, %case, "Test case result");
    }

    fn mark_judge_connected(&self, name: &str) {
        tracing::debug!(judge = name, "Judge marked connected");
    }

    fn mark_judge_disconnected(&self, name: &str) {
        tracing::debug!(judge = name, "Judge marked disconnected");
    }

    fn emit_event(&self, kind: &str, submission_id: u64, _payload: Value) {
        tracing::debug!(kind, submission_id, "Event");
    }
}
