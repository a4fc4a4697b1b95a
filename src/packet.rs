//! Wire packet schemas for both channels.
//!
//! Every packet is a JSON object whose `name` field selects the type;
//! field names are kebab-case on the wire. Unknown fields are ignored so
//! judges may send richer packets than the bridge consumes.

use serde::{Deserialize, Serialize};

/// Packets received from a judge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum JudgePacket {
    #[serde(rename_all = "kebab-case")]
    Handshake {
        id: String,
        key: String,
        #[serde(default)]
        problems: Vec<String>,
        #[serde(default)]
        executors: Vec<String>,
    },
    #[serde(rename_all = "kebab-case")]
    SupportedProblems { problems: Vec<String> },
    #[serde(rename_all = "kebab-case")]
    GradingBegin { submission_id: u64 },
    #[serde(rename_all = "kebab-case")]
    GradingEnd {
        submission_id: u64,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        score: Option<f64>,
        #[serde(default)]
        time: Option<f64>,
        #[serde(default)]
        memory: Option<f64>,
    },
    #[serde(rename_all = "kebab-case")]
    CompileError {
        submission_id: u64,
        #[serde(default)]
        log: String,
    },
    #[serde(rename_all = "kebab-case")]
    CompileMessage {
        submission_id: u64,
        #[serde(default)]
        log: String,
    },
    BatchBegin,
    BatchEnd,
    #[serde(rename_all = "kebab-case")]
    TestCaseStatus {
        submission_id: u64,
        #[serde(default)]
        cases: Vec<serde_json::Value>,
    },
    #[serde(rename_all = "kebab-case")]
    InternalError {
        submission_id: u64,
        #[serde(default)]
        message: String,
    },
    #[serde(rename_all = "kebab-case")]
    SubmissionTerminated { submission_id: u64 },
    #[serde(rename_all = "kebab-case")]
    PingResponse {
        #[serde(default)]
        when: Option<f64>,
        #[serde(default)]
        load: Option<f64>,
    },
}

/// Packets the bridge sends to a judge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum BridgePacket {
    HandshakeSuccess,
    #[serde(rename_all = "kebab-case")]
    Ping { when: f64 },
    #[serde(rename_all = "kebab-case")]
    SubmissionRequest {
        submission_id: u64,
        problem_id: String,
        language: String,
        source: String,
    },
    #[serde(rename_all = "kebab-case")]
    TerminateSubmission { submission_id: u64 },
    Disconnect,
}

impl BridgePacket {
    /// Serialize for the framing layer. Packet types contain nothing that
    /// can fail to serialize.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("bridge packets serialize to JSON")
    }
}

/// Requests received on the frontend control channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum ControlRequest {
    #[serde(rename_all = "kebab-case")]
    SubmissionRequest {
        submission_id: u64,
        problem_id: String,
        language: String,
        source: String,
        #[serde(default)]
        judge_id: Option<String>,
        priority: u8,
    },
    #[serde(rename_all = "kebab-case")]
    TerminateSubmission { submission_id: u64 },
    #[serde(rename_all = "kebab-case")]
    DisconnectJudge {
        judge_id: String,
        #[serde(default)]
        force: bool,
    },
    #[serde(rename_all = "kebab-case")]
    DisableJudge {
        judge_id: String,
        is_disabled: bool,
    },
}
