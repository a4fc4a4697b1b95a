//! Frontend-facing control channel.
//!
//! A thin request/response layer: each request maps onto one dispatcher
//! call. Malformed requests get `bad-request` and the connection stays
//! open; framing errors close it like any other connection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::PacketCodec;
use crate::packet::ControlRequest;
use crate::scheduler::{Dispatcher, Submission};

pub struct ControlConnection {
    dispatcher: Arc<Dispatcher>,
    peer: SocketAddr,
}

impl ControlConnection {
    pub fn new(dispatcher: Arc<Dispatcher>, peer: SocketAddr) -> Self {
        Self { dispatcher, peer }
    }

    pub async fn run(self, stream: TcpStream, cancel: CancellationToken) {
        tracing::info!(peer = %self.peer, "Frontend connected");
        let mut framed = Framed::new(stream, PacketCodec::new());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = framed.next() => match frame {
                    Some(Ok(payload)) => {
                        if let Some(reply) = self.handle_request(&payload) {
                            if let Err(e) = framed.send(reply.to_string()).await {
                                tracing::error!(peer = %self.peer, error = %e, "Failed to reply to frontend");
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(peer = %self.peer, error = %e, "Frontend frame error, disconnecting");
                        break;
                    }
                    None => break,
                },
            }
        }
        tracing::info!(peer = %self.peer, "Frontend disconnected");
    }

    fn handle_request(&self, payload: &str) -> Option<serde_json::Value> {
        let request: ControlRequest = match serde_json::from_str(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(peer = %self.peer, error = %e, "Malformed control request");
                return Some(json!({"name": "bad-request"}));
            }
        };

        match request {
            ControlRequest::SubmissionRequest {
                submission_id,
                problem_id,
                language,
                source,
                judge_id,
                priority,
            } => {
                if !self.dispatcher.check_priority(priority) {
                    tracing::warn!(submission_id, priority, "Rejecting invalid priority");
                    return Some(json!({"name": "bad-request"}));
                }
                match self.dispatcher.submit(Submission {
                    id: submission_id,
                    problem: problem_id,
                    language,
                    source,
                    judge_id,
                    priority,
                }) {
                    Ok(()) => Some(json!({
                        "name": "submission-received",
                        "submission-id": submission_id,
                    })),
                    Err(e) => {
                        tracing::error!(submission_id, error = %e, "Submit failed");
                        Some(json!({"name": "bad-request"}))
                    }
                }
            }
            ControlRequest::TerminateSubmission { submission_id } => {
                let judge_aborted = self.dispatcher.abort(submission_id);
                Some(json!({
                    "name": "submission-received",
                    "judge-aborted": judge_aborted,
                }))
            }
            ControlRequest::DisconnectJudge { judge_id, force } => {
                if let Err(e) = self.dispatcher.disconnect(&judge_id, force) {
                    tracing::warn!(judge = %judge_id, error = %e, "Disconnect request failed");
                }
                None
            }
            ControlRequest::DisableJudge {
                judge_id,
                is_disabled,
            } => {
                if let Err(e) = self.dispatcher.set_disabled(&judge_id, is_disabled) {
                    tracing::warn!(judge = %judge_id, error = %e, "Disable request failed");
                }
                None
            }
        }
    }
}
