//! Per-judge connection state machine.
//!
//! One task per accepted socket owns the framed transport, so packet
//! replies, dispatcher commands, and heartbeat pings are all written from
//! a single place and never interleave mid-frame. Lifecycle:
//! connect -> handshake -> idle/working -> disconnect, with the dispatcher
//! notified at each edge.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::codec::{CodecError, PacketCodec};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::packet::{BridgePacket, JudgePacket};
use crate::scheduler::{Dispatcher, JudgeCommand, JudgeRegistration};
use crate::service::{BridgeService, SubmissionStatus};

type Transport = Framed<TcpStream, PacketCodec>;

enum Flow {
    Continue,
    Close,
}

pub struct JudgeConnection {
    dispatcher: Arc<Dispatcher>,
    service: Arc<dyn BridgeService>,
    auth: Arc<dyn Authenticator>,
    config: BridgeConfig,
    peer: SocketAddr,
    /// Set once the handshake succeeds.
    name: Option<String>,
    session: Option<u64>,
    /// Connection-local view of the grading state; set when a submit
    /// command is forwarded, confirmed by grading-begin, cleared by the
    /// terminal packets. Drives the internal-error synthesis on close.
    working: bool,
    current: Option<u64>,
    /// A non-force disconnect waits for the current submission to finish.
    pending_disconnect: bool,
}

impl JudgeConnection {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        service: Arc<dyn BridgeService>,
        auth: Arc<dyn Authenticator>,
        config: BridgeConfig,
        peer: SocketAddr,
    ) -> Self {
        Self {
            dispatcher,
            service,
            auth,
            config,
            peer,
            name: None,
            session: None,
            working: false,
            current: None,
            pending_disconnect: false,
        }
    }

    /// Drive the connection until the peer disconnects, the protocol is
    /// violated, or the bridge shuts down.
    pub async fn run(mut self, stream: TcpStream, cancel: CancellationToken) {
        tracing::info!(peer = %self.peer, "Judge connected");
        let mut framed = Framed::new(stream, PacketCodec::new());
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<JudgeCommand>();
        // Heartbeat starts only after authentication.
        let mut ping: Option<Interval> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = framed.send(BridgePacket::Disconnect.to_wire()).await;
                    break;
                }
                frame = framed.next() => match frame {
                    Some(Ok(payload)) => {
                        match self.handle_payload(&mut framed, &cmd_tx, &payload, &mut ping).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close) => break,
                            Err(e) => {
                                tracing::error!(peer = %self.peer, error = %e, "Failed to reply to judge");
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        self.log_frame_error(framed.codec(), &e);
                        break;
                    }
                    None => break,
                },
                Some(cmd) = cmd_rx.recv() => {
                    match self.handle_command(&mut framed, cmd).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break,
                        Err(e) => {
                            tracing::error!(peer = %self.peer, error = %e, "Failed to write to judge");
                            break;
                        }
                    }
                }
                _ = Self::heartbeat(&mut ping) => {
                    let when = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
                    if let Err(e) = framed.send(BridgePacket::Ping { when }.to_wire()).await {
                        tracing::warn!(peer = %self.peer, error = %e, "Ping failed, closing connection");
                        break;
                    }
                }
            }
        }

        self.on_close();
    }

    async fn heartbeat(ping: &mut Option<Interval>) {
        match ping {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    fn log_frame_error(&self, codec: &PacketCodec, error: &CodecError) {
        match error {
            CodecError::FrameTooLarge { size } => {
                tracing::warn!(
                    peer = %self.peer,
                    size,
                    "Disconnecting judge, frame exceeds size cap"
                );
            }
            CodecError::Corrupt(_) if !codec.saw_packet() => {
                tracing::info!(
                    peer = %self.peer,
                    tag = ?codec.initial_tag(),
                    "Potentially wrong protocol, disconnecting"
                );
            }
            other => {
                tracing::warn!(
                    peer = %self.peer,
                    error = %other,
                    "Frame error during packet handling, disconnecting judge"
                );
            }
        }
    }

    async fn handle_payload(
        &mut self,
        framed: &mut Transport,
        cmd_tx: &mpsc::UnboundedSender<JudgeCommand>,
        payload: &str,
        ping: &mut Option<Interval>,
    ) -> Result<Flow> {
        let packet: JudgePacket = match serde_json::from_str(payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Malformed packet");
                return Ok(Flow::Continue);
            }
        };

        let raw: serde_json::Value = serde_json::from_str(payload).unwrap_or_default();

        match packet {
            JudgePacket::Handshake {
                id,
                key,
                problems,
                executors,
            } => self.handle_handshake(framed, cmd_tx, ping, id, key, problems, executors).await,
            _ if self.name.is_none() => {
                tracing::warn!(peer = %self.peer, "Ignoring packet before handshake");
                Ok(Flow::Continue)
            }
            JudgePacket::SupportedProblems { problems } => {
                self.dispatcher
                    .update_problems(self.judge_name(), problems.into_iter().collect());
                Ok(Flow::Continue)
            }
            JudgePacket::GradingBegin { submission_id } => {
                self.working = true;
                self.current = Some(submission_id);
                self.dispatcher
                    .on_grading_begin(self.judge_name(), submission_id);
                self.service
                    .record_submission_status(submission_id, SubmissionStatus::Grading);
                self.service.emit_event("grading-begin", submission_id, raw);
                tracing::info!(
                    judge = self.judge_name(),
                    submission_id,
                    "Grading begun"
                );
                Ok(Flow::Continue)
            }
            JudgePacket::GradingEnd { submission_id, .. } => {
                self.finish(submission_id, SubmissionStatus::Graded, "grading-end", raw)
            }
            JudgePacket::CompileError { submission_id, .. } => self.finish(
                submission_id,
                SubmissionStatus::CompileError,
                "compile-error",
                raw,
            ),
            JudgePacket::InternalError {
                submission_id,
                ref message,
            } => {
                tracing::warn!(
                    judge = self.judge_name(),
                    submission_id,
                    reason = %message,
                    "Judge reported internal error"
                );
                self.finish(
                    submission_id,
                    SubmissionStatus::InternalError,
                    "internal-error",
                    raw,
                )
            }
            JudgePacket::SubmissionTerminated { submission_id } => {
                self.finish(submission_id, SubmissionStatus::Aborted, "aborted", raw)
            }
            JudgePacket::CompileMessage { submission_id, .. } => {
                self.service.emit_event("compile-message", submission_id, raw);
                Ok(Flow::Continue)
            }
            JudgePacket::BatchBegin => {
                self.service
                    .emit_event("batch-begin", self.current.unwrap_or(0), raw);
                Ok(Flow::Continue)
            }
            JudgePacket::BatchEnd => {
                self.service
                    .emit_event("batch-end", self.current.unwrap_or(0), raw);
                Ok(Flow::Continue)
            }
            JudgePacket::TestCaseStatus {
                submission_id,
                cases,
            } => {
                for case in &cases {
                    self.service.record_test_case(submission_id, case);
                }
                self.service.emit_event("test-case-status", submission_id, raw);
                Ok(Flow::Continue)
            }
            JudgePacket::PingResponse { load, .. } => {
                self.dispatcher.on_ping_response(self.judge_name(), load);
                Ok(Flow::Continue)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_handshake(
        &mut self,
        framed: &mut Transport,
        cmd_tx: &mpsc::UnboundedSender<JudgeCommand>,
        ping: &mut Option<Interval>,
        id: String,
        key: String,
        problems: Vec<String>,
        executors: Vec<String>,
    ) -> Result<Flow> {
        if self.name.is_some() {
            tracing::warn!(peer = %self.peer, judge = self.judge_name(), "Duplicate handshake ignored");
            return Ok(Flow::Continue);
        }

        if !self.auth.verify(&id, &key) {
            tracing::warn!(peer = %self.peer, judge = %id, "Judge authentication failure");
            return Ok(Flow::Close);
        }

        let session = self.dispatcher.register(JudgeRegistration {
            name: id.clone(),
            problems: problems.into_iter().collect(),
            executors: executors.into_iter().collect(),
            tx: cmd_tx.clone(),
        });
        self.name = Some(id.clone());
        self.session = Some(session);
        self.service.mark_judge_connected(&id);

        framed.send(BridgePacket::HandshakeSuccess.to_wire()).await?;

        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        *ping = Some(interval);

        tracing::info!(peer = %self.peer, judge = %id, "Judge authenticated");
        Ok(Flow::Continue)
    }

    /// Terminal packet handling shared by the four result codes.
    fn finish(
        &mut self,
        submission_id: u64,
        status: SubmissionStatus,
        kind: &str,
        raw: serde_json::Value,
    ) -> Result<Flow> {
        if self.current.is_some() && self.current != Some(submission_id) {
            tracing::warn!(
                judge = self.judge_name(),
                submission_id,
                current = ?self.current,
                "Terminal packet for a submission this judge is not grading"
            );
        }
        self.working = false;
        self.current = None;
        self.service.record_submission_status(submission_id, status);
        self.service.emit_event(kind, submission_id, raw);

        if self.pending_disconnect {
            // Leave the dispatcher before the assignment is released so
            // the queue scan cannot hand this closing connection new work.
            if let (Some(name), Some(session)) = (self.name.clone(), self.session) {
                self.dispatcher.unregister(&name, session);
            }
            tracing::info!(judge = self.judge_name(), "Deferred disconnect, judge now idle");
            return Ok(Flow::Close);
        }
        self.dispatcher.on_judge_free(self.judge_name(), submission_id);
        Ok(Flow::Continue)
    }

    async fn handle_command(&mut self, framed: &mut Transport, cmd: JudgeCommand) -> Result<Flow> {
        match cmd {
            JudgeCommand::Submit {
                submission_id,
                problem,
                language,
                source,
            } => {
                // Mark before the write: if the judge dies mid-send the
                // close path must still terminate this submission.
                self.working = true;
                self.current = Some(submission_id);
                framed
                    .send(
                        BridgePacket::SubmissionRequest {
                            submission_id,
                            problem_id: problem,
                            language,
                            source,
                        }
                        .to_wire(),
                    )
                    .await?;
                Ok(Flow::Continue)
            }
            JudgeCommand::Abort { submission_id } => {
                framed
                    .send(BridgePacket::TerminateSubmission { submission_id }.to_wire())
                    .await?;
                Ok(Flow::Continue)
            }
            JudgeCommand::Disconnect { force } => {
                if !force && self.working {
                    tracing::info!(
                        judge = self.judge_name(),
                        "Disconnect deferred until current submission finishes"
                    );
                    self.pending_disconnect = true;
                    return Ok(Flow::Continue);
                }
                let _ = framed.send(BridgePacket::Disconnect.to_wire()).await;
                Ok(Flow::Close)
            }
        }
    }

    /// Teardown shared by every exit path: deregister, and terminate the
    /// in-flight submission if the judge vanished mid-grade.
    fn on_close(&mut self) {
        tracing::info!(peer = %self.peer, judge = ?self.name, "Judge disconnected");
        let (Some(name), Some(session)) = (self.name.clone(), self.session) else {
            return;
        };
        let orphaned = self.dispatcher.unregister(&name, session);
        self.service.mark_judge_disconnected(&name);

        // The dispatcher may hold an assignment this connection never saw:
        // the socket can die between assignment and the submit command
        // being processed. Either way the submission must terminate.
        let stranded = if self.working {
            self.current.take()
        } else {
            orphaned
        };
        if let Some(submission_id) = stranded {
            tracing::error!(
                judge = %name,
                submission_id,
                "Judge disconnected while grading, terminating submission"
            );
            self.working = false;
            self.service
                .record_submission_status(submission_id, SubmissionStatus::InternalError);
            self.service.emit_event(
                "internal-error",
                submission_id,
                serde_json::json!({
                    "name": "internal-error",
                    "submission-id": submission_id,
                    "message": "judge disconnected while grading",
                }),
            );
        }
    }

    fn judge_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unauthenticated>")
    }
}
