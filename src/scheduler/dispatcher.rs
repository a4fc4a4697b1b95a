//! Submission dispatcher: the single serialization point for all
//! scheduling decisions.
//!
//! Owns the registry of connected judges, the tiered queue of unassigned
//! submissions, and the id -> judge registry of in-flight assignments, all
//! behind one lock. Commands to judges are non-blocking channel enqueues
//! handed to each connection's own writer, so nothing under the lock waits
//! on a socket.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::scheduler::queue::{Submission, TierQueue};

/// Commands pushed to a judge connection's writer.
#[derive(Debug, Clone)]
pub enum JudgeCommand {
    Submit {
        submission_id: u64,
        problem: String,
        language: String,
        source: String,
    },
    Abort {
        submission_id: u64,
    },
    Disconnect {
        force: bool,
    },
}

/// What a connection hands the dispatcher after a successful handshake.
#[derive(Debug)]
pub struct JudgeRegistration {
    pub name: String,
    pub problems: HashSet<String>,
    pub executors: HashSet<String>,
    pub tx: mpsc::UnboundedSender<JudgeCommand>,
}

/// Dispatcher-side bookkeeping for one connected judge. The connection
/// owns the transport; the dispatcher reads and reserves this entry under
/// its lock.
struct JudgeEntry {
    name: String,
    session: u64,
    problems: HashSet<String>,
    executors: HashSet<String>,
    working: bool,
    disabled: bool,
    current: Option<u64>,
    load: f64,
    tx: mpsc::UnboundedSender<JudgeCommand>,
}

impl JudgeEntry {
    fn can_judge(&self, problem: &str, language: &str, pinned: Option<&str>) -> bool {
        pinned.map_or(true, |p| p == self.name)
            && self.problems.contains(problem)
            && self.executors.contains(language)
    }
}

struct DispatchState {
    judges: HashMap<String, JudgeEntry>,
    queue: TierQueue,
    /// submission id -> judge currently grading it. Mutually exclusive
    /// with the queue's pending index per id.
    assigned: HashMap<u64, String>,
    /// Injected so tests can pin the tie-break.
    jitter: Box<dyn FnMut() -> f64 + Send>,
}

pub struct Dispatcher {
    inner: Mutex<DispatchState>,
    tiers: u8,
    reserve_threshold: u8,
    next_session: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_jitter(config, Box::new(|| rand::random::<f64>()))
    }

    /// Build with a deterministic jitter source. Each candidate judge costs
    /// one draw during selection, added to its reported load.
    pub fn with_jitter(config: &BridgeConfig, jitter: Box<dyn FnMut() -> f64 + Send>) -> Self {
        Self {
            inner: Mutex::new(DispatchState {
                judges: HashMap::new(),
                queue: TierQueue::new(config.tiers),
                assigned: HashMap::new(),
                jitter,
            }),
            tiers: config.tiers,
            reserve_threshold: config.reserve_threshold,
            next_session: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.inner.lock().expect("dispatcher lock poisoned")
    }

    pub fn check_priority(&self, priority: u8) -> bool {
        priority < self.tiers
    }

    /// Low-tier submissions may not consume the last idle judge while other
    /// capable judges exist. Both `submit` and the free-judge scan use this
    /// one predicate.
    fn reservation_blocks(&self, tier: u8, eligible: usize, idle: usize) -> bool {
        tier < self.reserve_threshold && eligible > 1 && idle <= 1
    }

    /// Candidate counts for one submission: judges whose capability
    /// predicate accepts it and are not disabled, and the idle subset.
    fn count_candidates(
        state: &DispatchState,
        problem: &str,
        language: &str,
        pinned: Option<&str>,
    ) -> (usize, usize) {
        let mut eligible = 0;
        let mut idle = 0;
        for judge in state.judges.values() {
            if judge.disabled || !judge.can_judge(problem, language, pinned) {
                continue;
            }
            eligible += 1;
            if !judge.working {
                idle += 1;
            }
        }
        (eligible, idle)
    }

    /// Queue a submission or dispatch it immediately.
    ///
    /// Idempotent on the submission id: an id already queued or assigned is
    /// left untouched (rejudge batches resubmit freely).
    pub fn submit(&self, submission: Submission) -> Result<()> {
        if submission.priority >= self.tiers {
            return Err(BridgeError::InvalidPriority(submission.priority));
        }

        let mut state = self.lock();
        if state.assigned.contains_key(&submission.id) || state.queue.contains(submission.id) {
            tracing::debug!(
                submission_id = submission.id,
                "Duplicate submit ignored, already queued or assigned"
            );
            return Ok(());
        }

        // Each pass either dispatches, queues, or evicts one dead judge, so
        // this terminates within the judge count.
        loop {
            let (eligible, idle) = Self::count_candidates(
                &state,
                &submission.problem,
                &submission.language,
                submission.judge_id.as_deref(),
            );

            if let Some(ref pinned) = submission.judge_id {
                tracing::info!(
                    judge = %pinned,
                    available = idle > 0,
                    "Submission pinned to a specific judge"
                );
            } else {
                tracing::info!(free_judges = idle, "Dispatching submission");
            }

            if idle == 0 || self.reservation_blocks(submission.priority, eligible, idle) {
                break;
            }

            // Least reported load wins; the random jitter smooths ties.
            let mut best: Option<(String, f64)> = None;
            let mut scores: Vec<(String, f64)> = Vec::new();
            for judge in state.judges.values() {
                if judge.disabled
                    || judge.working
                    || !judge.can_judge(
                        &submission.problem,
                        &submission.language,
                        submission.judge_id.as_deref(),
                    )
                {
                    continue;
                }
                scores.push((judge.name.clone(), judge.load));
            }
            for (name, load) in scores {
                let score = load + (state.jitter)();
                match best {
                    Some((_, s)) if s <= score => {}
                    _ => best = Some((name, score)),
                }
            }
            let Some((name, _)) = best else {
                break;
            };

            match Self::send_assignment(&mut state, &name, &submission) {
                Ok(()) => {
                    tracing::info!(
                        submission_id = submission.id,
                        judge = %name,
                        "Dispatched submission"
                    );
                    return Ok(());
                }
                Err(_) => {
                    tracing::error!(
                        submission_id = submission.id,
                        problem = %submission.problem,
                        language = %submission.language,
                        judge = %name,
                        "Failed to dispatch, evicting judge and retrying"
                    );
                    state.judges.remove(&name);
                }
            }
        }

        let id = submission.id;
        state.queue.enqueue(submission)?;
        tracing::info!(submission_id = id, "Queued submission");
        Ok(())
    }

    /// Reserve the judge and push the submit command. On success the
    /// submission is recorded as assigned; on failure the caller decides
    /// what to do with the evicted judge.
    fn send_assignment(
        state: &mut DispatchState,
        name: &str,
        submission: &Submission,
    ) -> Result<()> {
        let judge = state
            .judges
            .get(name)
            .ok_or_else(|| BridgeError::JudgeNotFound(name.to_string()))?;
        judge
            .tx
            .send(JudgeCommand::Submit {
                submission_id: submission.id,
                problem: submission.problem.clone(),
                language: submission.language.clone(),
                source: submission.source.clone(),
            })
            .map_err(|_| BridgeError::JudgeGone(name.to_string()))?;

        state.assigned.insert(submission.id, name.to_string());
        if let Some(judge) = state.judges.get_mut(name) {
            judge.working = true;
            judge.current = Some(submission.id);
        }
        Ok(())
    }

    /// A judge finished (or was torn down mid-) grading: release the
    /// assignment, mark it idle, and hand it the best queued submission it
    /// can serve.
    pub fn on_judge_free(&self, name: &str, submission_id: u64) {
        tracing::info!(judge = name, submission_id, "Judge available after grading");
        let mut state = self.lock();
        state.assigned.remove(&submission_id);
        if let Some(judge) = state.judges.get_mut(name) {
            judge.working = false;
            judge.current = None;
        }
        self.free_scan(&mut state, name);
    }

    /// Scan the queue highest tier first for the first submission this
    /// judge can serve. A reservation block stops the whole scan: the judge
    /// stays idle for a future privileged submission.
    fn free_scan(&self, state: &mut DispatchState, name: &str) {
        let Some(judge) = state.judges.get(name) else {
            return;
        };
        if judge.working || judge.disabled {
            return;
        }

        let mut target: Option<Submission> = None;
        for (tier, sub) in state.queue.scan() {
            if !judge.can_judge(&sub.problem, &sub.language, sub.judge_id.as_deref()) {
                continue;
            }
            let (eligible, idle) =
                Self::count_candidates(state, &sub.problem, &sub.language, sub.judge_id.as_deref());
            if self.reservation_blocks(tier, eligible, idle) {
                return;
            }
            target = Some(sub.clone());
            break;
        }

        let Some(submission) = target else {
            return;
        };
        let id = submission.id;
        // Remove from the queue only after the send succeeds, so a dead
        // judge leaves the submission queued for the next free judge.
        match Self::send_assignment(state, name, &submission) {
            Ok(()) => {
                state.queue.remove(id);
                tracing::info!(submission_id = id, judge = name, "Dispatched queued submission");
            }
            Err(_) => {
                tracing::error!(
                    submission_id = id,
                    judge = name,
                    "Failed to dispatch queued submission, evicting judge"
                );
                state.judges.remove(name);
            }
        }
    }

    /// Register a freshly authenticated judge. Any judge already holding
    /// the same name is force-disconnected first so reconnects are
    /// idempotent. Returns the session id the connection must present on
    /// unregister.
    pub fn register(&self, registration: JudgeRegistration) -> u64 {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();

        if let Some(old) = state.judges.get(&registration.name) {
            tracing::warn!(
                judge = %registration.name,
                "Judge name already connected, disconnecting the old session"
            );
            let _ = old.tx.send(JudgeCommand::Disconnect { force: true });
            // The old connection's close handler terminates its submission;
            // drop the stale assignment here so the id can be resubmitted.
            if let Some(current) = old.current {
                state.assigned.remove(&current);
            }
        }

        let name = registration.name.clone();
        state.judges.insert(
            name.clone(),
            JudgeEntry {
                name: name.clone(),
                session,
                problems: registration.problems,
                executors: registration.executors,
                working: false,
                disabled: false,
                current: None,
                load: 0.0,
                tx: registration.tx,
            },
        );
        tracing::info!(judge = %name, "Judge registered");
        self.free_scan(&mut state, &name);
        session
    }

    /// Remove a judge on connection close. The session id guards against a
    /// stale connection unregistering its replacement. Returns the
    /// submission the judge was still assigned, if any; terminating or
    /// re-queueing it is the caller's job.
    pub fn unregister(&self, name: &str, session: u64) -> Option<u64> {
        let mut state = self.lock();
        let judge = state.judges.get(name)?;
        if judge.session != session {
            return None;
        }
        let orphaned = judge.current;
        if let Some(current) = orphaned {
            state.assigned.remove(&current);
        }
        state.judges.remove(name);
        tracing::info!(judge = name, "Judge unregistered");

        // With one judge left the reservation rule could strand queued
        // work, so give a lone idle judge an immediate scan.
        if state.judges.len() == 1 {
            let lone = state
                .judges
                .values()
                .next()
                .filter(|j| !j.working && !j.disabled)
                .map(|j| j.name.clone());
            if let Some(lone) = lone {
                self.free_scan(&mut state, &lone);
            }
        }
        orphaned
    }

    /// Abort a submission. Returns true if a judge is actively grading it
    /// (termination arrives later via the judge's own packet), false if it
    /// was only queued and has now been removed.
    pub fn abort(&self, submission_id: u64) -> bool {
        tracing::info!(submission_id, "Abort request");
        let mut state = self.lock();
        if let Some(name) = state.assigned.get(&submission_id).cloned() {
            if let Some(judge) = state.judges.get(&name) {
                if judge.tx.send(JudgeCommand::Abort { submission_id }).is_err() {
                    tracing::warn!(
                        submission_id,
                        judge = %name,
                        "Abort not delivered, judge connection already closing"
                    );
                }
            }
            true
        } else {
            state.queue.remove(submission_id);
            false
        }
    }

    /// Relay a frontend disconnect request to the judge's connection.
    pub fn disconnect(&self, name: &str, force: bool) -> Result<()> {
        let state = self.lock();
        let judge = state
            .judges
            .get(name)
            .ok_or_else(|| BridgeError::JudgeNotFound(name.to_string()))?;
        judge
            .tx
            .send(JudgeCommand::Disconnect { force })
            .map_err(|_| BridgeError::JudgeGone(name.to_string()))
    }

    /// Disable or re-enable a judge. Disabled judges keep their connection
    /// and current assignment but are never selected for new work.
    pub fn set_disabled(&self, name: &str, disabled: bool) -> Result<()> {
        let mut state = self.lock();
        let judge = state
            .judges
            .get_mut(name)
            .ok_or_else(|| BridgeError::JudgeNotFound(name.to_string()))?;
        judge.disabled = disabled;
        tracing::info!(judge = name, disabled, "Judge disabled flag updated");
        if !disabled {
            self.free_scan(&mut state, name);
        }
        Ok(())
    }

    /// Replace a judge's problem set and retry queued submissions that may
    /// now be satisfiable.
    pub fn update_problems(&self, name: &str, problems: HashSet<String>) {
        let mut state = self.lock();
        if let Some(judge) = state.judges.get_mut(name) {
            judge.problems = problems;
        }
        self.free_scan(&mut state, name);
    }

    /// Confirmation from the judge that grading started.
    pub fn on_grading_begin(&self, name: &str, submission_id: u64) {
        let mut state = self.lock();
        match state.assigned.get(&submission_id) {
            Some(assignee) if assignee == name => {}
            _ => {
                tracing::warn!(
                    judge = name,
                    submission_id,
                    "grading-begin for a submission not assigned to this judge"
                );
            }
        }
        if let Some(judge) = state.judges.get_mut(name) {
            judge.working = true;
            judge.current = Some(submission_id);
        }
    }

    /// Load telemetry from a ping response.
    pub fn on_ping_response(&self, name: &str, load: Option<f64>) {
        if let Some(load) = load {
            let mut state = self.lock();
            if let Some(judge) = state.judges.get_mut(name) {
                judge.load = load;
            }
        }
    }

    // Introspection, used by logging and tests.

    pub fn judge_names(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state.judges.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn assigned_to(&self, submission_id: u64) -> Option<String> {
        self.lock().assigned.get(&submission_id).cloned()
    }

    pub fn is_queued(&self, submission_id: u64) -> bool {
        self.lock().queue.contains(submission_id)
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_working(&self, name: &str) -> Option<bool> {
        self.lock().judges.get(name).map(|j| j.working)
    }
}
