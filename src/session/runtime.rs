//! Session runtime.
//!
//! Drives one [`SessionController`] on a tokio task. The driver owns the
//! connection manager, the countdown and the gateway handles; it feeds every
//! input through the controller and carries out the returned effects.
//! Collaborator calls, timers and connection tasks run on child tasks that
//! post into one input queue, so the controller stays the only writer and
//! sees inputs strictly in arrival order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::controller::{
    Effect, Input, SessionController, SessionPolicy, SessionReport, SessionSnapshot,
    SessionUpdate,
};
use super::countdown::Countdown;
use super::state::{LifecycleState, SessionParams};
use crate::clock::Clock;
use crate::connection::{ConnectionManager, Dialer};
use crate::error::SessionError;
use crate::gateway::Gateway;
use crate::matchmaking::{MatchmakingClient, Participant};
use crate::observability::events::EventEmitter;
use crate::observability::metrics;

/// Collaborators and policy a session runs with.
#[derive(Clone)]
pub struct SessionEnvironment {
    /// HTTP (or in-memory) collaborators.
    pub gateway: Arc<dyn Gateway>,
    /// Opens the session connection.
    pub dialer: Arc<dyn Dialer>,
    /// Wall clock for log timestamps and code expiry.
    pub clock: Arc<dyn Clock>,
    /// JSONL event sink.
    pub events: Arc<EventEmitter>,
    /// Timing and coaching policy.
    pub policy: SessionPolicy,
    /// Base of the session connection URL.
    pub ws_base: String,
    /// Validity window of issued codes.
    pub code_ttl: Duration,
}

impl std::fmt::Debug for SessionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEnvironment")
            .field("policy", &self.policy)
            .field("ws_base", &self.ws_base)
            .field("code_ttl", &self.code_ttl)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable front for issuing commands to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<Input>,
    updates: broadcast::Sender<SessionUpdate>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    fn submit(&self, input: Input) -> Result<(), SessionError> {
        self.inputs.send(input).map_err(|_| SessionError::Disposed)
    }

    /// Starts a single-player exercise.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session is no longer running.
    /// Refusals by the session itself are appended to the Activity Log.
    pub fn start(&self) -> Result<(), SessionError> {
        self.submit(Input::Start)
    }

    /// Issues a code and waits on it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session is no longer running.
    pub fn host(&self) -> Result<(), SessionError> {
        self.submit(Input::Host)
    }

    /// Redeems a code.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session is no longer running.
    pub fn join(&self, code: impl Into<String>) -> Result<(), SessionError> {
        self.submit(Input::Join { code: code.into() })
    }

    /// Sends free text to the peer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session is no longer running.
    pub fn say(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.submit(Input::Say { text: text.into() })
    }

    /// Activates `url`, or the most recent peer link.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session is no longer running.
    pub fn click(&self, url: Option<String>) -> Result<(), SessionError> {
        self.submit(Input::ClickLink { url })
    }

    /// Concedes the exercise.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session is no longer running.
    pub fn surrender(&self) -> Result<(), SessionError> {
        self.submit(Input::Surrender)
    }

    /// Subscribes to incremental updates from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits until a snapshot satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session stops first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| SessionError::Disposed)?;
        Ok(snapshot.clone())
    }

    /// Waits until the lifecycle reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session stops first.
    pub async fn wait_for_state(
        &self,
        state: LifecycleState,
    ) -> Result<SessionSnapshot, SessionError> {
        self.wait_for(|s| s.lifecycle == state).await
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// A session running on its own task.
#[derive(Debug)]
pub struct SessionRuntime {
    handle: SessionHandle,
    cancel: CancellationToken,
    task: JoinHandle<SessionReport>,
}

impl SessionRuntime {
    /// Creates an idle session and starts driving it.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn create(params: SessionParams, env: SessionEnvironment) -> Self {
        let controller = SessionController::new(
            params,
            env.policy.clone(),
            Arc::clone(&env.clock),
            Arc::clone(&env.events),
        );
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = SessionHandle {
            inputs: inputs_tx.clone(),
            updates: controller.update_sender(),
            snapshot: controller.watch(),
        };

        let driver = Driver::new(controller, env, inputs_tx, &cancel);
        let task = tokio::spawn(driver.run(inputs_rx, cancel.clone()));

        Self {
            handle,
            cancel,
            task,
        }
    }

    /// Command handle; clone freely.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Waits for the session to reach `ended` on its own.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the driver task was aborted.
    pub async fn finished(self) -> Result<SessionReport, SessionError> {
        self.task.await.map_err(|_| SessionError::Disposed)
    }

    /// Tears the session down wherever it is: closes the connection, stops
    /// the countdown and abandons in-flight collaborator calls.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the driver task was aborted.
    pub async fn dispose(self) -> Result<SessionReport, SessionError> {
        self.cancel.cancel();
        self.task.await.map_err(|_| SessionError::Disposed)
    }
}

// ============================================================================
// Driver
// ============================================================================

struct Driver {
    controller: SessionController,
    connections: ConnectionManager<Input>,
    countdown: Countdown,
    matchmaking: Arc<MatchmakingClient>,
    gateway: Arc<dyn Gateway>,
    inputs: mpsc::UnboundedSender<Input>,
    tasks: CancellationToken,
}

impl Driver {
    fn new(
        controller: SessionController,
        env: SessionEnvironment,
        inputs: mpsc::UnboundedSender<Input>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            matchmaking: Arc::new(MatchmakingClient::new(
                Arc::clone(&env.gateway),
                Arc::clone(&env.clock),
                env.code_ttl,
            )),
            connections: ConnectionManager::new(env.dialer, env.ws_base, inputs.clone()),
            countdown: Countdown::new(),
            gateway: env.gateway,
            controller,
            inputs,
            tasks: cancel.child_token(),
        }
    }

    /// Handles queued inputs one at a time, oldest first, until the session
    /// ends or `cancel` fires.
    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        cancel: CancellationToken,
    ) -> SessionReport {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("session runtime cancelled");
                    self.controller.abandon();
                    break;
                }
                Some(input) = inputs.recv() => {
                    if let Input::Connection(event) = &input
                        && !self.connections.is_current(event.connection)
                    {
                        debug!(connection = event.connection, "dropping event from superseded connection");
                        continue;
                    }
                    self.step(input).await;
                }
                else => break,
            }

            if self.controller.session().lifecycle() == LifecycleState::Ended {
                break;
            }
        }

        self.tasks.cancel();
        self.countdown.stop();
        self.connections.close();
        self.controller.report()
    }

    /// Applies one input and every effect it cascades into.
    async fn step(&mut self, input: Input) {
        let mut queue: VecDeque<Effect> = self.controller.handle(input).into();
        while let Some(effect) = queue.pop_front() {
            if let Some(follow_up) = self.execute(effect).await {
                queue.extend(self.controller.handle(follow_up));
            }
        }
    }

    /// Carries out one effect. Synchronous outcomes are returned as inputs;
    /// asynchronous ones are posted to the input queue.
    async fn execute(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::CreateSession(request) => {
                let gateway = Arc::clone(&self.gateway);
                self.spawn_call(async move {
                    Some(Input::SessionCreated(gateway.create_session(&request).await))
                });
            }
            Effect::IssueCode {
                participant_id,
                role,
            } => {
                let matchmaking = Arc::clone(&self.matchmaking);
                self.spawn_call(async move {
                    Some(Input::CodeIssued(
                        matchmaking.issue_code(&participant_id, role).await,
                    ))
                });
            }
            Effect::RedeemCode { code, role } => {
                let session = self.controller.session();
                let participant = Participant {
                    id: session.participant_id().to_owned(),
                    scenario: session.scenario(),
                    os: session.os(),
                };
                let matchmaking = Arc::clone(&self.matchmaking);
                self.spawn_call(async move {
                    Some(Input::Redeemed(
                        matchmaking.redeem_code(&code, role, &participant).await,
                    ))
                });
            }
            Effect::Open { session_id, role } => {
                self.connections.open(&session_id, role);
            }
            Effect::Reconnect { after } => {
                self.connections.reopen(after);
            }
            Effect::Close => self.connections.close(),
            Effect::Send { message, role } => {
                if let Err(err) = self.connections.send(message.encode(role)) {
                    return Some(Input::SendFailed {
                        reason: err.to_string(),
                    });
                }
            }
            Effect::StartCountdown => self.countdown.start(self.inputs.clone()),
            Effect::StopCountdown => self.countdown.stop(),
            Effect::ScheduleDisplayEnd { after } => {
                self.spawn_call(async move {
                    tokio::time::sleep(after).await;
                    Some(Input::DisplayElapsed)
                });
            }
            Effect::ScheduleLockout { url, after } => {
                self.spawn_call(async move {
                    tokio::time::sleep(after).await;
                    Some(Input::LockoutElapsed { url })
                });
            }
            Effect::Coach(request) => {
                let gateway = Arc::clone(&self.gateway);
                self.spawn_call(async move {
                    match gateway.coach(&request).await {
                        Ok(reply) => reply.map(Input::CoachReplied),
                        Err(err) => {
                            metrics::record_gateway_failure("coach");
                            debug!(error = %err, action = ?request.action, "coach request failed");
                            None
                        }
                    }
                });
            }
            Effect::UpdateLeaderboard(update) => {
                let result = tokio::select! {
                    () = self.tasks.cancelled() => return None,
                    result = self.gateway.update_leaderboard(&update) => result,
                };
                if let Err(err) = &result {
                    warn!(error = %err, "leaderboard update failed");
                }
                return Some(Input::LeaderboardReported(result));
            }
        }
        None
    }

    /// Runs `call` on its own task, posting its input unless the session is
    /// torn down first.
    fn spawn_call<F>(&self, call: F)
    where
        F: Future<Output = Option<Input>> + Send + 'static,
    {
        let inputs = self.inputs.clone();
        let token = self.tasks.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                input = call => {
                    if let Some(input) = input {
                        let _ = inputs.send(input);
                    }
                }
            }
        });
    }
}
