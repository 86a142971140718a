//! Guided stereo setup for two speakers.
//!
//! Only the connected speaker can be commanded. The second speaker is put into
//! discovery by hand, and whether the two found each other is known only from
//! what the operator sees on the indicator lights. That checkpoint stays
//! explicit: the [`Operator`] reports it, the orchestrator never guesses.

pub mod console;

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bluetooth::transport::Transport;
use crate::device::Speaker;
use crate::error::LwacpError;
use crate::protocol::registry::{DoubleUpMode, Role};

/// Hard upper bound on the second-speaker wait window.
pub const MAX_WAIT_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    AwaitConfirmation,
    DiscoveryTriggered,
    AwaitSecondSpeaker,
    RoleSelection,
    Completed,
    TimedOut,
    Cancelled,
}

/// Commands sent by the workflow, named so failures can be scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStep {
    TriggerDiscovery,
    SetStereoMode,
    AssignRole,
}

impl std::fmt::Display for PairingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PairingStep::TriggerDiscovery => "stereo discovery trigger",
            PairingStep::SetStereoMode => "stereo mode change",
            PairingStep::AssignRole => "role assignment",
        })
    }
}

/// What the operator saw once both speakers stopped blinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    /// Lights went solid: the speakers linked.
    Solid,
    /// Lights turned off: discovery timed out.
    Off,
}

/// What a [`StatusProbe`] saw on one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSignal {
    /// The two speakers are linked. Ends the wait early. `BluezProbe` cannot
    /// observe the speaker-to-speaker link, so only other probe
    /// implementations produce this.
    #[allow(dead_code)]
    Linked,
    NoSignal,
}

/// Why the second-speaker wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEnd {
    WindowElapsed,
    ProbeLinked,
    OperatorReady,
}

/// Best-effort secondary signal polled while waiting for the second speaker.
///
/// Errors are logged and ignored; they never abort the workflow.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self) -> anyhow::Result<ProbeSignal>;
}

/// The human side of the workflow. `None` from any method means the operator
/// walked away (EOF, closed prompt) and maps to `Cancelled`.
#[async_trait]
pub trait Operator: Send {
    /// Ask before touching hardware. The speaker will visibly enter discovery.
    async fn confirm_start(&mut self) -> Option<bool>;

    /// Tell the operator how to activate the second speaker.
    async fn show_instructions(&mut self, window: Duration);

    /// Resolves when the operator says the lights stopped blinking. May stay
    /// pending; the wait window bounds it.
    async fn wait_settled(&mut self) -> Option<()>;

    async fn report_indicator(&mut self) -> Option<Indicator>;

    /// Role for the connected speaker. The other speaker takes the complement.
    async fn choose_role(&mut self) -> Option<Role>;

    async fn offer_retry(&mut self, attempts: u32) -> Option<bool>;
}

#[derive(Debug, Clone, Copy)]
pub struct PairingPolicy {
    pub wait_window: Duration,
    pub poll_interval: Duration,
    /// Pause between the operator's confirmation and the mode command.
    pub settle_delay: Duration,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            wait_window: Duration::from_secs(45),
            poll_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl PairingPolicy {
    pub fn effective_window(&self) -> Duration {
        self.wait_window.min(MAX_WAIT_WINDOW)
    }
}

/// Transient state of one stereo-setup invocation.
#[derive(Debug)]
pub struct PairingSession {
    state: PairingState,
    started_at: Instant,
    role_assigned: Option<Role>,
    attempt_count: u32,
    discovery_sent: bool,
}

impl PairingSession {
    fn new(attempt_count: u32) -> Self {
        Self {
            state: PairingState::Idle,
            started_at: Instant::now(),
            role_assigned: None,
            attempt_count,
            discovery_sent: false,
        }
    }

    fn transition(&mut self, next: PairingState) {
        debug!("Pairing state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    Completed { role: Role },
    /// Lights went off. Expected; the whole workflow may be retried.
    TimedOut { attempts: u32 },
    /// Operator abort. Discovery, if already triggered, is not undone.
    Cancelled { discovery_sent: bool },
}

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("{step} failed: {source}")]
    StepFailed {
        step: PairingStep,
        #[source]
        source: LwacpError,
    },

    /// An earlier command took effect; only `failed` needs to be retried.
    #[error("partial completion: {completed} succeeded but {failed} failed: {source}")]
    PartialCompletion {
        completed: PairingStep,
        failed: PairingStep,
        #[source]
        source: LwacpError,
    },
}

/// Runs stereo setup sessions against one speaker, one at a time.
pub struct StereoPairing {
    policy: PairingPolicy,
    abort: watch::Receiver<bool>,
    attempts: u32,
    last_state: PairingState,
}

impl StereoPairing {
    /// `abort` flips to `true` when the operator interrupts (e.g. Ctrl-C).
    pub fn new(policy: PairingPolicy, abort: watch::Receiver<bool>) -> Self {
        Self {
            policy,
            abort,
            attempts: 0,
            last_state: PairingState::Idle,
        }
    }

    /// Timed-out attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Final state of the most recent session.
    pub fn last_state(&self) -> PairingState {
        self.last_state
    }

    /// Run sessions until one does not time out, or the operator declines a retry.
    pub async fn run_with_retries<T: Transport, O: Operator>(
        &mut self,
        speaker: &mut Speaker<T>,
        operator: &mut O,
        probe: Option<&dyn StatusProbe>,
    ) -> Result<PairingOutcome, PairingError> {
        loop {
            let outcome = self.run(speaker, operator, probe).await?;
            let PairingOutcome::TimedOut { attempts } = outcome else {
                return Ok(outcome);
            };
            match guarded(&mut self.abort, operator.offer_retry(attempts)).await {
                Some(Some(true)) => info!("Retrying stereo setup (attempt {})", attempts + 1),
                Some(Some(false)) => return Ok(outcome),
                // Interrupted or EOF at the retry prompt. The timed-out session
                // already triggered discovery.
                None | Some(None) => {
                    warn!("Stereo setup aborted at the retry prompt");
                    self.last_state = PairingState::Cancelled;
                    return Ok(PairingOutcome::Cancelled {
                        discovery_sent: true,
                    });
                }
            }
        }
    }

    /// Run one session from `Idle` to a terminal state.
    pub async fn run<T: Transport, O: Operator>(
        &mut self,
        speaker: &mut Speaker<T>,
        operator: &mut O,
        probe: Option<&dyn StatusProbe>,
    ) -> Result<PairingOutcome, PairingError> {
        let mut session = PairingSession::new(self.attempts);
        let result = self.drive(&mut session, speaker, operator, probe).await;

        self.attempts = session.attempt_count;
        self.last_state = session.state;
        match &result {
            Ok(outcome) => info!(
                "Stereo setup ended after {:?}: {:?} (role {:?})",
                session.started_at.elapsed(),
                outcome,
                session.role_assigned
            ),
            Err(e) => warn!("Stereo setup failed in {:?}: {}", session.state, e),
        }
        result
    }

    async fn drive<T: Transport, O: Operator>(
        &mut self,
        session: &mut PairingSession,
        speaker: &mut Speaker<T>,
        operator: &mut O,
        probe: Option<&dyn StatusProbe>,
    ) -> Result<PairingOutcome, PairingError> {
        let policy = self.policy;
        let abort = &mut self.abort;

        session.transition(PairingState::AwaitConfirmation);
        if guarded(abort, operator.confirm_start()).await.flatten() != Some(true) {
            return Ok(cancel(session));
        }

        if is_aborted(abort) {
            return Ok(cancel(session));
        }
        let discovery = speaker
            .registry()
            .stereo_discovery()
            .map_err(|source| step_failed(PairingStep::TriggerDiscovery, source))?;
        if let Err(source) = speaker.send(&discovery).await {
            session.transition(PairingState::Cancelled);
            return Err(step_failed(PairingStep::TriggerDiscovery, source));
        }
        session.discovery_sent = true;
        session.transition(PairingState::DiscoveryTriggered);

        let window = policy.effective_window();
        operator.show_instructions(window).await;
        session.transition(PairingState::AwaitSecondSpeaker);

        let waited = guarded(abort, wait_for_second_speaker(operator, probe, &policy)).await;
        match waited.flatten() {
            Some(end) => debug!("Second speaker wait ended: {:?}", end),
            None => return Ok(cancel(session)),
        }

        session.transition(PairingState::RoleSelection);
        let indicator = match guarded(abort, operator.report_indicator()).await.flatten() {
            Some(indicator) => indicator,
            None => return Ok(cancel(session)),
        };

        if indicator == Indicator::Off {
            session.attempt_count += 1;
            session.transition(PairingState::TimedOut);
            return Ok(PairingOutcome::TimedOut {
                attempts: session.attempt_count,
            });
        }

        let role = match guarded(abort, operator.choose_role()).await.flatten() {
            Some(role) => role,
            None => return Ok(cancel(session)),
        };

        if guarded(abort, tokio::time::sleep(policy.settle_delay)).await.is_none() {
            return Ok(cancel(session));
        }

        let mode = speaker
            .registry()
            .double_up_mode(DoubleUpMode::Stereo)
            .map_err(|source| step_failed(PairingStep::SetStereoMode, source))?;
        if let Err(source) = speaker.send(&mode).await {
            session.transition(PairingState::Cancelled);
            return Err(step_failed(PairingStep::SetStereoMode, source));
        }

        // Mode is now stereo; from here a failure is partial
        let registry = *speaker.registry();
        let assigned = match registry.double_up_role(role) {
            Ok(frame) => speaker.send(&frame).await,
            Err(e) => Err(e),
        };
        if let Err(source) = assigned {
            return Err(PairingError::PartialCompletion {
                completed: PairingStep::SetStereoMode,
                failed: PairingStep::AssignRole,
                source,
            });
        }

        session.role_assigned = Some(role);
        session.transition(PairingState::Completed);
        info!(
            "Connected speaker is {}, second speaker is {}",
            role,
            role.complement()
        );
        Ok(PairingOutcome::Completed { role })
    }
}

fn step_failed(step: PairingStep, source: LwacpError) -> PairingError {
    PairingError::StepFailed { step, source }
}

fn cancel(session: &mut PairingSession) -> PairingOutcome {
    session.transition(PairingState::Cancelled);
    if session.discovery_sent {
        warn!("Stereo setup cancelled after discovery was triggered");
    }
    PairingOutcome::Cancelled {
        discovery_sent: session.discovery_sent,
    }
}

fn is_aborted(abort: &watch::Receiver<bool>) -> bool {
    *abort.borrow()
}

/// Resolves once the abort flag is set. Stays pending if the sender is gone.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run `fut` unless the abort flag fires first.
async fn guarded<F: Future>(abort: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = aborted(abort) => None,
        out = fut => Some(out),
    }
}

/// Bounded wait for the second speaker. `None` if the operator walked away.
async fn wait_for_second_speaker<O: Operator>(
    operator: &mut O,
    probe: Option<&dyn StatusProbe>,
    policy: &PairingPolicy,
) -> Option<WaitEnd> {
    let deadline = tokio::time::sleep(policy.effective_window());
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(policy.poll_interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut deadline => return Some(WaitEnd::WindowElapsed),
            ready = operator.wait_settled() => return ready.map(|()| WaitEnd::OperatorReady),
            _ = ticker.tick(), if probe.is_some() => {
                let Some(probe) = probe else { continue };
                match tokio::time::timeout(policy.poll_interval, probe.probe()).await {
                    Ok(Ok(ProbeSignal::Linked)) => return Some(WaitEnd::ProbeLinked),
                    Ok(Ok(ProbeSignal::NoSignal)) => {}
                    Ok(Err(e)) => debug!("Status probe failed: {}", e),
                    Err(_) => debug!("Status probe timed out"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::bluetooth::transport::mock::MockTransport;
    use crate::protocol::CommandRegistry;

    const DISCOVERY: [u8; 3] = [0x02, 0x01, 0x69];
    const MODE_STEREO: [u8; 4] = [0x03, 0x01, 0x67, 0x01];
    const ROLE_LEFT: [u8; 4] = [0x03, 0x01, 0x68, 0x00];
    const ROLE_RIGHT: [u8; 4] = [0x03, 0x01, 0x68, 0x01];

    /// Operator answering from a script.
    struct ScriptedOperator {
        confirm: Option<bool>,
        settles: bool,
        indicators: VecDeque<Option<Indicator>>,
        role: Option<Role>,
        retries: VecDeque<Option<bool>>,
        /// Raised from inside `offer_retry`, which then never answers.
        abort_on_retry: Option<watch::Sender<bool>>,
        instructions_shown: usize,
    }

    impl ScriptedOperator {
        fn new(indicators: Vec<Indicator>, role: Role) -> Self {
            Self {
                confirm: Some(true),
                settles: true,
                indicators: indicators.into_iter().map(Some).collect(),
                role: Some(role),
                retries: VecDeque::new(),
                abort_on_retry: None,
                instructions_shown: 0,
            }
        }
    }

    #[async_trait]
    impl Operator for ScriptedOperator {
        async fn confirm_start(&mut self) -> Option<bool> {
            self.confirm
        }

        async fn show_instructions(&mut self, _window: Duration) {
            self.instructions_shown += 1;
        }

        async fn wait_settled(&mut self) -> Option<()> {
            if self.settles {
                Some(())
            } else {
                std::future::pending().await
            }
        }

        async fn report_indicator(&mut self) -> Option<Indicator> {
            self.indicators.pop_front().flatten()
        }

        async fn choose_role(&mut self) -> Option<Role> {
            self.role
        }

        async fn offer_retry(&mut self, _attempts: u32) -> Option<bool> {
            if let Some(abort) = &self.abort_on_retry {
                abort.send(true).unwrap();
                return std::future::pending().await;
            }
            self.retries.pop_front().unwrap_or(Some(false))
        }
    }

    struct CountingProbe {
        calls: AtomicUsize,
        linked_after: usize,
    }

    #[async_trait]
    impl StatusProbe for CountingProbe {
        async fn probe(&self) -> anyhow::Result<ProbeSignal> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.linked_after {
                Ok(ProbeSignal::Linked)
            } else {
                anyhow::bail!("status service unavailable")
            }
        }
    }

    fn fast_policy() -> PairingPolicy {
        PairingPolicy {
            wait_window: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
        }
    }

    fn speaker(transport: MockTransport) -> Speaker<MockTransport> {
        Speaker::new(transport, CommandRegistry::default(), Duration::ZERO)
    }

    fn orchestrator() -> (StereoPairing, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (StereoPairing::new(fast_policy(), rx), tx)
    }

    #[tokio::test]
    async fn test_solid_lights_complete_with_mode_then_role() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);

        let outcome = pairing.run(&mut spk, &mut op, None).await.unwrap();

        assert_eq!(outcome, PairingOutcome::Completed { role: Role::Left });
        assert_eq!(pairing.last_state(), PairingState::Completed);
        let sent = &spk.transport().sent;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], DISCOVERY);
        assert_eq!(sent[sent.len() - 2], MODE_STEREO);
        assert_eq!(sent[sent.len() - 1], ROLE_LEFT);
        assert_eq!(op.instructions_shown, 1);
    }

    #[tokio::test]
    async fn test_right_role_frame() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Right);

        pairing.run(&mut spk, &mut op, None).await.unwrap();
        assert_eq!(spk.transport().sent.last().unwrap(), &ROLE_RIGHT);
    }

    #[tokio::test]
    async fn test_lights_off_times_out_without_mode_or_role() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Off], Role::Left);

        let outcome = pairing.run(&mut spk, &mut op, None).await.unwrap();

        assert_eq!(outcome, PairingOutcome::TimedOut { attempts: 1 });
        assert_eq!(pairing.last_state(), PairingState::TimedOut);
        assert_eq!(spk.transport().sent, vec![DISCOVERY.to_vec()]);
    }

    #[tokio::test]
    async fn test_role_failure_reports_partial_completion() {
        let (mut pairing, _abort) = orchestrator();
        // Sends: 0 discovery, 1 mode, 2 role
        let mut spk = speaker(MockTransport::failing_at(2));
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);

        let err = pairing.run(&mut spk, &mut op, None).await.unwrap_err();

        match err {
            PairingError::PartialCompletion {
                completed, failed, ..
            } => {
                assert_eq!(completed, PairingStep::SetStereoMode);
                assert_eq!(failed, PairingStep::AssignRole);
            }
            other => panic!("expected partial completion, got {:?}", other),
        }
        assert_eq!(
            spk.transport().sent,
            vec![DISCOVERY.to_vec(), MODE_STEREO.to_vec()]
        );
    }

    #[tokio::test]
    async fn test_mode_failure_names_mode_step() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::failing_at(1));
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);

        let err = pairing.run(&mut spk, &mut op, None).await.unwrap_err();
        assert!(matches!(
            err,
            PairingError::StepFailed {
                step: PairingStep::SetStereoMode,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_discovery_failure_cancels_session() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::failing_at(0));
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);

        let err = pairing.run(&mut spk, &mut op, None).await.unwrap_err();

        assert!(matches!(
            err,
            PairingError::StepFailed {
                step: PairingStep::TriggerDiscovery,
                source: LwacpError::Transport(_),
            }
        ));
        assert_eq!(pairing.last_state(), PairingState::Cancelled);
        assert_eq!(op.instructions_shown, 0);
    }

    #[tokio::test]
    async fn test_declined_confirmation_sends_nothing() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);
        op.confirm = Some(false);

        let outcome = pairing.run(&mut spk, &mut op, None).await.unwrap();

        assert_eq!(
            outcome,
            PairingOutcome::Cancelled {
                discovery_sent: false
            }
        );
        assert!(spk.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_abort_before_start_sends_nothing() {
        let (mut pairing, abort) = orchestrator();
        abort.send(true).unwrap();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);

        let outcome = pairing.run(&mut spk, &mut op, None).await.unwrap();

        assert!(matches!(outcome, PairingOutcome::Cancelled { .. }));
        assert!(spk.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_abort_during_wait_stops_after_discovery() {
        let (tx, rx) = watch::channel(false);
        let policy = PairingPolicy {
            wait_window: Duration::from_secs(30),
            ..fast_policy()
        };
        let mut pairing = StereoPairing::new(policy, rx);
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);
        op.settles = false;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
            // Keep the sender alive past the abort
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pairing.run(&mut spk, &mut op, None),
        )
        .await
        .expect("abort must end the wait")
        .unwrap();

        assert_eq!(
            outcome,
            PairingOutcome::Cancelled {
                discovery_sent: true
            }
        );
        assert_eq!(pairing.last_state(), PairingState::Cancelled);
        assert_eq!(spk.transport().sent, vec![DISCOVERY.to_vec()]);
    }

    #[tokio::test]
    async fn test_wait_window_elapses_then_checkpoint() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Left);
        op.settles = false;

        let outcome = pairing.run(&mut spk, &mut op, None).await.unwrap();
        assert_eq!(outcome, PairingOutcome::Completed { role: Role::Left });
    }

    #[tokio::test]
    async fn test_probe_errors_ignored_and_link_ends_wait() {
        let (tx, rx) = watch::channel(false);
        let policy = PairingPolicy {
            wait_window: Duration::from_secs(30),
            ..fast_policy()
        };
        let mut pairing = StereoPairing::new(policy, rx);
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Solid], Role::Right);
        op.settles = false;
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            linked_after: 3,
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pairing.run(&mut spk, &mut op, Some(&probe as &dyn StatusProbe)),
        )
        .await
        .expect("probe link must end the wait")
        .unwrap();

        assert_eq!(outcome, PairingOutcome::Completed { role: Role::Right });
        assert!(probe.calls.load(Ordering::SeqCst) >= 3);
        drop(tx);
    }

    #[tokio::test]
    async fn test_retry_accumulates_attempts() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(
            vec![Indicator::Off, Indicator::Off, Indicator::Solid],
            Role::Left,
        );
        op.retries = VecDeque::from(vec![Some(true), Some(true)]);

        let outcome = pairing
            .run_with_retries(&mut spk, &mut op, None)
            .await
            .unwrap();

        assert_eq!(outcome, PairingOutcome::Completed { role: Role::Left });
        assert_eq!(pairing.attempts(), 2);
        let sent = &spk.transport().sent;
        // Three discovery triggers, then mode and role once
        assert_eq!(sent.iter().filter(|f| f.as_slice() == DISCOVERY).count(), 3);
        assert_eq!(sent[sent.len() - 2], MODE_STEREO);
        assert_eq!(sent[sent.len() - 1], ROLE_LEFT);
    }

    #[tokio::test]
    async fn test_declined_retry_returns_timeout() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Off], Role::Left);

        let outcome = pairing
            .run_with_retries(&mut spk, &mut op, None)
            .await
            .unwrap();
        assert_eq!(outcome, PairingOutcome::TimedOut { attempts: 1 });
    }

    #[tokio::test]
    async fn test_interrupt_at_retry_prompt_cancels() {
        let (mut pairing, abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Off], Role::Left);
        op.abort_on_retry = Some(abort);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pairing.run_with_retries(&mut spk, &mut op, None),
        )
        .await
        .expect("abort must end the retry prompt")
        .unwrap();

        assert_eq!(
            outcome,
            PairingOutcome::Cancelled {
                discovery_sent: true
            }
        );
        assert_eq!(pairing.last_state(), PairingState::Cancelled);
        assert_eq!(pairing.attempts(), 1);
        assert_eq!(spk.transport().sent, vec![DISCOVERY.to_vec()]);
    }

    #[tokio::test]
    async fn test_eof_at_retry_prompt_cancels() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![Indicator::Off], Role::Left);
        op.retries = VecDeque::from(vec![None]);

        let outcome = pairing
            .run_with_retries(&mut spk, &mut op, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PairingOutcome::Cancelled {
                discovery_sent: true
            }
        );
    }

    #[tokio::test]
    async fn test_operator_eof_at_checkpoint_cancels() {
        let (mut pairing, _abort) = orchestrator();
        let mut spk = speaker(MockTransport::default());
        let mut op = ScriptedOperator::new(vec![], Role::Left);
        op.indicators.push_back(None);

        let outcome = pairing.run(&mut spk, &mut op, None).await.unwrap();
        assert_eq!(
            outcome,
            PairingOutcome::Cancelled {
                discovery_sent: true
            }
        );
        assert_eq!(spk.transport().sent.len(), 1);
    }

    #[test]
    fn test_window_is_hard_bounded() {
        let policy = PairingPolicy {
            wait_window: Duration::from_secs(3600),
            ..PairingPolicy::default()
        };
        assert_eq!(policy.effective_window(), MAX_WAIT_WINDOW);
    }
}
