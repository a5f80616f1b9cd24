//! Client reconnection state machine.
//!
//! The machine is pure: it consumes [`Event`]s and returns the [`Effect`]s
//! the driver must perform (open a socket, arm a timer, send a frame). All
//! timing and IO live in [`crate::driver`], so every transition here can be
//! tested without a network or a clock.
//!
//! ```text
//! Idle ──start──▶ Connecting ──opened──▶ Open ──exit──▶ Closing
//!                    ▲   │                 │               │
//!          retry/wake│   └──failed──┐      └──closed──┐    │
//!                    │              ▼                 ▼    ▼
//!                    └─────────── Closed ◀─────────────────┘
//! ```

use std::time::Duration;

use huddle_core::constants;
use huddle_settings::ReconnectSettings;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Linear, capped reconnection backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay added per attempt.
    pub step: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(constants::RECONNECT_STEP_MS),
            max_delay: Duration::from_millis(constants::RECONNECT_MAX_DELAY_MS),
            max_attempts: constants::RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl From<&ReconnectSettings> for BackoffPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            step: Duration::from_millis(settings.step_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_attempts: settings.max_attempts,
        }
    }
}

impl BackoffPolicy {
    /// Delay before 1-based `attempt`, or `None` once attempts are exhausted.
    ///
    /// Formula: `min(step * attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.step.saturating_mul(attempt).min(self.max_delay))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// States, events, effects
// ─────────────────────────────────────────────────────────────────────────────

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// Nothing attempted yet.
    Idle,
    /// A transport open is in flight.
    Connecting,
    /// Transport is open and the identity announced.
    Open,
    /// A deliberate close is in flight.
    Closing,
    /// No transport.
    Closed,
}

/// Inputs to the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Begin connecting.
    Start,
    /// The transport opened.
    Opened,
    /// The transport failed to open.
    OpenFailed,
    /// The transport closed (for any reason).
    Closed,
    /// A scheduled reconnect delay elapsed.
    RetryElapsed,
    /// The application probe timer fired.
    ProbeTick,
    /// The environment suggests connectivity is back (focus, network).
    Wake,
    /// The user asked to leave; ignored unless `confirmed`.
    Exit {
        /// Whether the user confirmed the exit prompt.
        confirmed: bool,
    },
    /// Stop reconnecting without announcing an exit.
    Abandon,
}

/// User-facing status changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Opening a transport.
    Connecting,
    /// Connected and announced.
    Connected,
    /// Waiting `delay` before reconnect `attempt`.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Closed after an exit or with reconnection disabled.
    Disconnected,
    /// Reconnect attempts exhausted.
    GaveUp {
        /// Attempts that were made.
        attempts: u32,
    },
}

/// Work the driver must perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Open the duplex transport.
    OpenTransport,
    /// Close the duplex transport.
    CloseTransport,
    /// Start the application probe timer.
    StartProbe,
    /// Stop the application probe timer.
    StopProbe,
    /// Send `{type:"ping"}`.
    SendPing,
    /// Send `{type:"join", user}`.
    SendJoin,
    /// Send `{type:"get_users"}`.
    RequestRoster,
    /// Send `{type:"exit", user}`.
    SendExit,
    /// Arm the reconnect timer.
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Forget the locally cached roster.
    ClearRoster,
    /// Report a status change.
    Surface(Status),
}

// ─────────────────────────────────────────────────────────────────────────────
// Machine
// ─────────────────────────────────────────────────────────────────────────────

/// The reconnection state machine.
#[derive(Clone, Debug)]
pub struct ReconnectMachine {
    state: ConnState,
    attempt: u32,
    exiting: bool,
    auto_reconnect: bool,
    retry_pending: bool,
    policy: BackoffPolicy,
}

impl ReconnectMachine {
    /// New machine in [`ConnState::Idle`].
    pub fn new(policy: BackoffPolicy, auto_reconnect: bool) -> Self {
        Self {
            state: ConnState::Idle,
            attempt: 0,
            exiting: false,
            auto_reconnect,
            retry_pending: false,
            policy,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether a deliberate exit is in progress or done.
    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// Whether a reconnect timer is armed.
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// True once the machine will never open another transport on its own
    /// and no wake can revive it.
    pub fn is_finished(&self) -> bool {
        self.state == ConnState::Closed && self.exiting
    }

    /// Apply `event` and return the effects to perform, in order.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Start => self.on_start(),
            Event::Opened => self.on_opened(),
            Event::OpenFailed | Event::Closed => self.on_closed(),
            Event::RetryElapsed => self.on_retry(),
            Event::ProbeTick => {
                if self.state == ConnState::Open {
                    vec![Effect::SendPing]
                } else {
                    Vec::new()
                }
            }
            Event::Wake => self.on_wake(),
            Event::Exit { confirmed } => {
                if confirmed {
                    self.on_exit()
                } else {
                    Vec::new()
                }
            }
            Event::Abandon => self.on_abandon(),
        }
    }

    fn begin_connecting(&mut self) -> Vec<Effect> {
        self.state = ConnState::Connecting;
        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        effects.push(Effect::OpenTransport);
        effects.push(Effect::Surface(Status::Connecting));
        effects
    }

    fn on_start(&mut self) -> Vec<Effect> {
        match self.state {
            ConnState::Idle | ConnState::Closed if !self.exiting => self.begin_connecting(),
            _ => Vec::new(),
        }
    }

    fn on_opened(&mut self) -> Vec<Effect> {
        if self.state != ConnState::Connecting {
            return Vec::new();
        }
        if self.exiting {
            self.state = ConnState::Closing;
            return vec![Effect::CloseTransport];
        }
        self.state = ConnState::Open;
        self.attempt = 0;
        vec![
            Effect::StartProbe,
            Effect::SendJoin,
            Effect::RequestRoster,
            Effect::Surface(Status::Connected),
        ]
    }

    fn on_closed(&mut self) -> Vec<Effect> {
        if matches!(self.state, ConnState::Idle | ConnState::Closed) {
            return Vec::new();
        }
        let was_open = self.state == ConnState::Open;
        self.state = ConnState::Closed;

        let mut effects = Vec::new();
        if was_open {
            effects.push(Effect::StopProbe);
        }

        if self.exiting || !self.auto_reconnect {
            effects.push(Effect::Surface(Status::Disconnected));
            return effects;
        }

        self.attempt = self.attempt.saturating_add(1);
        match self.policy.delay_for(self.attempt) {
            Some(delay) => {
                self.retry_pending = true;
                effects.push(Effect::ScheduleReconnect(delay));
                effects.push(Effect::Surface(Status::Reconnecting {
                    attempt: self.attempt,
                    delay,
                }));
            }
            None => {
                effects.push(Effect::Surface(Status::GaveUp {
                    attempts: self.policy.max_attempts,
                }));
            }
        }
        effects
    }

    fn on_retry(&mut self) -> Vec<Effect> {
        if !self.retry_pending || self.exiting || self.state != ConnState::Closed {
            return Vec::new();
        }
        self.retry_pending = false;
        self.state = ConnState::Connecting;
        vec![Effect::OpenTransport, Effect::Surface(Status::Connecting)]
    }

    fn on_wake(&mut self) -> Vec<Effect> {
        let busy = matches!(
            self.state,
            ConnState::Open | ConnState::Connecting | ConnState::Closing
        );
        if self.exiting || busy {
            return Vec::new();
        }
        self.begin_connecting()
    }

    fn on_exit(&mut self) -> Vec<Effect> {
        self.exiting = true;
        self.auto_reconnect = false;

        let mut effects = vec![Effect::StopProbe];
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        match self.state {
            ConnState::Open => {
                effects.push(Effect::SendExit);
                effects.push(Effect::CloseTransport);
                self.state = ConnState::Closing;
            }
            ConnState::Connecting => {
                effects.push(Effect::CloseTransport);
                self.state = ConnState::Closing;
            }
            ConnState::Closing => {}
            ConnState::Idle | ConnState::Closed => {
                self.state = ConnState::Closed;
                effects.push(Effect::Surface(Status::Disconnected));
            }
        }
        effects.push(Effect::ClearRoster);
        effects
    }

    fn on_abandon(&mut self) -> Vec<Effect> {
        self.auto_reconnect = false;
        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if matches!(self.state, ConnState::Open | ConnState::Connecting) {
            effects.push(Effect::CloseTransport);
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn machine() -> ReconnectMachine {
        ReconnectMachine::new(BackoffPolicy::default(), true)
    }

    fn open(m: &mut ReconnectMachine) {
        let _ = m.handle(Event::Start);
        let _ = m.handle(Event::Opened);
        assert_eq!(m.state(), ConnState::Open);
    }

    fn scheduled(effects: &[Effect]) -> Option<Duration> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect(d) => Some(*d),
            _ => None,
        })
    }

    #[test]
    fn start_opens_transport() {
        let mut m = machine();
        let effects = m.handle(Event::Start);
        assert_eq!(m.state(), ConnState::Connecting);
        assert_eq!(
            effects,
            vec![Effect::OpenTransport, Effect::Surface(Status::Connecting)]
        );
    }

    #[test]
    fn opened_starts_probe_and_announces() {
        let mut m = machine();
        let _ = m.handle(Event::Start);
        let effects = m.handle(Event::Opened);
        assert_eq!(
            effects,
            vec![
                Effect::StartProbe,
                Effect::SendJoin,
                Effect::RequestRoster,
                Effect::Surface(Status::Connected),
            ]
        );
    }

    #[test]
    fn probe_only_while_open() {
        let mut m = machine();
        assert!(m.handle(Event::ProbeTick).is_empty());
        open(&mut m);
        assert_eq!(m.handle(Event::ProbeTick), vec![Effect::SendPing]);
    }

    #[test]
    fn backoff_sequence_then_give_up() {
        let mut m = machine();
        open(&mut m);

        let mut delays = Vec::new();
        loop {
            let effects = m.handle(Event::Closed);
            match scheduled(&effects) {
                Some(d) => {
                    delays.push(d.as_millis());
                    let reopen = m.handle(Event::RetryElapsed);
                    assert_eq!(reopen[0], Effect::OpenTransport);
                    // The attempt fails before opening.
                }
                None => {
                    assert!(effects.contains(&Effect::Surface(Status::GaveUp { attempts: 10 })));
                    break;
                }
            }
        }
        assert_eq!(
            delays,
            vec![2000, 4000, 6000, 8000, 10000, 10000, 10000, 10000, 10000, 10000]
        );
        assert_eq!(m.state(), ConnState::Closed);
        assert!(m.handle(Event::RetryElapsed).is_empty());
    }

    #[test]
    fn successful_open_resets_attempts() {
        let mut m = machine();
        open(&mut m);
        let _ = m.handle(Event::Closed);
        let _ = m.handle(Event::RetryElapsed);
        let _ = m.handle(Event::OpenFailed);
        assert_eq!(m.attempt(), 2);

        let _ = m.handle(Event::RetryElapsed);
        let _ = m.handle(Event::Opened);
        assert_eq!(m.attempt(), 0);

        let effects = m.handle(Event::Closed);
        assert_eq!(scheduled(&effects), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn close_while_open_stops_probe() {
        let mut m = machine();
        open(&mut m);
        let effects = m.handle(Event::Closed);
        assert_eq!(effects[0], Effect::StopProbe);
    }

    #[test]
    fn reconnect_disabled_stays_closed() {
        let mut m = ReconnectMachine::new(BackoffPolicy::default(), false);
        open(&mut m);
        let effects = m.handle(Event::Closed);
        assert!(effects.contains(&Effect::Surface(Status::Disconnected)));
        assert_eq!(scheduled(&effects), None);
    }

    #[test]
    fn wake_reconnects_when_closed() {
        let mut m = machine();
        open(&mut m);
        let _ = m.handle(Event::Closed);
        assert!(m.retry_pending());

        let effects = m.handle(Event::Wake);
        assert_eq!(
            effects,
            vec![
                Effect::CancelReconnect,
                Effect::OpenTransport,
                Effect::Surface(Status::Connecting),
            ]
        );
        assert!(!m.retry_pending());
        assert!(m.handle(Event::RetryElapsed).is_empty());
    }

    #[test]
    fn wake_ignored_while_open_or_connecting() {
        let mut m = machine();
        let _ = m.handle(Event::Start);
        assert!(m.handle(Event::Wake).is_empty());
        let _ = m.handle(Event::Opened);
        assert!(m.handle(Event::Wake).is_empty());
    }

    #[test]
    fn wake_revives_after_give_up() {
        let policy = BackoffPolicy {
            max_attempts: 1,
            ..BackoffPolicy::default()
        };
        let mut m = ReconnectMachine::new(policy, true);
        open(&mut m);
        let _ = m.handle(Event::Closed);
        let _ = m.handle(Event::RetryElapsed);
        let effects = m.handle(Event::OpenFailed);
        assert!(effects.contains(&Effect::Surface(Status::GaveUp { attempts: 1 })));

        assert_eq!(m.handle(Event::Wake)[0], Effect::OpenTransport);
    }

    #[test]
    fn unconfirmed_exit_is_ignored() {
        let mut m = machine();
        open(&mut m);
        assert!(m.handle(Event::Exit { confirmed: false }).is_empty());
        assert_eq!(m.state(), ConnState::Open);
        assert!(!m.is_exiting());
    }

    #[test]
    fn exit_while_open() {
        let mut m = machine();
        open(&mut m);
        let effects = m.handle(Event::Exit { confirmed: true });
        assert_eq!(
            effects,
            vec![
                Effect::StopProbe,
                Effect::SendExit,
                Effect::CloseTransport,
                Effect::ClearRoster,
            ]
        );
        assert_eq!(m.state(), ConnState::Closing);

        let effects = m.handle(Event::Closed);
        assert_eq!(effects, vec![Effect::Surface(Status::Disconnected)]);
        assert!(m.is_finished());
    }

    #[test]
    fn exit_blocks_every_reconnect_path() {
        let mut m = machine();
        open(&mut m);
        let _ = m.handle(Event::Exit { confirmed: true });
        let _ = m.handle(Event::Closed);

        assert!(m.handle(Event::Wake).is_empty());
        assert!(m.handle(Event::Start).is_empty());
        assert!(m.handle(Event::RetryElapsed).is_empty());
        assert_eq!(m.state(), ConnState::Closed);
    }

    #[test]
    fn exit_while_waiting_to_retry() {
        let mut m = machine();
        open(&mut m);
        let _ = m.handle(Event::Closed);
        let effects = m.handle(Event::Exit { confirmed: true });
        assert!(effects.contains(&Effect::CancelReconnect));
        assert!(!effects.contains(&Effect::SendExit));
        assert!(effects.contains(&Effect::Surface(Status::Disconnected)));
        assert!(m.is_finished());
    }

    #[test]
    fn exit_during_connect_closes_once_opened() {
        let mut m = machine();
        let _ = m.handle(Event::Start);
        let effects = m.handle(Event::Exit { confirmed: true });
        assert!(effects.contains(&Effect::CloseTransport));
        assert!(!effects.contains(&Effect::SendExit));
        assert!(m.handle(Event::Opened).is_empty());
        let _ = m.handle(Event::Closed);
        assert!(m.is_finished());
    }

    #[test]
    fn abandon_stops_reconnecting_without_exit() {
        let mut m = machine();
        open(&mut m);
        let effects = m.handle(Event::Abandon);
        assert_eq!(effects, vec![Effect::CloseTransport]);
        let effects = m.handle(Event::Closed);
        assert!(effects.contains(&Effect::Surface(Status::Disconnected)));
        assert!(!m.is_exiting());
    }

    #[test]
    fn policy_from_settings() {
        let settings = ReconnectSettings {
            enabled: true,
            max_attempts: 3,
            step_ms: 100,
            max_delay_ms: 250,
        };
        let policy = BackoffPolicy::from(&settings);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for(4), None);
        assert_eq!(policy.delay_for(0), None);
    }

    proptest! {
        #[test]
        fn delay_matches_formula(attempt in 1u32..=10) {
            let policy = BackoffPolicy::default();
            let expected = (2000 * u64::from(attempt)).min(10_000);
            prop_assert_eq!(policy.delay_for(attempt), Some(Duration::from_millis(expected)));
        }

        #[test]
        fn no_delay_past_max_attempts(attempt in 11u32..10_000) {
            prop_assert_eq!(BackoffPolicy::default().delay_for(attempt), None);
        }

        #[test]
        fn delays_are_monotonic_and_capped(
            step_ms in 1u64..5_000,
            cap_ms in 1u64..60_000,
            max_attempts in 1u32..50,
        ) {
            let policy = BackoffPolicy {
                step: Duration::from_millis(step_ms),
                max_delay: Duration::from_millis(cap_ms),
                max_attempts,
            };
            let mut previous = Duration::ZERO;
            for attempt in 1..=max_attempts {
                let delay = policy.delay_for(attempt).unwrap();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= policy.max_delay);
                previous = delay;
            }
            prop_assert_eq!(policy.delay_for(max_attempts + 1), None);
        }

        #[test]
        fn exit_is_terminal_under_any_event_sequence(
            events in proptest::collection::vec(0u8..7, 0..40)
        ) {
            let mut m = machine();
            open(&mut m);
            let _ = m.handle(Event::Exit { confirmed: true });
            let _ = m.handle(Event::Closed);
            for code in events {
                let event = match code {
                    0 => Event::Start,
                    1 => Event::Opened,
                    2 => Event::OpenFailed,
                    3 => Event::Closed,
                    4 => Event::RetryElapsed,
                    5 => Event::Wake,
                    _ => Event::ProbeTick,
                };
                let effects = m.handle(event);
                prop_assert!(!effects.contains(&Effect::OpenTransport));
                prop_assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleReconnect(_))));
            }
            prop_assert_eq!(m.state(), ConnState::Closed);
        }
    }
}
