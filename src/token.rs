//! Module that keeps the token circulating around the ring.

use crate::poisson::Poisson;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of tokens a process has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub circulation_count: u64,
}

/// Enum that tells where a process is in the token cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    AwaitingToken,
    TokenHeld,
    Forwarding,
}

pub struct TokenEngine {
    pub state: TokenState,
    pub phase: TokenPhase,
    pub forwarded: u64,
    token_delay: Duration,
    jitter: Option<Poisson<SmallRng>>,
}

impl TokenEngine {
    pub fn new(token_delay: Duration, jitter: Option<Poisson<SmallRng>>) -> Self {
        Self {
            state: TokenState::default(),
            phase: TokenPhase::AwaitingToken,
            forwarded: 0,
            token_delay,
            jitter,
        }
    }

    /// Function that takes hold of a received token and returns how long to keep it
    /// before forwarding.
    pub fn receive(&mut self) -> Duration {
        self.state.circulation_count += 1;
        self.phase = TokenPhase::TokenHeld;
        self.hold_delay()
    }

    /// Called when the token has been placed in the mailbox. The send loop may already
    /// have forwarded it, in which case the phase stays `AwaitingToken`.
    pub fn enqueued(&mut self) {
        if self.phase == TokenPhase::TokenHeld {
            self.phase = TokenPhase::Forwarding;
        }
    }

    /// Called when the token has been handed to the transport.
    pub fn forwarded(&mut self) {
        self.forwarded += 1;
        self.phase = TokenPhase::AwaitingToken;
    }

    fn hold_delay(&mut self) -> Duration {
        match &mut self.jitter {
            Some(jitter) => self.token_delay.saturating_add(jitter.next_delay()),
            None => self.token_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_increment_per_token() {
        let mut engine = TokenEngine::new(Duration::from_millis(20), None);
        assert_eq!(engine.phase, TokenPhase::AwaitingToken);

        assert_eq!(engine.receive(), Duration::from_millis(20));
        assert_eq!(engine.phase, TokenPhase::TokenHeld);
        engine.enqueued();
        assert_eq!(engine.phase, TokenPhase::Forwarding);
        engine.forwarded();
        assert_eq!(engine.phase, TokenPhase::AwaitingToken);

        engine.receive();
        assert_eq!(engine.state.circulation_count, 2);
        assert_eq!(engine.forwarded, 1);
    }

    #[test]
    fn forward_before_enqueue_leaves_process_idle() {
        let mut engine = TokenEngine::new(Duration::ZERO, None);
        engine.receive();
        engine.forwarded();
        engine.enqueued();
        assert_eq!(engine.phase, TokenPhase::AwaitingToken);
        assert_eq!(engine.forwarded, 1);
    }

    #[test]
    fn jitter_only_adds_delay() {
        let base = Duration::from_millis(5);
        let mut engine = TokenEngine::new(base, Some(Poisson::new(1000.0, &[3; 32])));
        for _ in 0..100 {
            assert!(engine.receive() >= base);
        }
    }

    #[test]
    fn long_hold_with_jitter_saturates() {
        let mut engine = TokenEngine::new(Duration::MAX, Some(Poisson::new(1.0, &[5; 32])));
        assert_eq!(engine.receive(), Duration::MAX);
    }
}
