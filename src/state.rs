//! Module that contains the single mutable record of a process.
//!
//! Both the receive loop and the send loop change it, always under the same lock. Handlers
//! never wait: they return a [`Step`] that tells the receive loop what to put in the mailbox
//! and after which delay, so the lock is released before any delay or mailbox put.

use crate::{
    config::{NodeConfig, SnapshotTrigger},
    error::{Result, RingError},
    log,
    message::Message,
    poisson::Poisson,
    ring::{ProcessId, RingView},
    snapshot::{ChannelId, MarkerOutcome, SnapshotCoordinator, SnapshotResult, SnapshotStatus},
    token::{TokenEngine, TokenPhase},
};
use color_print::cformat;
use std::time::Duration;

/// Message to place in the mailbox after waiting `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub message: Message,
    pub delay: Duration,
}

/// Enum that represents the observable state transitions of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    TokenReceived {
        process: ProcessId,
        count: u64,
    },
    TokenForwarded {
        process: ProcessId,
        to: ProcessId,
    },
    MarkerReceived {
        process: ProcessId,
        from: ProcessId,
        snapshot_id: u64,
    },
    MarkerSent {
        process: ProcessId,
        to: ProcessId,
        snapshot_id: u64,
    },
    SnapshotStarted {
        process: ProcessId,
        snapshot_id: u64,
    },
    SnapshotComplete(SnapshotResult),
    MessageDropped {
        process: ProcessId,
        reason: String,
    },
}

/// What the receive loop has to do after a handler ran.
#[derive(Debug, Default)]
pub struct Step {
    pub outbound: Vec<Outbound>,
    pub events: Vec<NodeEvent>,
    pub completed: Option<SnapshotResult>,
}

/// Read copy of a process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub process_id: ProcessId,
    pub predecessor: ProcessId,
    pub successor: ProcessId,
    pub circulation_count: u64,
    pub tokens_forwarded: u64,
    pub token_phase: TokenPhase,
    pub snapshot_status: SnapshotStatus,
    pub active_snapshot: Option<u64>,
    pub finished_snapshots: Vec<u64>,
}

pub struct ProcessState {
    pub view: RingView,
    pub token: TokenEngine,
    pub snapshots: SnapshotCoordinator,
    trigger: Option<SnapshotTrigger>,
    marker_delay: Duration,
}

impl ProcessState {
    pub fn new(view: RingView, config: &NodeConfig) -> Self {
        let jitter = config.jitter_rate.map(Poisson::from_entropy);
        let inbound = ChannelId {
            from: view.predecessor.id,
            to: view.own.id,
        };

        Self {
            snapshots: SnapshotCoordinator::new(view.own.id, vec![inbound]),
            token: TokenEngine::new(config.token_delay, jitter),
            trigger: config.snapshot_trigger,
            marker_delay: config.marker_delay,
            view,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.view.own.id
    }

    pub fn inbound_channel(&self) -> ChannelId {
        ChannelId {
            from: self.view.predecessor.id,
            to: self.view.own.id,
        }
    }

    /// Function that creates the initial token of the ring. It is not counted as received.
    pub fn seed_token(&self) -> Outbound {
        Outbound {
            message: Message::token(self.id(), self.view.successor.id),
            delay: Duration::ZERO,
        }
    }

    /// Function that starts the configured snapshot when its state is already reached.
    pub fn on_start(&mut self) -> Step {
        let mut step = Step::default();
        self.check_trigger(&mut step);
        step
    }

    /// Function that applies a message received from the predecessor.
    pub fn on_message(&mut self, message: Message) -> Result<Step> {
        if message.receiver() != self.id() || message.sender() != self.view.predecessor.id {
            return Err(RingError::MalformedMessage {
                process: self.id(),
                reason: format!(
                    "{} from {} to {} on channel {}",
                    message.kind(),
                    message.sender(),
                    message.receiver(),
                    self.inbound_channel()
                ),
            });
        }

        Ok(match message {
            Message::Token { .. } => self.on_token(message),
            Message::Marker {
                snapshot_id,
                initiator,
                ..
            } => self.on_marker(snapshot_id, initiator),
        })
    }

    /// Function that starts snapshot `snapshot_id` from this process.
    pub fn request_snapshot(&mut self, snapshot_id: u64) -> Result<Step> {
        let mut step = Step::default();
        self.initiate(snapshot_id, &mut step)?;
        Ok(step)
    }

    /// Called by the receive loop once `message` is in the mailbox.
    pub fn on_enqueued(&mut self, message: &Message) {
        if let Message::Token { .. } = message {
            self.token.enqueued();
        }
    }

    /// Called by the send loop once `message` was handed to the transport.
    pub fn on_sent(&mut self, message: &Message) -> NodeEvent {
        match message {
            Message::Token { receiver, .. } => {
                self.token.forwarded();
                NodeEvent::TokenForwarded {
                    process: self.id(),
                    to: *receiver,
                }
            }
            Message::Marker {
                receiver,
                snapshot_id,
                ..
            } => {
                self.snapshots.marker_sent(*snapshot_id);
                NodeEvent::MarkerSent {
                    process: self.id(),
                    to: *receiver,
                    snapshot_id: *snapshot_id,
                }
            }
        }
    }

    /// Called once the result of a complete snapshot was emitted.
    pub fn finish_snapshot(&mut self) {
        self.snapshots.reset();
    }

    pub fn report(&self) -> ProcessReport {
        ProcessReport {
            process_id: self.id(),
            predecessor: self.view.predecessor.id,
            successor: self.view.successor.id,
            circulation_count: self.token.state.circulation_count,
            tokens_forwarded: self.token.forwarded,
            token_phase: self.token.phase,
            snapshot_status: self.snapshots.status(),
            active_snapshot: self.snapshots.active_snapshot(),
            finished_snapshots: self.snapshots.finished_snapshots().collect(),
        }
    }

    fn on_token(&mut self, token: Message) -> Step {
        let mut step = Step::default();

        if self.snapshots.on_token(self.inbound_channel(), &token) {
            log::debug(&cformat!(
                "Recorded <yellow, bold>token</yellow, bold> on channel <bold>{}</bold>.",
                self.inbound_channel()
            ));
        }

        let delay = self.token.receive();
        let count = self.token.state.circulation_count;
        log::state(self.id(), count);
        step.events.push(NodeEvent::TokenReceived {
            process: self.id(),
            count,
        });

        // the marker has to leave before the token it was taken ahead of
        self.check_trigger(&mut step);

        step.outbound.push(Outbound {
            message: Message::token(self.id(), self.view.successor.id),
            delay,
        });
        step
    }

    fn on_marker(&mut self, snapshot_id: u64, initiator: ProcessId) -> Step {
        let mut step = Step::default();
        let from = self.view.predecessor.id;

        log::info(&cformat!(
            "proc_id: <bold>{}</bold>, received <cyan, bold>marker</cyan, bold> of snapshot <bold>{snapshot_id}</bold> from <bold>{from}</bold>",
            self.id()
        ));
        step.events.push(NodeEvent::MarkerReceived {
            process: self.id(),
            from,
            snapshot_id,
        });

        let local_state = self.token.state;
        let previous = self.snapshots.active_snapshot();
        match self
            .snapshots
            .on_marker(self.inbound_channel(), snapshot_id, initiator, local_state)
        {
            MarkerOutcome::Forward(result) => {
                if let Some(abandoned) = previous {
                    log::warn(&cformat!(
                        "proc_id: <bold>{}</bold>, abandoned snapshot <bold>{abandoned}</bold> for snapshot <bold>{snapshot_id}</bold>",
                        self.id()
                    ));
                }
                log::info(&cformat!(
                    "proc_id: <bold>{}</bold>, snapshot <bold>{snapshot_id}</bold> recorded state <bold>{}</bold>",
                    self.id(),
                    local_state.circulation_count
                ));
                step.outbound.push(Outbound {
                    message: Message::marker(
                        self.id(),
                        self.view.successor.id,
                        snapshot_id,
                        initiator,
                    ),
                    delay: self.marker_delay,
                });
                step.completed = result;
            }
            MarkerOutcome::Completed(result) => step.completed = Some(result),
            MarkerOutcome::Duplicate => log::warn(&cformat!(
                "proc_id: <bold>{}</bold>, ignored duplicate <cyan, bold>marker</cyan, bold> of snapshot <bold>{snapshot_id}</bold>",
                self.id()
            )),
            MarkerOutcome::Rejected { active } => {
                let e = RingError::SnapshotAlreadyInProgress {
                    process: self.id(),
                    active,
                    requested: snapshot_id,
                };
                log::warn(&format!("{e}"));
                step.events.push(NodeEvent::MessageDropped {
                    process: self.id(),
                    reason: e.to_string(),
                });
            }
        }

        step
    }

    fn check_trigger(&mut self, step: &mut Step) {
        let Some(trigger) = self.trigger else {
            return;
        };
        if trigger.at_state != self.token.state.circulation_count {
            return;
        }
        // one shot
        self.trigger = None;
        if let Err(e) = self.initiate(trigger.snapshot_id, step) {
            log::warn(&format!("{e}"));
        }
    }

    fn initiate(&mut self, snapshot_id: u64, step: &mut Step) -> Result<()> {
        let local_state = self.token.state;
        self.snapshots.initiate(snapshot_id, local_state)?;

        log::info(&cformat!(
            "proc_id: <bold>{}</bold>, snapshot <bold>{snapshot_id}</bold> started with state <bold>{}</bold>",
            self.id(),
            local_state.circulation_count
        ));
        step.events.push(NodeEvent::SnapshotStarted {
            process: self.id(),
            snapshot_id,
        });
        step.outbound.push(Outbound {
            message: Message::marker(self.id(), self.view.successor.id, snapshot_id, self.id()),
            delay: self.marker_delay,
        });
        Ok(())
    }
}
