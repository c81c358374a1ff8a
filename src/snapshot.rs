//! Module that implements the marker protocol of a Chandy-Lamport snapshot on a ring.
//!
//! A process records its token state when it starts a snapshot or when the first marker
//! of a snapshot reaches it, and then logs every token that arrives on an inbound channel
//! until that channel's marker shows up. Those logs are the in-transit part of the cut.

use crate::{
    error::{Result, RingError},
    message::Message,
    ring::ProcessId,
    token::TokenState,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    Idle,
    Initiated,
    Recording,
    Complete,
}

/// Directed edge between two processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    pub from: ProcessId,
    pub to: ProcessId,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Tokens recorded as in transit on one inbound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel: ChannelId,
    pub messages: Vec<Message>,
}

/// Struct that represents the part of a global snapshot recorded by one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub process_id: ProcessId,
    pub snapshot_id: u64,
    pub initiator: ProcessId,
    pub local_state: TokenState,
    pub recorded_channels: Vec<ChannelRecord>,
}

impl SnapshotResult {
    /// Number of tokens recorded in transit on all inbound channels of this process.
    pub fn tokens_in_transit(&self) -> usize {
        self.recorded_channels
            .iter()
            .flat_map(|record| &record.messages)
            .filter(|message| matches!(message, Message::Token { .. }))
            .count()
    }

    pub fn to_json_string(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone)]
struct InboundChannel {
    id: ChannelId,
    marker_received: bool,
    recorded: Vec<Message>,
}

#[derive(Debug, Clone)]
struct ActiveSnapshot {
    snapshot_id: u64,
    initiator: ProcessId,
    local_state: TokenState,
    channels: Vec<InboundChannel>,
}

impl ActiveSnapshot {
    fn all_markers_received(&self) -> bool {
        self.channels.iter().all(|channel| channel.marker_received)
    }
}

/// Enum that tells the caller what to do after a marker arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// First marker of this snapshot: forward it. Carries the result when that marker
    /// closed every inbound channel at once.
    Forward(Option<SnapshotResult>),
    /// The marker closed the last open channel of a snapshot already being recorded.
    Completed(SnapshotResult),
    /// Marker of a closed channel or of a finished or abandoned snapshot.
    Duplicate,
    /// Marker of a snapshot with a higher id than the active one.
    Rejected { active: u64 },
}

pub struct SnapshotCoordinator {
    process: ProcessId,
    inbound: Vec<ChannelId>,
    status: SnapshotStatus,
    active: Option<ActiveSnapshot>,
    finished: BTreeSet<u64>,
    abandoned: BTreeSet<u64>,
    last_finished: Option<u64>,
}

impl SnapshotCoordinator {
    pub fn new(process: ProcessId, inbound: Vec<ChannelId>) -> Self {
        Self {
            process,
            inbound,
            status: SnapshotStatus::Idle,
            active: None,
            finished: BTreeSet::new(),
            abandoned: BTreeSet::new(),
            last_finished: None,
        }
    }

    pub fn status(&self) -> SnapshotStatus {
        self.status
    }

    pub fn active_snapshot(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.snapshot_id)
    }

    pub fn finished_snapshots(&self) -> impl Iterator<Item = u64> + '_ {
        self.finished.iter().copied()
    }

    /// Function that starts snapshot `snapshot_id` from this process with `local_state`
    /// as its recorded state. The caller must send the marker before any further token.
    pub fn initiate(&mut self, snapshot_id: u64, local_state: TokenState) -> Result<()> {
        // a complete snapshot whose result was not emitted yet still counts as active
        let active = match (&self.active, self.status) {
            (Some(active), _) => Some(active.snapshot_id),
            (None, SnapshotStatus::Complete) => self.last_finished,
            _ => None,
        };
        if let Some(active) = active {
            return Err(RingError::SnapshotAlreadyInProgress {
                process: self.process,
                active,
                requested: snapshot_id,
            });
        }
        if self.finished.contains(&snapshot_id) || self.abandoned.contains(&snapshot_id) {
            return Err(RingError::SnapshotIdReused {
                process: self.process,
                snapshot_id,
            });
        }

        self.active = Some(self.open(snapshot_id, self.process, local_state));
        self.status = SnapshotStatus::Initiated;
        Ok(())
    }

    /// Called once the marker of `snapshot_id` has been handed to the transport.
    pub fn marker_sent(&mut self, snapshot_id: u64) {
        if self.status == SnapshotStatus::Initiated && self.active_snapshot() == Some(snapshot_id)
        {
            self.status = SnapshotStatus::Recording;
        }
    }

    /// Function that applies a marker of snapshot `snapshot_id` that arrived on `channel`.
    ///
    /// Only one snapshot runs at a time. When markers of two snapshots meet, the lower id
    /// wins: a lower-id marker abandons the active snapshot and a higher-id marker is
    /// rejected, so two processes that start snapshots together cannot block each other.
    pub fn on_marker(
        &mut self,
        channel: ChannelId,
        snapshot_id: u64,
        initiator: ProcessId,
        local_state: TokenState,
    ) -> MarkerOutcome {
        if self.finished.contains(&snapshot_id) || self.abandoned.contains(&snapshot_id) {
            return MarkerOutcome::Duplicate;
        }

        match &mut self.active {
            None => self.adopt(channel, snapshot_id, initiator, local_state),
            Some(active) if snapshot_id < active.snapshot_id => {
                let abandoned = active.snapshot_id;
                self.abandoned.insert(abandoned);
                self.active = None;
                self.adopt(channel, snapshot_id, initiator, local_state)
            }
            Some(active) if active.snapshot_id == snapshot_id => {
                match active.channels.iter_mut().find(|c| c.id == channel) {
                    Some(inbound) if !inbound.marker_received => inbound.marker_received = true,
                    _ => return MarkerOutcome::Duplicate,
                }
                if !active.all_markers_received() {
                    return MarkerOutcome::Duplicate;
                }
                match self.complete() {
                    Some(result) => MarkerOutcome::Completed(result),
                    None => MarkerOutcome::Duplicate,
                }
            }
            Some(active) => MarkerOutcome::Rejected {
                active: active.snapshot_id,
            },
        }
    }

    /// Function that logs `token` as in transit on `channel` when that channel is still
    /// open in the active snapshot. Returns whether the token was recorded.
    pub fn on_token(&mut self, channel: ChannelId, token: &Message) -> bool {
        let Some(active) = &mut self.active else {
            return false;
        };
        match active
            .channels
            .iter_mut()
            .find(|c| c.id == channel && !c.marker_received)
        {
            Some(inbound) => {
                inbound.recorded.push(token.clone());
                true
            }
            None => false,
        }
    }

    /// Ids of snapshots given up for a lower concurrent one.
    pub fn abandoned_snapshots(&self) -> impl Iterator<Item = u64> + '_ {
        self.abandoned.iter().copied()
    }

    /// Function that goes back to `Idle` after the result of a complete snapshot was emitted.
    pub fn reset(&mut self) {
        if self.status == SnapshotStatus::Complete {
            self.status = SnapshotStatus::Idle;
        }
    }

    fn adopt(
        &mut self,
        channel: ChannelId,
        snapshot_id: u64,
        initiator: ProcessId,
        local_state: TokenState,
    ) -> MarkerOutcome {
        let mut active = self.open(snapshot_id, initiator, local_state);
        if let Some(inbound) = active.channels.iter_mut().find(|c| c.id == channel) {
            inbound.marker_received = true;
        }
        let done = active.all_markers_received();
        self.active = Some(active);
        self.status = SnapshotStatus::Recording;
        MarkerOutcome::Forward(if done { self.complete() } else { None })
    }

    fn open(&self, snapshot_id: u64, initiator: ProcessId, local_state: TokenState) -> ActiveSnapshot {
        ActiveSnapshot {
            snapshot_id,
            initiator,
            local_state,
            channels: self
                .inbound
                .iter()
                .map(|id| InboundChannel {
                    id: *id,
                    marker_received: false,
                    recorded: Vec::new(),
                })
                .collect(),
        }
    }

    fn complete(&mut self) -> Option<SnapshotResult> {
        let active = self.active.take()?;
        self.finished.insert(active.snapshot_id);
        self.last_finished = Some(active.snapshot_id);
        self.status = SnapshotStatus::Complete;

        Some(SnapshotResult {
            process_id: self.process,
            snapshot_id: active.snapshot_id,
            initiator: active.initiator,
            local_state: active.local_state,
            recorded_channels: active
                .channels
                .into_iter()
                .map(|channel| ChannelRecord {
                    channel: channel.id,
                    messages: channel.recorded,
                })
                .collect(),
        })
    }
}
