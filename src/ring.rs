//! Module that derives the ring neighbours of a process from the ordered membership list.

use crate::error::{Result, RingError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Id of a process, `1..=N` in membership order.
pub type ProcessId = u32;

/// Maximum length in bytes of one membership entry.
pub const MAX_ADDRESS_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub id: ProcessId,
    pub address: String,
}

/// Struct that represents where a process sits in the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingView {
    pub own: ProcessIdentity,
    pub predecessor: ProcessIdentity,
    pub successor: ProcessIdentity,
    pub all: Vec<ProcessIdentity>,
}

impl RingView {
    /// Function that resolves the ring view of the process whose address is `own_address`.
    ///
    /// Fails when the list is not exactly `expected` entries long, when an entry is empty,
    /// too long or repeated, or when `own_address` is not in the list.
    pub fn resolve(peers: &[String], own_address: &str, expected: usize) -> Result<Self> {
        if expected < 2 {
            return Err(RingError::configuration(format!(
                "a ring needs at least 2 processes, got {expected}"
            )));
        }
        if peers.len() != expected {
            return Err(RingError::configuration(format!(
                "invalid number of processes in membership list, expected {expected}, got {}",
                peers.len()
            )));
        }

        let mut seen = HashSet::with_capacity(peers.len());
        for (line, peer) in peers.iter().enumerate() {
            if peer.is_empty() {
                return Err(RingError::configuration(format!(
                    "empty membership entry at line {}",
                    line + 1
                )));
            }
            if peer.len() > MAX_ADDRESS_LENGTH {
                return Err(RingError::configuration(format!(
                    "membership entry at line {} is longer than {MAX_ADDRESS_LENGTH} bytes",
                    line + 1
                )));
            }
            if !seen.insert(peer.as_str()) {
                return Err(RingError::configuration(format!(
                    "duplicate membership entry '{peer}'"
                )));
            }
        }

        let index = peers
            .iter()
            .position(|peer| peer == own_address)
            .ok_or_else(|| {
                RingError::configuration(format!(
                    "could not find '{own_address}' in the membership list"
                ))
            })?;

        let all: Vec<ProcessIdentity> = peers
            .iter()
            .enumerate()
            .map(|(i, address)| ProcessIdentity {
                id: i as ProcessId + 1,
                address: address.clone(),
            })
            .collect();

        let n = all.len();
        Ok(Self {
            own: all[index].clone(),
            predecessor: all[(index + n - 1) % n].clone(),
            successor: all[(index + 1) % n].clone(),
            all,
        })
    }

    pub fn id(&self) -> ProcessId {
        self.own.id
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Function that returns the successor of any process in this ring.
    pub fn successor_of(&self, id: ProcessId) -> Option<&ProcessIdentity> {
        let index = self.index_of(id)?;
        self.all.get((index + 1) % self.all.len())
    }

    /// Function that returns the predecessor of any process in this ring.
    pub fn predecessor_of(&self, id: ProcessId) -> Option<&ProcessIdentity> {
        let index = self.index_of(id)?;
        let n = self.all.len();
        self.all.get((index + n - 1) % n)
    }

    fn index_of(&self, id: ProcessId) -> Option<usize> {
        self.all.iter().position(|p| p.id == id)
    }
}
