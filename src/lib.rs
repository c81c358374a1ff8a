use std::time::Duration;

pub mod channel;
pub mod config;
pub mod error;
pub mod log;
pub mod mailbox;
pub mod message;
pub mod node;
pub mod poisson;
pub mod ring;
pub mod snapshot;
pub mod state;
pub mod token;

pub use config::{NodeConfig, SnapshotTrigger};
pub use error::{Result, RingError};
pub use message::Message;
pub use node::{Node, NodeHandle};
pub use ring::{ProcessId, ProcessIdentity, RingView};
pub use snapshot::SnapshotResult;
pub use state::{NodeEvent, ProcessReport};

/// Port a membership entry without one listens on.
pub const DEFAULT_PORT: u16 = 7000;
/// Number of processes in a ring.
pub const DEFAULT_PROCESSES: usize = 5;
pub const CONNECT_ATTEMPTS: u32 = 10;
pub const FORWARD_ATTEMPTS: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
