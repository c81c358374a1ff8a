use clap::Parser;
use color_print::cformat;
use marker_ring::{
    config::{self, NodeConfig, SnapshotTrigger},
    log, Node, Result, RingError, CONNECT_ATTEMPTS, DEFAULT_PORT, DEFAULT_PROCESSES,
    FORWARD_ATTEMPTS,
};
use std::{path::PathBuf, process::ExitCode};

/// One process of a token ring that can take Chandy-Lamport snapshots.
#[derive(Parser, Debug)]
#[command(name = "marker-ring", version, about)]
struct Cli {
    /// File with one peer address per line; the order is the ring order.
    #[arg(short = 'f', long, value_name = "PATH")]
    hostfile: PathBuf,

    /// Start the ring with the token.
    #[arg(short = 'x', long = "token")]
    token: bool,

    /// Seconds to hold the token before forwarding it.
    #[arg(short = 't', long, value_name = "SECS", default_value_t = 0.0)]
    token_delay: f64,

    /// Seconds to wait before forwarding a marker.
    #[arg(short = 'm', long, value_name = "SECS", default_value_t = 0.0)]
    marker_delay: f64,

    /// Start a snapshot once this many tokens were received.
    #[arg(short = 's', long, value_name = "STATE", requires = "snapshot_id")]
    snapshot_state: Option<u64>,

    /// Id of the snapshot started at `--snapshot-state`.
    #[arg(short = 'p', long, value_name = "ID", requires = "snapshot_state")]
    snapshot_id: Option<u64>,

    /// Address of this process as written in the hostfile (default: $HOSTNAME).
    #[arg(long, value_name = "ADDR")]
    address: Option<String>,

    /// Number of processes the hostfile must list.
    #[arg(long, default_value_t = DEFAULT_PROCESSES)]
    processes: usize,

    /// Port used for hostfile entries without one.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Attempts to connect to the successor.
    #[arg(long, default_value_t = CONNECT_ATTEMPTS)]
    connect_attempts: u32,

    /// Attempts to forward one message before giving up.
    #[arg(long, default_value_t = FORWARD_ATTEMPTS)]
    forward_attempts: u32,

    /// Seconds between two connect or forward attempts.
    #[arg(long, value_name = "SECS", default_value_t = 1.0)]
    retry_delay: f64,

    /// Add a Poisson distributed delay with this rate (per second) to each token hold.
    #[arg(long, value_name = "RATE")]
    jitter_rate: Option<f64>,
}

impl Cli {
    fn into_config(self) -> Result<NodeConfig> {
        let peers = config::load_membership(&self.hostfile, self.port)?;
        let own_address = match &self.address {
            Some(address) => config::with_default_port(address, self.port),
            None => config::own_address_from_env(self.port).ok_or_else(|| {
                RingError::configuration("no --address given and $HOSTNAME is not set")
            })?,
        };

        let mut node_config = NodeConfig::new(peers, own_address)
            .with_token(self.token)
            .with_token_delay(config::seconds(self.token_delay, "--token-delay")?)
            .with_marker_delay(config::seconds(self.marker_delay, "--marker-delay")?)
            .with_retry_delay(config::seconds(self.retry_delay, "--retry-delay")?);
        node_config.expected_processes = self.processes;
        node_config.connect_attempts = self.connect_attempts;
        node_config.forward_attempts = self.forward_attempts;
        node_config.jitter_rate = self.jitter_rate;

        match (self.snapshot_state, self.snapshot_id) {
            (Some(at_state), Some(snapshot_id)) => {
                node_config = node_config.with_snapshot_trigger(SnapshotTrigger {
                    at_state,
                    snapshot_id,
                })
            }
            (None, None) => {}
            _ => {
                return Err(RingError::configuration(
                    "both snapshot state and snapshot id must be provided",
                ))
            }
        }
        Ok(node_config)
    }
}

async fn run(cli: Cli) -> Result<()> {
    let node = Node::new(cli.into_config()?)?;
    let handle = node.spawn().await?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info(&cformat!("Received <bold>ctrl-c</bold>, shutting down."));
            cancel.cancel();
        }
    });

    handle.join().await
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error(&format!("{e}"));
            ExitCode::FAILURE
        }
    }
}
