//! Module that contains the configuration of a process and the membership file loader.

use crate::{
    error::{Result, RingError},
    ring::{RingView, MAX_ADDRESS_LENGTH},
    CONNECT_ATTEMPTS, DEFAULT_PROCESSES, FORWARD_ATTEMPTS, RETRY_DELAY,
};
use std::{path::Path, time::Duration};

/// Struct that tells a process to start snapshot `snapshot_id` once it has received
/// `at_state` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTrigger {
    pub at_state: u64,
    pub snapshot_id: u64,
}

/// Smallest jitter rate accepted, i.e. a mean extra hold of 1000 seconds.
pub const MIN_JITTER_RATE: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Ordered `host:port` entries; the order is the ring order.
    pub peers: Vec<String>,
    pub own_address: String,
    pub expected_processes: usize,
    /// Whether this process injects the token when the ring starts.
    pub holds_token: bool,
    pub token_delay: Duration,
    pub marker_delay: Duration,
    pub snapshot_trigger: Option<SnapshotTrigger>,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    pub forward_attempts: u32,
    /// Rate in events per second of the extra Poisson delay added to each token hold.
    pub jitter_rate: Option<f64>,
    /// Address the inbound listener binds to. Defaults to all interfaces on the own port.
    pub listen_address: Option<String>,
}

impl NodeConfig {
    pub fn new(peers: Vec<String>, own_address: impl Into<String>) -> Self {
        Self {
            peers,
            own_address: own_address.into(),
            expected_processes: DEFAULT_PROCESSES,
            holds_token: false,
            token_delay: Duration::ZERO,
            marker_delay: Duration::ZERO,
            snapshot_trigger: None,
            connect_attempts: CONNECT_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            forward_attempts: FORWARD_ATTEMPTS,
            jitter_rate: None,
            listen_address: None,
        }
    }

    pub fn with_token(mut self, holds_token: bool) -> Self {
        self.holds_token = holds_token;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn with_marker_delay(mut self, delay: Duration) -> Self {
        self.marker_delay = delay;
        self
    }

    pub fn with_snapshot_trigger(mut self, trigger: SnapshotTrigger) -> Self {
        self.snapshot_trigger = Some(trigger);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_jitter_rate(mut self, rate: f64) -> Self {
        self.jitter_rate = Some(rate);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 || self.forward_attempts == 0 {
            return Err(RingError::configuration(
                "connect and forward attempts must be at least 1",
            ));
        }
        if let Some(rate) = self.jitter_rate {
            if !rate.is_finite() || rate < MIN_JITTER_RATE {
                return Err(RingError::configuration(format!(
                    "jitter rate must be a number of at least {MIN_JITTER_RATE} per second, got {rate}"
                )));
            }
        }
        Ok(())
    }

    /// Function that validates the configuration and resolves this process's ring view.
    pub fn ring_view(&self) -> Result<RingView> {
        self.validate()?;
        RingView::resolve(&self.peers, &self.own_address, self.expected_processes)
    }

    pub fn listen_address(&self) -> Result<String> {
        if let Some(address) = &self.listen_address {
            return Ok(address.clone());
        }
        let port = self
            .own_address
            .rsplit_once(':')
            .map(|(_, port)| port)
            .ok_or_else(|| {
                RingError::configuration(format!("'{}' has no port", self.own_address))
            })?;
        Ok(format!("0.0.0.0:{port}"))
    }
}

/// Function that converts a delay in fractional seconds into a `Duration`.
pub fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        RingError::configuration(format!(
            "{flag} must be a non-negative number of seconds, got {value}"
        ))
    })
}

/// Function that appends `default_port` to a membership entry that has none.
pub fn with_default_port(entry: &str, default_port: u16) -> String {
    if entry.contains(':') {
        entry.to_string()
    } else {
        format!("{entry}:{default_port}")
    }
}

/// Function that parses a membership list: one address per line, no blank lines. The length
/// limit applies to the entry with its port.
pub fn parse_membership(text: &str, default_port: u16) -> Result<Vec<String>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                return Err(RingError::configuration(format!(
                    "invalid line {} in hostfile: empty",
                    i + 1
                )));
            }
            let entry = with_default_port(line.trim(), default_port);
            if entry.len() > MAX_ADDRESS_LENGTH {
                return Err(RingError::configuration(format!(
                    "membership entry at line {} is longer than {MAX_ADDRESS_LENGTH} bytes",
                    i + 1
                )));
            }
            Ok(entry)
        })
        .collect()
}

/// Function that reads the membership list from a hostfile.
pub fn load_membership(path: impl AsRef<Path>, default_port: u16) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        RingError::configuration(format!("error opening hostfile at {}: {e}", path.display()))
    })?;
    parse_membership(&text, default_port)
}

/// Function that builds the default own address from `$HOSTNAME`.
pub fn own_address_from_env(default_port: u16) -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.is_empty())
        .map(|host| with_default_port(&host, default_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostfile_entries_get_the_default_port() {
        let peers = parse_membership("alpha\nbeta:7100\ngamma\n", 7000).unwrap();
        assert_eq!(peers, vec!["alpha:7000", "beta:7100", "gamma:7000"]);
    }

    #[test]
    fn hostfile_rejects_blank_and_long_lines() {
        assert!(parse_membership("alpha\n\nbeta\n", 7000).is_err());
        let long = format!("alpha\n{}\n", "b".repeat(MAX_ADDRESS_LENGTH + 1));
        assert!(parse_membership(&long, 7000).is_err());
    }

    #[test]
    fn length_limit_counts_the_default_port() {
        let fits = "h".repeat(MAX_ADDRESS_LENGTH - ":7000".len());
        let peers = parse_membership(&format!("{fits}\nb\n"), 7000).unwrap();
        assert_eq!(peers[0].len(), MAX_ADDRESS_LENGTH);
        let mut config = NodeConfig::new(peers, "b:7000");
        config.expected_processes = 2;
        assert!(config.ring_view().is_ok());

        let bare = "h".repeat(MAX_ADDRESS_LENGTH - 3);
        assert!(matches!(
            parse_membership(&format!("{bare}\nb\n"), 7000),
            Err(RingError::Configuration { reason }) if reason.contains("line 1")
        ));
    }

    #[test]
    fn delays_must_be_non_negative() {
        assert_eq!(seconds(0.25, "-t").unwrap(), Duration::from_millis(250));
        assert!(seconds(-1.0, "-t").is_err());
        assert!(seconds(f64::NAN, "-m").is_err());
    }

    #[test]
    fn jitter_rate_is_bounded() {
        let peers = parse_membership("a\nb\n", 7000).unwrap();
        let mut config = NodeConfig::new(peers, "a:7000");
        config.expected_processes = 2;

        for rate in [1e-20, 0.0, -1.0, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                config.clone().with_jitter_rate(rate).validate(),
                Err(RingError::Configuration { .. })
            ));
        }
        assert!(config.clone().with_jitter_rate(MIN_JITTER_RATE).validate().is_ok());
        assert!(config.with_jitter_rate(500.0).ring_view().is_ok());
    }

    #[test]
    fn listen_address_uses_own_port() {
        let config = NodeConfig::new(vec![], "alpha:7100");
        assert_eq!(config.listen_address().unwrap(), "0.0.0.0:7100");
    }

    #[test]
    fn ring_view_checks_expected_size() {
        let peers = parse_membership("a\nb\nc\n", 7000).unwrap();
        let mut config = NodeConfig::new(peers, "b:7000");
        assert!(config.ring_view().is_err());

        config.expected_processes = 3;
        let view = config.ring_view().unwrap();
        assert_eq!(view.id(), 2);

        config.forward_attempts = 0;
        assert!(config.ring_view().is_err());
    }

    #[test]
    fn load_membership_reports_missing_file() {
        assert!(matches!(
            load_membership("/definitely/not/here/hostsfile.txt", 7000),
            Err(RingError::Configuration { .. })
        ));
    }
}
