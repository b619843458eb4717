//! `plantd-broker` binary configuration: CLI flags and their
//! `PLANTD_*` environment-variable fallbacks, merged the way
//! `TransportOptions` merges its own builder defaults.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use plantd_core::endpoint::Endpoint;

/// Parse a spec §6-style URL-form address (`tcp://host:port`) into the
/// `SocketAddr` the transport layer actually binds.
///
/// Accepts the bare wildcard host spec §6 documents
/// (`tcp://*:9797`, matching ZeroMQ's wildcard-bind convention) by
/// mapping `*` to `0.0.0.0` before delegating to
/// [`Endpoint::parse`].
fn parse_tcp_endpoint(s: &str) -> Result<SocketAddr, String> {
    let normalized = s.replacen("://*:", "://0.0.0.0:", 1);
    match Endpoint::parse(&normalized) {
        Ok(Endpoint::Tcp(addr)) => Ok(addr),
        Ok(other) => Err(format!("expected a tcp:// address, got {other}")),
        Err(err) => Err(err.to_string()),
    }
}

/// MDPv0.2 broker process.
#[derive(Debug, Parser)]
#[command(name = "plantd-broker", version, about)]
pub struct Cli {
    /// Address to bind the broker's listener on, as a `tcp://host:port`
    /// URL. Serves both clients and workers on the same port; the
    /// broker distinguishes by header frame.
    #[arg(
        long,
        env = "PLANTD_BROKER_BIND",
        default_value = "tcp://*:9797",
        value_parser = parse_tcp_endpoint,
    )]
    pub bind: SocketAddr,

    /// Heartbeat interval, in milliseconds.
    #[arg(long, env = "PLANTD_HEARTBEAT_INTERVAL_MS", default_value_t = 2500)]
    pub heartbeat_interval_ms: u64,

    /// Missed heartbeats tolerated before a worker is expired.
    #[arg(long, env = "PLANTD_HEARTBEAT_LIVENESS", default_value_t = 3)]
    pub heartbeat_liveness: u32,

    /// Maximum pending requests held per service before the oldest is dropped.
    #[arg(long, env = "PLANTD_BROKER_MAX_QUEUE", default_value_t = plantd_broker::DEFAULT_MAX_QUEUE)]
    pub max_queue: usize,

    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[arg(long, env = "PLANTD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Build the broker's runtime configuration from the parsed flags.
    #[must_use]
    pub fn broker_config(&self) -> plantd_broker::BrokerConfig {
        plantd_broker::BrokerConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_liveness: self.heartbeat_liveness,
            max_queue: self.max_queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_host_binds_all_interfaces() {
        assert_eq!(
            parse_tcp_endpoint("tcp://*:9797").unwrap(),
            "0.0.0.0:9797".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn explicit_host_is_preserved() {
        assert_eq!(
            parse_tcp_endpoint("tcp://127.0.0.1:9797").unwrap(),
            "127.0.0.1:9797".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn rejects_non_tcp_scheme() {
        assert!(parse_tcp_endpoint("inproc://broker").is_err());
    }

    #[test]
    fn default_bind_parses_to_the_spec_normative_port() {
        let cli = Cli::parse_from(["plantd-broker"]);
        assert_eq!(cli.bind.port(), 9797);
    }
}
