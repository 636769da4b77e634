//! Command line and environment configuration for the daemon

use crate::relay::{PeerSpec, RelayConfig};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "rfmail-relay", version)]
#[command(about = "Store-and-forward relay node for RFMail networks")]
pub struct Cli {
    /// Node id announced to peers (random if unset)
    #[arg(long, env = "RFMAIL_NODE_ID")]
    pub node_id: Option<String>,

    /// Address the HTTP intake listens on
    #[arg(long, env = "RFMAIL_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// URL peers should use to reach this node
    #[arg(long, env = "RFMAIL_ADVERTISE")]
    pub advertise: Option<String>,

    /// Directory for routes, seen ids, inbox and outbox
    #[arg(long, env = "RFMAIL_STATE_DIR", default_value = "rfmail-state")]
    pub state_dir: PathBuf,

    /// Keep all state in memory only
    #[arg(long, env = "RFMAIL_EPHEMERAL")]
    pub ephemeral: bool,

    /// Next hop for destinations without a known route
    #[arg(long, env = "RFMAIL_DEFAULT_PEER")]
    pub default_peer: Option<String>,

    /// Peer to announce presence to, as ID=URL (repeatable)
    #[arg(long = "peer", env = "RFMAIL_PEERS", value_delimiter = ',')]
    pub peers: Vec<PeerSpec>,

    /// Hop budget for messages without a ttl
    #[arg(long, env = "RFMAIL_DEFAULT_TTL", default_value_t = 5)]
    pub default_ttl: i64,

    /// Seconds between outbox scans
    #[arg(long, env = "RFMAIL_RETRY_INTERVAL", default_value_t = 15)]
    pub retry_interval: u64,

    /// Seconds between presence rounds
    #[arg(long, env = "RFMAIL_PRESENCE_INTERVAL", default_value_t = 60)]
    pub presence_interval: u64,

    /// Seconds after which an unrefreshed route is dropped
    #[arg(long, env = "RFMAIL_ROUTE_MAX_AGE", default_value_t = 900)]
    pub route_max_age: u64,

    /// Per-send timeout in seconds
    #[arg(long, env = "RFMAIL_SEND_TIMEOUT", default_value_t = 5)]
    pub send_timeout: u64,

    /// Seconds a finished delivery stays visible in the delivery index
    #[arg(long, env = "RFMAIL_INDEX_RETENTION", default_value_t = 604_800)]
    pub index_retention: u64,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "RFMAIL_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    #[arg(long, env = "RFMAIL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn into_config(self) -> RelayConfig {
        let defaults = RelayConfig::default();
        let advertise_url = self
            .advertise
            .unwrap_or_else(|| advertise_from_listen(self.listen));

        RelayConfig {
            node_id: self.node_id.unwrap_or(defaults.node_id),
            listen_addr: self.listen,
            advertise_url,
            state_dir: (!self.ephemeral).then_some(self.state_dir),
            default_peer: self.default_peer,
            peers: self.peers,
            default_ttl: self.default_ttl,
            retry_interval: Duration::from_secs(self.retry_interval),
            presence_interval: Duration::from_secs(self.presence_interval),
            route_max_age: Duration::from_secs(self.route_max_age),
            send_timeout: Duration::from_secs(self.send_timeout),
            index_retention: Duration::from_secs(self.index_retention),
        }
    }
}

/// Unspecified listen addresses advertise as localhost
fn advertise_from_listen(listen: SocketAddr) -> String {
    if listen.ip().is_unspecified() {
        format!("http://localhost:{}/", listen.port())
    } else {
        format!("http://{}/", listen)
    }
}
