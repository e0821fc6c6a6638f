use crate::config::IdentityPolicy;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command line of the sidekick. Every option left unset falls back to the
/// config file, then to the built-in default.
#[derive(Parser, Debug, Default)]
#[command(
    name = "consul-sidekick",
    version,
    about = "Keeps consul membership in sync with the pods of its ReplicaSet"
)]
pub struct Cli {
    /// Consul HTTP API host and port [default: localhost:8500]
    #[arg(long)]
    pub consul_api_host: Option<String>,

    /// Pod name where consul is running
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Namespace where consul is running [default: default]
    #[arg(long, env = "POD_NAMESPACE")]
    pub namespace: Option<String>,

    /// Polling period, e.g. "5s" or "1m" [default: 5s]
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_period: Option<Duration>,

    /// Path to the kubeconfig file, in-cluster configuration is used when unset
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// ACL token sent to the consul agent
    #[arg(long, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    /// Timeout of a single consul API call [default: 10s]
    #[arg(long, value_parser = humantime::parse_duration)]
    pub consul_timeout: Option<Duration>,

    /// Whether the pod IP and selector are resolved once or every cycle [default: cached]
    #[arg(long, value_enum)]
    pub identity_policy: Option<IdentityPolicy>,

    /// Maximum number of concurrent join/leave commands [default: 4]
    #[arg(long)]
    pub peer_concurrency: Option<usize>,

    /// Run a single reconciliation cycle and exit
    #[arg(long)]
    pub once: bool,

    /// YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
