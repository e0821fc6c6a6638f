use crate::cli::Cli;
use anyhow::{Context, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONSUL_API_HOST: &str = "localhost:8500";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_CONSUL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PEER_CONCURRENCY: usize = 4;

/// When the sidekick looks up its own pod IP and the ReplicaSet selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Once at startup, a failure is fatal.
    #[default]
    Cached,
    /// At the start of every cycle, a failure only skips that cycle.
    PerCycle,
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub consul_api_host: String,
    pub consul_token: Option<String>,
    pub consul_timeout: Duration,
    pub pod_name: String,
    pub namespace: String,
    pub poll_period: Duration,
    pub kubeconfig: Option<PathBuf>,
    pub identity_policy: IdentityPolicy,
    pub peer_concurrency: usize,
    pub once: bool,
}

/// On-disk YAML config, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub consul_api_host: Option<String>,
    pub consul_token: Option<String>,
    pub consul_timeout: Option<String>,
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
    pub poll_period: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub identity_policy: Option<IdentityPolicy>,
    pub peer_concurrency: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_yaml::from_str(&content).context("Failed to parse YAML config")
    }
}

fn parse_duration(field: &str, value: Option<String>) -> anyhow::Result<Option<Duration>> {
    value
        .map(|v| {
            humantime::parse_duration(&v)
                .with_context(|| format!("invalid duration {v:?} for {field}"))
        })
        .transpose()
}

impl Config {
    /// Merge the command line over the config file (if any) over the defaults.
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    pub fn merge(cli: Cli, file: FileConfig) -> anyhow::Result<Self> {
        let poll_period = cli
            .poll_period
            .or(parse_duration("poll_period", file.poll_period)?)
            .unwrap_or(DEFAULT_POLL_PERIOD);
        let consul_timeout = cli
            .consul_timeout
            .or(parse_duration("consul_timeout", file.consul_timeout)?)
            .unwrap_or(DEFAULT_CONSUL_TIMEOUT);

        let cfg = Config {
            consul_api_host: cli
                .consul_api_host
                .or(file.consul_api_host)
                .unwrap_or_else(|| DEFAULT_CONSUL_API_HOST.to_string()),
            consul_token: cli.consul_token.or(file.consul_token),
            consul_timeout,
            pod_name: cli.pod_name.or(file.pod_name).unwrap_or_default(),
            namespace: cli
                .namespace
                .or(file.namespace)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            poll_period,
            kubeconfig: cli.kubeconfig.or(file.kubeconfig),
            identity_policy: cli
                .identity_policy
                .or(file.identity_policy)
                .unwrap_or_default(),
            peer_concurrency: cli
                .peer_concurrency
                .or(file.peer_concurrency)
                .unwrap_or(DEFAULT_PEER_CONCURRENCY),
            once: cli.once,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pod_name.trim().is_empty() {
            bail!("pod name is required (--pod-name or POD_NAME)");
        }
        if self.namespace.trim().is_empty() {
            bail!("namespace must not be empty");
        }
        if self.poll_period.is_zero() {
            bail!("poll period must be greater than zero");
        }
        if self.consul_timeout.is_zero() {
            bail!("consul timeout must be greater than zero");
        }
        if self.peer_concurrency == 0 {
            bail!("peer concurrency must be at least 1");
        }
        Ok(())
    }
}
