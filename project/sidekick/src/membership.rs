//! Membership status of the colocated consul agent.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, Url};
use std::time::Duration;

/// The gossip agent's view of the cluster and the commands to change it.
#[async_trait]
pub trait Membership: Send + Sync + 'static {
    /// Peers the agent currently tracks, as `host:port` strings.
    async fn list_peers(&self) -> Result<Vec<String>>;

    /// Force the peer at `address` out of the cluster.
    async fn force_leave(&self, address: &str) -> Result<()>;

    /// Ask the agent to join the peer at `address`.
    async fn join(&self, address: &str, replay: bool) -> Result<()>;
}

/// Client of the consul agent HTTP API.
#[derive(Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base: Url,
}

impl ConsulClient {
    /// `api_host` is either `host:port` or a full `http(s)://` URL.
    pub fn try_new(api_host: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let base = if api_host.starts_with("http://") || api_host.starts_with("https://") {
            api_host.to_string()
        } else {
            format!("http://{api_host}")
        };
        let base = Url::parse(&base).with_context(|| format!("invalid consul api host {api_host:?}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("invalid consul api host {api_host:?}");
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(token).context("invalid consul token")?;
            value.set_sensitive(true);
            headers.insert("X-Consul-Token", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("cannot create consul client")?;

        Ok(Self { http, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("consul api url {} cannot be a base", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl Membership for ConsulClient {
    async fn list_peers(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&["v1", "status", "peers"])?;
        let peers = send_and_handle_unexpected(self.http.get(url))
            .await?
            .json::<Vec<String>>()
            .await
            .context("cannot decode consul peers")?;
        Ok(peers)
    }

    async fn force_leave(&self, address: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "force-leave", address])?;
        send_and_handle_unexpected(self.http.put(url)).await?;
        Ok(())
    }

    async fn join(&self, address: &str, replay: bool) -> Result<()> {
        // The agent API has no replay switch, joins always go through the LAN pool.
        if replay {
            debug!(target: "sidekick::membership", "ignoring replay request for {address}");
        }
        let url = self.endpoint(&["v1", "agent", "join", address])?;
        send_and_handle_unexpected(self.http.put(url)).await?;
        Ok(())
    }
}

async fn send_and_handle_unexpected(builder: RequestBuilder) -> Result<Response> {
    let res = builder.send().await?;
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let url = res.url().clone();
    let body = res.text().await.unwrap_or_default();
    anyhow::bail!("{url} returned {status}: {}", body.trim())
}
