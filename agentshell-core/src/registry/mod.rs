//! Workload Registry Client (spec §4.1): queries the local registry for
//! workloads, resolves addresses, and applies the in-container URL rewrite.

use serde::Deserialize;
use std::time::Duration;

/// A remote tool-hosting process registered with the local registry daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Workload {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub transport_type: String,
    #[serde(default)]
    pub proxy_mode: String,
}

impl Workload {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

#[derive(Debug, Deserialize)]
struct WorkloadsResponse {
    #[serde(default)]
    workloads: Vec<Workload>,
}

const WORKLOADS_PATH: &str = "/api/v1beta/workloads";

/// Client for the local workload registry daemon's REST API.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    in_container: bool,
}

impl RegistryClient {
    pub fn new(host: &str, port: u16, in_container: bool) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: format!("http://{host}:{port}"),
            in_container,
        }
    }

    /// Lists every workload known to the registry. The registry is always
    /// re-queried (it is the source of truth; results are never cached).
    pub async fn list_workloads(&self) -> Result<Vec<Workload>, reqwest::Error> {
        let url = format!("{}{}", self.base_url, WORKLOADS_PATH);
        let response = self
            .http
            .get(&url)
            .header("Cache-Control", "no-cache, no-store, must-revalidate")
            .send()
            .await?
            .error_for_status()?;

        let body: WorkloadsResponse = response.json().await?;
        let mut workloads = body.workloads;

        if self.in_container {
            for workload in &mut workloads {
                if let Some(url) = &workload.url {
                    workload.url = Some(rewrite_loopback(url, &self.registry_host()));
                }
            }
        }

        Ok(workloads)
    }

    /// Looks up a single workload by name.
    pub async fn get_workload(&self, name: &str) -> Result<Option<Workload>, reqwest::Error> {
        let workloads = self.list_workloads().await?;
        Ok(workloads.into_iter().find(|w| w.name == name))
    }

    fn registry_host(&self) -> String {
        self.base_url
            .trim_start_matches("http://")
            .split(':')
            .next()
            .unwrap_or("127.0.0.1")
            .to_string()
    }
}

/// Rewrites a loopback-literal host in `url` to `registry_host`. Invariant 6
/// (spec §3): only ever called when running inside a container.
fn rewrite_loopback(url: &str, registry_host: &str) -> String {
    if registry_host == "localhost" || registry_host == "127.0.0.1" {
        return url.to_string();
    }
    for loopback in ["localhost", "127.0.0.1"] {
        if let Some(parsed) = url::Url::parse(url).ok().filter(|u| {
            u.host_str()
                .map(|h| h == loopback)
                .unwrap_or(false)
        }) {
            let mut rewritten = parsed;
            let _ = rewritten.set_host(Some(registry_host));
            return rewritten.to_string();
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_loopback_replaces_localhost_host() {
        let rewritten = rewrite_loopback("http://127.0.0.1:9000/sse", "toolhive-host");
        assert_eq!(rewritten, "http://toolhive-host:9000/sse");
    }

    #[test]
    fn rewrite_loopback_leaves_non_loopback_untouched() {
        let rewritten = rewrite_loopback("http://example.internal:9000/sse", "toolhive-host");
        assert_eq!(rewritten, "http://example.internal:9000/sse");
    }

    #[test]
    fn rewrite_loopback_noop_when_registry_host_is_also_loopback() {
        let rewritten = rewrite_loopback("http://127.0.0.1:9000/sse", "127.0.0.1");
        assert_eq!(rewritten, "http://127.0.0.1:9000/sse");
    }
}
