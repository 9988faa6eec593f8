//! Discovery (spec §4.3): locates the registry endpoint via explicit config,
//! environment, concurrent port scan across a range, and candidate host
//! fallbacks. A discovered `(host, port)` is cached for the process lifetime
//! after first success (spec §3 invariant 5).

use arc_swap::ArcSwapOption;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
const ENV_HOST_OVERRIDE: &str = "AGENTSHELL_REGISTRY_HOST";
const CONTAINER_HOST_ALIAS: &str = "host.docker.internal";
const MAX_SCAN_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub port: u16,
}

#[derive(Deserialize)]
struct VersionResponse {
    #[allow(dead_code)]
    version: String,
}

/// Process-lifetime cache of the discovered registry endpoint, keyed by host.
#[derive(Default)]
pub struct Discovery {
    cached: ArcSwapOption<(String, u16)>,
    http: reqwest::Client,
}

impl Discovery {
    pub fn new() -> Self {
        Self {
            cached: ArcSwapOption::empty(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Runs the discovery algorithm from spec §4.3.
    pub async fn discover(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        scan_range: std::ops::RangeInclusive<u16>,
        skip_scan: bool,
    ) -> Result<(String, u16), crate::error::ShellError> {
        if let Some(cached) = self.cached.load_full() {
            return Ok((cached.0.clone(), cached.1));
        }

        let host = host
            .map(str::to_string)
            .or_else(|| std::env::var(ENV_HOST_OVERRIDE).ok())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        if skip_scan {
            let resolved = (host, port.unwrap_or(DEFAULT_PORT));
            self.store(resolved.clone());
            return Ok(resolved);
        }

        if let Some(port) = port {
            for _ in 0..3 {
                if self.probe(&host, port).await {
                    let resolved = (host, port);
                    self.store(resolved.clone());
                    return Ok(resolved);
                }
            }
        }

        let candidate_hosts: Vec<String> = [host.as_str(), DEFAULT_HOST, CONTAINER_HOST_ALIAS]
            .into_iter()
            .map(str::to_string)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let num_ports = scan_range.clone().count().max(1) as u32;
        let per_probe = Duration::from_secs(2);
        let budget = per_probe
            .checked_mul(num_ports)
            .unwrap_or(MAX_SCAN_DURATION)
            .min(MAX_SCAN_DURATION);

        let result = tokio::time::timeout(budget, self.scan_hosts(candidate_hosts, scan_range)).await;

        match result {
            Ok(Some(resolved)) => {
                self.store(resolved.clone());
                Ok(resolved)
            }
            _ => Err(crate::error::ShellError::Discovery(
                "no registry found on any candidate host/port".to_string(),
            )),
        }
    }

    async fn scan_hosts(
        &self,
        hosts: Vec<String>,
        scan_range: std::ops::RangeInclusive<u16>,
    ) -> Option<(String, u16)> {
        for host in hosts {
            let mut tasks = Vec::new();
            for port in scan_range.clone() {
                let host = host.clone();
                let http = self.http.clone();
                tasks.push(tokio::spawn(async move {
                    probe_with(&http, &host, port).await.then_some(port)
                }));
            }

            let mut found_port = None;
            for task in tasks {
                if let Ok(Some(port)) = task.await {
                    found_port = Some(port);
                    break;
                }
            }

            if let Some(port) = found_port {
                return Some((host, port));
            }
        }
        None
    }

    async fn probe(&self, host: &str, port: u16) -> bool {
        probe_with(&self.http, host, port).await
    }

    fn store(&self, resolved: (String, u16)) {
        self.cached.store(Some(Arc::new(resolved)));
    }
}

/// A probe is a GET to `.../version` whose body must deserialize to an
/// object carrying a `version` field (distinguishes the registry from
/// arbitrary HTTP servers, spec §4.3 step 5 / GLOSSARY "fingerprinting").
async fn probe_with(http: &reqwest::Client, host: &str, port: u16) -> bool {
    let url = format!("http://{host}:{port}/api/v1beta/version");
    match http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => resp.json::<VersionResponse>().await.is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skip_scan_returns_default_port_without_probing() {
        let discovery = Discovery::new();
        let (host, port) = discovery
            .discover(Some("example.test"), None, 9000..=9001, true)
            .await
            .unwrap();
        assert_eq!(host, "example.test");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn second_discover_call_hits_the_cache() {
        let discovery = Discovery::new();
        let first = discovery
            .discover(Some("cached.test"), Some(1234), 1..=1, true)
            .await
            .unwrap();
        let second = discovery.discover(None, None, 1..=1, true).await.unwrap();
        assert_eq!(first, second);
    }
}
