//! Domain filtering for the proxy servers.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::{matches_domain_pattern, NetworkConfig};

/// Optional interactive callback consulted when neither list matches.
/// Errors count as denial.
pub type AskCallback =
    Arc<dyn Fn(String, u16) -> BoxFuture<'static, Result<bool, String>> + Send + Sync>;

/// Per-connection policy filter shared by both proxies.
#[derive(Clone)]
pub struct NetworkFilter {
    network: Option<NetworkConfig>,
    ask: Option<AskCallback>,
}

impl std::fmt::Debug for NetworkFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkFilter")
            .field("network", &self.network)
            .field("ask", &self.ask.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl NetworkFilter {
    pub fn new(network: Option<NetworkConfig>) -> Self {
        Self { network, ask: None }
    }

    pub fn with_ask(mut self, ask: AskCallback) -> Self {
        self.ask = Some(ask);
        self
    }

    /// Decide whether a connection to `host:port` is allowed.
    ///
    /// Order: no policy denies; the deny list wins over everything; then the
    /// allow list; then the optional callback; anything left is denied.
    pub async fn check(&self, host: &str, port: u16) -> bool {
        let Some(ref network) = self.network else {
            return false;
        };

        for pattern in &network.denied_domains {
            if matches_domain_pattern(host, pattern) {
                tracing::debug!("filter: {host}:{port} denied by {pattern}");
                return false;
            }
        }

        for pattern in network.allowed_domains.iter().flatten() {
            if matches_domain_pattern(host, pattern) {
                return true;
            }
        }

        if let Some(ref ask) = self.ask {
            return match ask(host.to_string(), port).await {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!("filter: ask callback failed for {host}:{port}: {e}");
                    false
                }
            };
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(allowed: Option<Vec<&str>>, denied: Vec<&str>) -> NetworkConfig {
        NetworkConfig {
            allowed_domains: allowed.map(|v| v.into_iter().map(String::from).collect()),
            denied_domains: denied.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_policy_denies() {
        let filter = NetworkFilter::new(None);
        assert!(!filter.check("example.com", 443).await);
    }

    #[tokio::test]
    async fn deny_list_wins_over_allow_list() {
        let filter = NetworkFilter::new(Some(network(
            Some(vec!["*.example.com"]),
            vec!["evil.example.com"],
        )));
        assert!(filter.check("api.example.com", 443).await);
        assert!(!filter.check("evil.example.com", 443).await);
    }

    #[tokio::test]
    async fn unlisted_hosts_are_denied() {
        let filter = NetworkFilter::new(Some(network(Some(vec!["github.com"]), vec![])));
        assert!(filter.check("github.com", 443).await);
        assert!(!filter.check("gitlab.com", 443).await);
    }

    #[tokio::test]
    async fn empty_allow_list_blocks_everything() {
        let filter = NetworkFilter::new(Some(network(Some(vec![]), vec![])));
        assert!(!filter.check("example.com", 443).await);
        assert!(!filter.check("localhost", 80).await);
    }

    #[tokio::test]
    async fn ask_callback_settles_unmatched_hosts() {
        let base = network(Some(vec!["github.com"]), vec!["evil.com"]);

        let yes: AskCallback = Arc::new(|_, _| Box::pin(async { Ok(true) }));
        let filter = NetworkFilter::new(Some(base.clone())).with_ask(yes);
        assert!(filter.check("other.com", 443).await);
        // The deny list is still consulted first.
        assert!(!filter.check("evil.com", 443).await);

        let fail: AskCallback = Arc::new(|_, _| Box::pin(async { Err("offline".to_string()) }));
        let filter = NetworkFilter::new(Some(base)).with_ask(fail);
        assert!(!filter.check("other.com", 443).await);
    }
}
