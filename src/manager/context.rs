//! Initialized manager resources, published atomically.

use crate::config::PolicyConfig;
use crate::error::Result;
use crate::proxy::{HttpProxy, NetworkFilter, Socks5Proxy};
use crate::sandbox::linux::LinuxBridge;
use crate::utils::Platform;

/// Everything a ready manager owns: proxies (unless externally provided),
/// their ports, and the Linux bridge when network mediation needs one.
///
/// Construction is atomic: either every resource is live or everything
/// started so far has been released before the error propagates.
pub struct ManagerContext {
    http_proxy: Option<HttpProxy>,
    socks_proxy: Option<Socks5Proxy>,
    http_proxy_port: u16,
    socks_proxy_port: u16,
    bridge: tokio::sync::Mutex<Option<LinuxBridge>>,
}

impl ManagerContext {
    pub async fn initialize(config: PolicyConfig, platform: Platform) -> Result<Self> {
        let network = config.network.clone();
        let external_http = network.as_ref().and_then(|n| n.http_proxy_port);
        let external_socks = network.as_ref().and_then(|n| n.socks_proxy_port);

        let (http_proxy, http_proxy_port) = match external_http {
            Some(port) => (None, port),
            None => {
                let mut proxy = HttpProxy::bind(NetworkFilter::new(network.clone())).await?;
                proxy.start()?;
                let port = proxy.port();
                (Some(proxy), port)
            }
        };

        let (socks_proxy, socks_proxy_port) = match external_socks {
            Some(port) => (None, port),
            None => {
                match Socks5Proxy::bind(NetworkFilter::new(network.clone())).await {
                    Ok(mut proxy) => match proxy.start() {
                        Ok(()) => {
                            let port = proxy.port();
                            (Some(proxy), port)
                        }
                        Err(e) => {
                            if let Some(http) = http_proxy {
                                http.stop();
                            }
                            return Err(e);
                        }
                    },
                    Err(e) => {
                        if let Some(http) = http_proxy {
                            http.stop();
                        }
                        return Err(e);
                    }
                }
            }
        };

        let context = Self {
            http_proxy,
            socks_proxy,
            http_proxy_port,
            socks_proxy_port,
            bridge: tokio::sync::Mutex::new(None),
        };

        // The bridge only exists to reach the proxies from inside a
        // network-isolated namespace; unrestricted policies never use it.
        if platform == Platform::Linux && config.network_restricted() {
            match LinuxBridge::start(http_proxy_port, socks_proxy_port).await {
                Ok(bridge) => {
                    *context.bridge.lock().await = Some(bridge);
                }
                Err(e) => {
                    context.shutdown().await;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "sandbox ready on {} (HTTP proxy {}, SOCKS proxy {})",
            platform.name(),
            http_proxy_port,
            socks_proxy_port
        );

        Ok(context)
    }

    pub fn http_proxy_port(&self) -> u16 {
        self.http_proxy_port
    }

    pub fn socks_proxy_port(&self) -> u16 {
        self.socks_proxy_port
    }

    /// Bridge socket paths, when a bridge is up.
    pub async fn bridge_socket_paths(&self) -> Option<(String, String)> {
        self.bridge.lock().await.as_ref().map(|b| {
            (
                b.http_socket_path.display().to_string(),
                b.socks_socket_path.display().to_string(),
            )
        })
    }

    /// Release every resource. Safe to call more than once; close noise
    /// from already-stopped components is swallowed.
    pub async fn shutdown(&self) {
        if let Some(mut bridge) = self.bridge.lock().await.take() {
            bridge.stop().await;
        }
        if let Some(ref proxy) = self.http_proxy {
            proxy.stop();
        }
        if let Some(ref proxy) = self.socks_proxy {
            proxy.stop();
        }
    }
}
