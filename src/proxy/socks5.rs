//! SOCKS5 proxy server (RFC 1928), no authentication, CONNECT only.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::error::{Result, SandboxError};
use crate::proxy::filter::NetworkFilter;

const SOCKS_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
const REP_HOST_UNREACHABLE: u8 = 0x04;

/// SOCKS5 proxy server on an ephemeral localhost port.
pub struct Socks5Proxy {
    listener: Option<TcpListener>,
    port: u16,
    filter: Arc<NetworkFilter>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Socks5Proxy {
    pub async fn bind(filter: NetworkFilter) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        tracing::debug!("SOCKS5 proxy listening on 127.0.0.1:{port}");

        Ok(Self {
            listener: Some(listener),
            port,
            filter: Arc::new(filter),
            shutdown_tx: Mutex::new(None),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn start(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| SandboxError::Proxy("SOCKS5 proxy already started".to_string()))?;

        let filter = self.filter.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let filter = filter.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(stream, addr, filter).await {
                                        tracing::debug!("SOCKS5 connection {addr}: {e}");
                                    }
                                });
                            }
                            Err(e) => tracing::error!("SOCKS5 accept error: {e}"),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("SOCKS5 proxy shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    _addr: SocketAddr,
    filter: Arc<NetworkFilter>,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Greeting: version + supported auth methods.
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err("invalid SOCKS version".into());
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_NONE) {
        stream.write_all(&[SOCKS_VERSION, 0xFF]).await?;
        return Err("no supported authentication method".into());
    }
    stream.write_all(&[SOCKS_VERSION, AUTH_NONE]).await?;

    // Connection request.
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != SOCKS_VERSION {
        return Err("invalid SOCKS version in request".into());
    }
    if request[1] != CMD_CONNECT {
        send_reply(&mut stream, REP_GENERAL_FAILURE, "0.0.0.0", 0).await?;
        return Err("only CONNECT is supported".into());
    }

    let (host, port) = match request[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = read_port(&mut stream).await?;
            (std::net::Ipv4Addr::from(addr).to_string(), port)
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            let port = read_port(&mut stream).await?;
            (String::from_utf8_lossy(&domain).to_string(), port)
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = read_port(&mut stream).await?;
            (std::net::Ipv6Addr::from(addr).to_string(), port)
        }
        _ => {
            send_reply(&mut stream, REP_GENERAL_FAILURE, "0.0.0.0", 0).await?;
            return Err("unsupported address type".into());
        }
    };

    if !filter.check(&host, port).await {
        tracing::debug!("SOCKS5 denied {host}:{port}");
        send_reply(&mut stream, REP_CONNECTION_NOT_ALLOWED, "0.0.0.0", 0).await?;
        return Ok(());
    }

    let target = match TcpStream::connect((host.as_str(), port)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("SOCKS5 dial {host}:{port} failed: {e}");
            send_reply(&mut stream, REP_HOST_UNREACHABLE, "0.0.0.0", 0).await?;
            return Ok(());
        }
    };

    let local = target.local_addr()?;
    send_reply(&mut stream, REP_SUCCESS, &local.ip().to_string(), local.port()).await?;

    let (mut client_read, mut client_write) = stream.into_split();
    let (mut target_read, mut target_write) = target.into_split();

    tokio::select! {
        _ = tokio::io::copy(&mut client_read, &mut target_write) => {}
        _ = tokio::io::copy(&mut target_read, &mut client_write) => {}
    }

    Ok(())
}

async fn read_port(stream: &mut TcpStream) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

async fn send_reply(stream: &mut TcpStream, rep: u8, addr: &str, port: u16) -> std::io::Result<()> {
    let mut reply = vec![SOCKS_VERSION, rep, 0x00];

    if let Ok(ipv4) = addr.parse::<std::net::Ipv4Addr>() {
        reply.push(ATYP_IPV4);
        reply.extend_from_slice(&ipv4.octets());
    } else if let Ok(ipv6) = addr.parse::<std::net::Ipv6Addr>() {
        reply.push(ATYP_IPV6);
        reply.extend_from_slice(&ipv6.octets());
    } else {
        reply.push(ATYP_DOMAIN);
        reply.push(addr.len() as u8);
        reply.extend_from_slice(addr.as_bytes());
    }

    reply.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&reply).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn restricted_filter(allowed: Vec<&str>) -> NetworkFilter {
        NetworkFilter::new(Some(NetworkConfig {
            allowed_domains: Some(allowed.into_iter().map(String::from).collect()),
            ..Default::default()
        }))
    }

    async fn handshake(proxy_port: u16) -> TcpStream {
        let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
        client.write_all(&[SOCKS_VERSION, 1, AUTH_NONE]).await.unwrap();
        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [SOCKS_VERSION, AUTH_NONE]);
        client
    }

    /// Send a CONNECT request and read the reply header, returning
    /// (reply code, address type).
    async fn request_domain(client: &mut TcpStream, host: &str, port: u16) -> (u8, u8) {
        let mut req = vec![SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8];
        req.extend_from_slice(host.as_bytes());
        req.extend_from_slice(&port.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        (reply[1], reply[3])
    }

    #[tokio::test]
    async fn denied_host_gets_connection_not_allowed() {
        let mut proxy = Socks5Proxy::bind(restricted_filter(vec!["example.com"]))
            .await
            .unwrap();
        proxy.start().unwrap();

        let mut client = handshake(proxy.port()).await;
        let (rep, _) = request_domain(&mut client, "evil.com", 443).await;
        assert_eq!(rep, REP_CONNECTION_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn allowed_host_connects_and_relays() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_port = origin.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = origin.accept().await {
                let _ = stream.write_all(b"hello").await;
            }
        });

        let mut proxy = Socks5Proxy::bind(restricted_filter(vec!["localhost"]))
            .await
            .unwrap();
        proxy.start().unwrap();

        let mut client = handshake(proxy.port()).await;
        let (rep, atyp) = request_domain(&mut client, "localhost", origin_port).await;
        assert_eq!(rep, REP_SUCCESS);

        // Drain the bound address + port from the reply before the payload.
        let addr_len = match atyp {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            _ => panic!("unexpected reply address type"),
        };
        let mut rest = vec![0u8; addr_len + 2];
        client.read_exact(&mut rest).await.unwrap();

        let mut payload = [0u8; 5];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"hello");
    }
}
