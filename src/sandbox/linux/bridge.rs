//! TCP-to-Unix-socket bridging for the network-isolated namespace.
//!
//! The sandboxed process lives in a fresh network namespace with no route
//! to the host loopback, so each proxy is exposed as a Unix socket on the
//! host side; fixed-port relays inside the namespace connect back through
//! those sockets.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::error::{Result, SandboxError};

/// Fixed HTTP proxy port inside the namespace.
pub const NAMESPACE_HTTP_PORT: u16 = 3128;

/// Fixed SOCKS proxy port inside the namespace.
pub const NAMESPACE_SOCKS_PORT: u16 = 1080;

const SOCKET_POLL_ATTEMPTS: u32 = 5;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Both host-side relay processes and their socket paths.
pub struct LinuxBridge {
    pub http_socket_path: PathBuf,
    pub socks_socket_path: PathBuf,
    http_relay: Option<Child>,
    socks_relay: Option<Child>,
}

impl LinuxBridge {
    /// Spawn both relays and wait for their sockets to appear.
    ///
    /// Any failure tears down whatever was already started before the error
    /// propagates.
    pub async fn start(http_proxy_port: u16, socks_proxy_port: u16) -> Result<Self> {
        let id = random_hex_id();
        let tmp = std::env::temp_dir();
        let http_socket_path = tmp.join(format!("vsbx-http-{id}.sock"));
        let socks_socket_path = tmp.join(format!("vsbx-socks-{id}.sock"));

        let mut bridge = Self {
            http_socket_path,
            socks_socket_path,
            http_relay: None,
            socks_relay: None,
        };

        match bridge.start_relays(http_proxy_port, socks_proxy_port).await {
            Ok(()) => Ok(bridge),
            Err(e) => {
                bridge.stop().await;
                Err(e)
            }
        }
    }

    async fn start_relays(&mut self, http_proxy_port: u16, socks_proxy_port: u16) -> Result<()> {
        let mut http_relay = spawn_relay(&self.http_socket_path, http_proxy_port)?;
        let http_ready = wait_for_socket(&self.http_socket_path, &mut http_relay).await;
        self.http_relay = Some(http_relay);
        http_ready?;

        let mut socks_relay = spawn_relay(&self.socks_socket_path, socks_proxy_port)?;
        let socks_ready = wait_for_socket(&self.socks_socket_path, &mut socks_relay).await;
        self.socks_relay = Some(socks_relay);
        socks_ready?;

        tracing::debug!(
            "bridge ready: {} and {}",
            self.http_socket_path.display(),
            self.socks_socket_path.display()
        );
        Ok(())
    }

    /// Kill both relays (SIGTERM, then SIGKILL after a grace period) and
    /// unlink the socket files. Idempotent.
    pub async fn stop(&mut self) {
        for relay in [self.http_relay.take(), self.socks_relay.take()]
            .into_iter()
            .flatten()
        {
            terminate_relay(relay).await;
        }

        for socket in [&self.http_socket_path, &self.socks_socket_path] {
            if socket.exists() {
                let _ = std::fs::remove_file(socket);
            }
        }
    }
}

impl Drop for LinuxBridge {
    fn drop(&mut self) {
        for relay in [self.http_relay.as_mut(), self.socks_relay.as_mut()]
            .into_iter()
            .flatten()
        {
            let _ = relay.start_kill();
        }
        for socket in [&self.http_socket_path, &self.socks_socket_path] {
            if socket.exists() {
                let _ = std::fs::remove_file(socket);
            }
        }
    }
}

/// Host side: `UNIX-LISTEN` on the socket, forwarding to the proxy's TCP
/// port with keepalives so dead tunnels are reaped.
fn spawn_relay(socket_path: &Path, tcp_port: u16) -> Result<Child> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }

    Command::new("socat")
        .arg(format!(
            "UNIX-LISTEN:{},fork,reuseaddr",
            socket_path.display()
        ))
        .arg(format!(
            "TCP:localhost:{tcp_port},keepalive,keepidle=10,keepintvl=5,keepcnt=3"
        ))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::MissingDependency("socat not found".to_string())
            } else {
                SandboxError::Io(e)
            }
        })
}

/// Namespace side: the fixed-port TCP listener that dials back out through
/// the bind-mounted Unix socket.
pub fn tcp_to_unix_relay_command(tcp_port: u16, socket_path: &str) -> String {
    format!("socat TCP-LISTEN:{tcp_port},fork,reuseaddr UNIX-CONNECT:{socket_path}")
}

/// Poll for socket existence; attempt `i` sleeps `100 * i` ms. A relay that
/// dies before its socket appears is a startup failure.
async fn wait_for_socket(socket_path: &Path, relay: &mut Child) -> Result<()> {
    for attempt in 1..=SOCKET_POLL_ATTEMPTS {
        if socket_path.exists() {
            return Ok(());
        }
        if let Ok(Some(status)) = relay.try_wait() {
            return Err(SandboxError::Bridge(format!(
                "relay for {} exited with {status} before its socket appeared",
                socket_path.display()
            )));
        }
        tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
    }

    if socket_path.exists() {
        Ok(())
    } else {
        Err(SandboxError::Bridge(format!(
            "socket {} did not appear",
            socket_path.display()
        )))
    }
}

async fn terminate_relay(mut relay: Child) {
    if let Some(pid) = relay.id() {
        // ESRCH here just means the relay is already gone.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, relay.wait()).await {
            Ok(_) => return,
            Err(_) => {
                tracing::warn!("relay {pid} ignored SIGTERM, escalating to SIGKILL");
            }
        }
    }
    let _ = relay.kill().await;
}

fn random_hex_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| format!("{:x}", rng.gen_range(0..16)))
        .collect()
}

/// Check if socat is available.
pub fn check_socat() -> bool {
    std::process::Command::new("socat")
        .arg("-V")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_id_is_sixteen_hex_chars() {
        let id = random_hex_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_hex_id());
    }

    #[test]
    fn namespace_relay_command_shape() {
        let cmd = tcp_to_unix_relay_command(NAMESPACE_HTTP_PORT, "/tmp/vsbx-http-abc.sock");
        assert_eq!(
            cmd,
            "socat TCP-LISTEN:3128,fork,reuseaddr UNIX-CONNECT:/tmp/vsbx-http-abc.sock"
        );
    }

    #[tokio::test]
    async fn bridge_round_trip_if_socat_present() {
        if !check_socat() {
            return;
        }
        // Point the relays at closed ports; the UNIX-LISTEN side still
        // binds, which is all startup checks.
        let mut bridge = LinuxBridge::start(59999, 59998).await.unwrap();
        assert!(bridge.http_socket_path.exists());
        assert!(bridge.socks_socket_path.exists());
        let http = bridge.http_socket_path.clone();
        let socks = bridge.socks_socket_path.clone();

        bridge.stop().await;
        assert!(!http.exists());
        assert!(!socks.exists());

        // A second stop is harmless.
        bridge.stop().await;
    }
}
