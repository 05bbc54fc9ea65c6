//! Sandbox manager: lifecycle, configuration, and command wrapping.

pub mod context;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;

use crate::config::PolicyConfig;
use crate::error::{Result, SandboxError};
use crate::sandbox::macos::LogMonitor;
use crate::sandbox::{self, SandboxParams};
use crate::utils::{current_platform, Platform};
use crate::violation::SandboxViolationStore;

pub use context::ManagerContext;

type InitFuture = Shared<BoxFuture<'static, std::result::Result<Arc<ManagerContext>, Arc<SandboxError>>>>;

/// Process-wide sandbox orchestrator.
///
/// Cheap to clone; clones share one lifecycle. Initialization is one-shot
/// and joinable: concurrent callers await the same in-flight future and
/// share the resulting [`ManagerContext`].
#[derive(Clone)]
pub struct SandboxManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    policy: RwLock<PolicyConfig>,
    /// Published atomically once initialization succeeds.
    context: RwLock<Option<Arc<ManagerContext>>>,
    /// In-flight initialization that late callers join.
    init: tokio::sync::Mutex<Option<InitFuture>>,
    violations: Arc<SandboxViolationStore>,
    monitor: tokio::sync::Mutex<Option<LogMonitor>>,
    cleanup_registered: AtomicBool,
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                policy: RwLock::new(PolicyConfig::default()),
                context: RwLock::new(None),
                init: tokio::sync::Mutex::new(None),
                violations: Arc::new(SandboxViolationStore::new()),
                monitor: tokio::sync::Mutex::new(None),
                cleanup_registered: AtomicBool::new(false),
            }),
        }
    }

    /// Validate and adopt `config`, then bring up proxies (and the bridge
    /// where applicable).
    pub async fn initialize(&self, config: PolicyConfig) -> Result<()> {
        config.validate()?;
        *self.inner.policy.write() = config;
        self.ensure_initialized().await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.context.read().is_some()
    }

    pub fn get_config(&self) -> PolicyConfig {
        self.inner.policy.read().clone()
    }

    /// Replace the policy. Takes effect for subsequent wraps; running
    /// proxies keep the filter they were initialized with.
    pub fn update_config(&self, config: PolicyConfig) -> Result<()> {
        config.validate()?;
        *self.inner.policy.write() = config;
        Ok(())
    }

    pub fn http_proxy_port(&self) -> Option<u16> {
        self.inner.context.read().as_ref().map(|c| c.http_proxy_port())
    }

    pub fn socks_proxy_port(&self) -> Option<u16> {
        self.inner.context.read().as_ref().map(|c| c.socks_proxy_port())
    }

    pub fn violation_store(&self) -> Arc<SandboxViolationStore> {
        self.inner.violations.clone()
    }

    /// Join (or start) initialization and return the shared context.
    async fn ensure_initialized(&self) -> Result<Arc<ManagerContext>> {
        if let Some(context) = self.inner.context.read().clone() {
            return Ok(context);
        }

        let shared = {
            let mut slot = self.inner.init.lock().await;
            // The context may have been published while waiting for the
            // lock.
            if let Some(context) = self.inner.context.read().clone() {
                return Ok(context);
            }

            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                let platform = current_platform().ok_or_else(|| {
                    SandboxError::UnsupportedPlatform(
                        "sandboxing requires macOS or Linux".to_string(),
                    )
                })?;

                let config = self.inner.policy.read().clone();
                for warning in sandbox::check_dependencies(platform, &config).into_result()? {
                    tracing::warn!("{warning}");
                }

                let future: BoxFuture<'static, _> = async move {
                    ManagerContext::initialize(config, platform)
                        .await
                        .map(Arc::new)
                        .map_err(Arc::new)
                }
                .boxed();
                let shared = future.shared();
                *slot = Some(shared.clone());
                shared
            }
        };

        let outcome = shared.await;

        let mut slot = self.inner.init.lock().await;
        match outcome {
            Ok(context) => {
                *self.inner.context.write() = Some(context.clone());
                *slot = None;
                drop(slot);
                self.register_exit_cleanup();
                Ok(context)
            }
            Err(e) => {
                // Partial resources were already torn down inside
                // ManagerContext::initialize.
                *slot = None;
                Err(SandboxError::Init(e.to_string()))
            }
        }
    }

    /// Reset on process exit, registered at most once per manager.
    fn register_exit_cleanup(&self) {
        if self.inner.cleanup_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.reset().await;
            }
        });
    }

    /// Wrap `command` so that executing the result through a shell runs it
    /// inside the sandbox.
    pub async fn wrap_with_sandbox(
        &self,
        command: &str,
        shell: Option<&str>,
        custom_config: Option<PolicyConfig>,
    ) -> Result<String> {
        let config = {
            let base = self.inner.policy.read();
            match custom_config {
                Some(ref custom) => base.merged(custom),
                None => base.clone(),
            }
        };
        config.validate()?;

        if config.is_unrestricted() {
            return Ok(command.to_string());
        }

        let platform = current_platform().ok_or_else(|| {
            SandboxError::UnsupportedPlatform("sandboxing requires macOS or Linux".to_string())
        })?;

        // Network mediation needs live proxies (and bridge sockets on
        // Linux) before the wrapped command can run.
        let context = if config.network_restricted() {
            Some(self.ensure_initialized().await?)
        } else {
            self.inner.context.read().clone()
        };

        if platform == Platform::MacOS {
            self.ensure_monitor_running(&config).await;
        }

        let (http_port, socks_port) = match context.as_ref() {
            Some(c) => (Some(c.http_proxy_port()), Some(c.socks_proxy_port())),
            None => (None, None),
        };
        let sockets = match context.as_ref() {
            Some(c) => c.bridge_socket_paths().await,
            None => None,
        };

        let cwd = std::env::current_dir()?;
        let params = SandboxParams {
            command,
            config: &config,
            cwd: &cwd,
            shell: shell.unwrap_or("/bin/bash"),
            http_proxy_port: http_port,
            socks_proxy_port: socks_port,
            http_socket_path: sockets.as_ref().map(|(h, _)| h.as_str()),
            socks_socket_path: sockets.as_ref().map(|(_, s)| s.as_str()),
        };

        let result = sandbox::wrap_command(platform, &params).await?;
        for warning in &result.warnings {
            tracing::warn!("{warning}");
        }

        Ok(result.command)
    }

    async fn ensure_monitor_running(&self, config: &PolicyConfig) {
        let mut monitor = self.inner.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        match LogMonitor::start(
            self.inner.violations.clone(),
            config.ignore_violations.clone(),
        ) {
            Ok(m) => *monitor = Some(m),
            Err(e) => tracing::warn!("violation monitor unavailable: {e}"),
        }
    }

    /// Append recorded violations for `command` to its stderr inside a
    /// `<sandbox_violations>` block.
    pub fn annotate_stderr_with_violations(&self, command: &str, stderr: &str) -> String {
        let violations = self.inner.violations.for_command(command);
        if violations.is_empty() {
            return stderr.to_string();
        }

        let mut annotated = String::with_capacity(stderr.len() + 128);
        annotated.push_str(stderr);
        annotated.push_str("\n<sandbox_violations>\n");
        for violation in violations {
            annotated.push_str(&violation.line);
            annotated.push('\n');
        }
        annotated.push_str("</sandbox_violations>");
        annotated
    }

    /// Tear everything down. Idempotent; cleanup noise is swallowed.
    pub async fn reset(&self) {
        if let Some(mut monitor) = self.inner.monitor.lock().await.take() {
            monitor.stop().await;
        }

        {
            let mut slot = self.inner.init.lock().await;
            *slot = None;
        }

        let context = self.inner.context.write().take();
        if let Some(context) = context {
            context.shutdown().await;
        }

        *self.inner.policy.write() = PolicyConfig::default();
        tracing::debug!("sandbox manager reset");
    }
}
