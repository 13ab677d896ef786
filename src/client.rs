//! Provider plugin connections
//!
//! Provider plugins listen on unix domain sockets at
//! `<socket_dir>/<provider>.sock`. [`PluginClientBuilder`] keeps one
//! connection per provider and hands out cheap [`ProviderClient`] handles
//! bound to it. The socket is the only trust boundary: access is governed by
//! filesystem permissions and the channel itself is plaintext.
//!
//! [`PluginClientBuilder::cleanup`] closes every registered connection:
//! handles given out earlier fail their in-flight and future calls with
//! `CANCELLED` and never dial again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Code;
use tower::service_fn;
use tracing::{debug, error, trace, warn};

use crate::config::RetryPolicy;
use crate::error::{ProviderError, Result};
use crate::provider::socket_path;
use crate::v1alpha1::csi_driver_provider_client::CsiDriverProviderClient;
use crate::v1alpha1::{MountRequest, MountResponse, VersionRequest, VersionResponse};

/// Pattern provider names must match. Also bounds the socket path length.
static PLUGIN_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{0,30}$").expect("valid provider name pattern"));

/// API version sent with `Version` requests.
pub const API_VERSION: &str = "v1alpha1";

/// Check a provider name against the naming pattern.
pub fn is_valid_provider_name(provider: &str) -> bool {
    PLUGIN_NAME_PATTERN.is_match(provider)
}

/// The mount RPC as seen by the orchestrator.
///
/// [`ProviderClient`] is the production implementation; tests substitute
/// in-process fakes.
#[async_trait]
pub trait MountClient: Send + Sync {
    /// Issue a `Mount` call and return the raw response.
    async fn mount(
        &self,
        request: MountRequest,
    ) -> std::result::Result<MountResponse, tonic::Status>;
}

/// Handle for issuing RPCs to one provider plugin.
///
/// Clones share the underlying connection. Every call goes through the
/// configured [`RetryPolicy`].
#[derive(Clone)]
pub struct ProviderClient {
    inner: CsiDriverProviderClient<Channel>,
    socket: Arc<PathBuf>,
    policy: Arc<RetryPolicy>,
    closed: watch::Receiver<bool>,
}

impl ProviderClient {
    fn new(
        channel: Channel,
        socket: PathBuf,
        policy: Arc<RetryPolicy>,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: CsiDriverProviderClient::new(channel),
            socket: Arc::new(socket),
            policy,
            closed,
        }
    }

    /// Whether the connection behind this handle has been closed
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Socket this client talks to
    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Ask the provider for its version and runtime information.
    pub async fn version(&self) -> Result<VersionResponse> {
        let request = VersionRequest {
            version: API_VERSION.to_string(),
        };
        let response = self
            .call_with_retry("Version", |mut client| {
                let request = request.clone();
                async move { client.version(request).await }
            })
            .await?;
        Ok(response)
    }

    /// Run one RPC under the retry policy, failing with `CANCELLED` as soon
    /// as the connection is closed.
    async fn call_with_retry<T, F, Fut>(
        &self,
        method: &'static str,
        call: F,
    ) -> std::result::Result<T, tonic::Status>
    where
        F: Fn(CsiDriverProviderClient<Channel>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        if self.is_closed() {
            return Err(connection_closing());
        }

        let mut closed = self.closed.clone();
        tokio::select! {
            result = self.run_attempts(method, call) => result,
            Ok(_) = closed.wait_for(|closed| *closed) => {
                debug!(method, socket = ?self.socket, "provider connection closed during call");
                Err(connection_closing())
            }
        }
    }

    /// Only codes listed in `retryable_codes` are retried, at most
    /// `max_attempts` times. With `wait_for_ready`, an attempt that could not
    /// reach the socket does not count: the call waits until the socket
    /// accepts connections and tries again. That wait is bounded only by the
    /// caller dropping the future.
    async fn run_attempts<T, F, Fut>(
        &self,
        method: &'static str,
        call: F,
    ) -> std::result::Result<T, tonic::Status>
    where
        F: Fn(CsiDriverProviderClient<Channel>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        let policy = &self.policy;
        let mut backoff = policy.initial_backoff;
        let mut attempt = 1;

        loop {
            let status = match call(self.inner.clone()).await {
                Ok(response) => return Ok(response.into_inner()),
                Err(status) => status,
            };

            if policy.wait_for_ready && status.code() == Code::Unavailable && !self.is_ready().await
            {
                debug!(method, attempt, "provider not accepting connections, waiting");
                self.wait_for_ready().await;
                continue;
            }

            if attempt >= policy.max_attempts || !policy.is_retryable(status.code()) {
                return Err(status);
            }

            debug!(
                method,
                attempt,
                code = ?status.code(),
                "provider call failed, retrying in {:?}",
                backoff
            );
            tokio::time::sleep(backoff).await;
            backoff = policy.next_backoff(backoff);
            attempt += 1;
        }
    }

    async fn is_ready(&self) -> bool {
        UnixStream::connect(self.socket.as_path()).await.is_ok()
    }

    /// Block until the provider socket accepts a connection.
    async fn wait_for_ready(&self) {
        let mut delay = self.policy.initial_backoff;
        while !self.is_ready().await {
            trace!("provider socket {:?} not ready", self.socket);
            tokio::time::sleep(delay).await;
            delay = self.policy.next_backoff(delay);
        }
    }
}

fn connection_closing() -> tonic::Status {
    tonic::Status::cancelled("provider connection is closing")
}

#[async_trait]
impl MountClient for ProviderClient {
    async fn mount(
        &self,
        request: MountRequest,
    ) -> std::result::Result<MountResponse, tonic::Status> {
        self.call_with_retry("Mount", |mut client| {
            let request = request.clone();
            async move { client.mount(request).await }
        })
        .await
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("socket", &self.socket)
            .finish()
    }
}

/// A registered connection and the client bound to it
struct PluginConnection {
    channel: Channel,
    client: ProviderClient,
    closer: watch::Sender<bool>,
}

/// Builds and caches clients for provider plugins.
///
/// At most one connection per provider is ever registered. Lookups take a
/// shared lock; a miss builds the connection without holding any lock and
/// only takes the exclusive lock to install it, re-checking for a
/// concurrent winner first.
pub struct PluginClientBuilder {
    socket_dir: PathBuf,
    policy: Arc<RetryPolicy>,
    connections: RwLock<HashMap<String, PluginConnection>>,
}

impl PluginClientBuilder {
    /// Create a builder connecting to plugins in `socket_dir`.
    pub fn new(socket_dir: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            policy: Arc::new(policy),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Directory provider sockets are looked up in
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Return the client for `provider`, connecting on first use.
    pub async fn get(&self, provider: &str) -> Result<ProviderClient> {
        if let Some(conn) = self.connections.read().get(provider) {
            trace!(provider, "provider client cache hit");
            return Ok(conn.client.clone());
        }

        if !is_valid_provider_name(provider) {
            return Err(ProviderError::InvalidProvider(provider.to_string()));
        }

        // Fail fast rather than dial an endpoint that cannot exist. Other
        // stat errors fall through to the dial.
        let socket = socket_path(&self.socket_dir, provider);
        if let Ok(false) = tokio::fs::try_exists(&socket).await {
            return Err(ProviderError::ProviderNotFound(provider.to_string()));
        }

        let (closer, closed) = watch::channel(false);
        let channel = connect(&socket, closed.clone())?;
        let client = ProviderClient::new(channel.clone(), socket, self.policy.clone(), closed);

        let mut connections = self.connections.write();
        // A concurrent get() may have registered a connection while this one
        // was being built; keep theirs and drop ours.
        if let Some(existing) = connections.get(provider) {
            debug!(provider, "provider connection registered concurrently, discarding ours");
            return Ok(existing.client.clone());
        }

        debug!(provider, socket = ?client.socket_path(), "registered provider connection");
        connections.insert(
            provider.to_string(),
            PluginConnection {
                channel,
                client: client.clone(),
                closer,
            },
        );
        Ok(client)
    }

    /// Whether a connection for `provider` is currently registered
    pub fn is_cached(&self, provider: &str) -> bool {
        self.connections.read().contains_key(provider)
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// True when no connections are registered
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Close all connections and forget every client.
    ///
    /// Handles already given out fail with `CANCELLED` from now on, including
    /// calls in flight. The next `get()` for any provider dials again.
    pub fn cleanup(&self) {
        let mut connections = self.connections.write();
        for (provider, conn) in connections.drain() {
            let PluginConnection {
                channel,
                client,
                closer,
            } = conn;
            if Arc::strong_count(&client.socket) > 1 {
                warn!(provider, "closing provider connection with handles still in use");
            } else {
                debug!(provider, "closing provider connection");
            }
            closer.send_replace(true);
            drop(client);
            drop(channel);
        }
    }
}

impl Drop for PluginClientBuilder {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Build a lazily connected channel to a unix socket.
///
/// The URI is a placeholder required by the endpoint; the connector ignores
/// it and dials `socket` instead, until `closed` turns true.
fn connect(socket: &Path, closed: watch::Receiver<bool>) -> Result<Channel> {
    let endpoint = Endpoint::try_from("http://[::]:50051").map_err(|e| {
        error!("invalid provider endpoint: {}", e);
        ProviderError::Transport(Box::new(tonic::Status::internal(e.to_string())))
    })?;

    let socket = socket.to_path_buf();
    let channel = endpoint.connect_with_connector_lazy(service_fn(move |_: Uri| {
        let socket = socket.clone();
        let is_closed = *closed.borrow();
        async move {
            if is_closed {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "provider connection closed",
                ));
            }
            Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?))
        }
    }));
    Ok(channel)
}
