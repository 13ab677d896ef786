//! Common test utilities and fixtures
//!
//! [`TestProvider`] serves a scripted provider plugin on a real unix socket
//! in a scratch directory, so tests drive the same client and orchestrator
//! code paths the driver uses.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::{Request, Response, Status};
use tracing_subscriber::EnvFilter;

use secrets_provider_client::config::RetryPolicy;
use secrets_provider_client::provider::{serve, socket_path};
use secrets_provider_client::v1alpha1::csi_driver_provider_server::CsiDriverProvider;
use secrets_provider_client::v1alpha1::{
    File, MountRequest, MountResponse, ObjectVersion, VersionRequest, VersionResponse,
};
use secrets_provider_client::PluginClientBuilder;

pub const RUNTIME_NAME: &str = "fake-provider";
pub const RUNTIME_VERSION: &str = "0.0.1";

/// Initialize logging for tests (call once per test run)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

type Handler = dyn Fn(&MountRequest) -> Result<MountResponse, Status> + Send + Sync;

/// Provider answering every mount through a test-supplied handler
#[derive(Clone)]
pub struct ScriptedProvider {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<MountRequest>>>,
}

impl ScriptedProvider {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&MountRequest) -> Result<MountResponse, Status> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every mount request received so far
    pub fn requests(&self) -> Vec<MountRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl CsiDriverProvider for ScriptedProvider {
    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: request.into_inner().version,
            runtime_name: RUNTIME_NAME.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
        }))
    }

    async fn mount(
        &self,
        request: Request<MountRequest>,
    ) -> Result<Response<MountResponse>, Status> {
        let request = request.into_inner();
        self.requests.lock().push(request.clone());
        (self.handler)(&request).map(Response::new)
    }
}

/// A provider served from a scratch socket directory, plus a scratch
/// mount target.
pub struct TestProvider {
    pub name: String,
    pub provider: ScriptedProvider,
    socket_dir: TempDir,
    target: TempDir,
    server: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl TestProvider {
    /// Start serving `provider` as `name`.
    pub async fn start(name: &str, provider: ScriptedProvider) -> Result<Self> {
        init_logging();
        let mut test = Self {
            name: name.to_string(),
            provider,
            socket_dir: TempDir::new().context("socket dir")?,
            target: TempDir::new().context("target dir")?,
            server: None,
        };
        test.restart().await?;
        Ok(test)
    }

    /// Directory holding the provider socket
    pub fn socket_dir(&self) -> &Path {
        self.socket_dir.path()
    }

    pub fn socket(&self) -> PathBuf {
        socket_path(self.socket_dir.path(), &self.name)
    }

    /// Mount target directory
    pub fn target(&self) -> &Path {
        self.target.path()
    }

    /// Client cache pointed at this provider's socket directory
    pub fn builder(&self, policy: RetryPolicy) -> PluginClientBuilder {
        PluginClientBuilder::new(self.socket_dir(), policy)
    }

    /// Stop the server. The socket file is left behind, like a crashed
    /// plugin would leave it.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some((shutdown, handle)) = self.server.take() {
            let _ = shutdown.send(());
            handle.await.context("provider task panicked")?;
        }
        Ok(())
    }

    /// (Re)start serving on the same socket.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;

        let socket = self.socket();
        let provider = self.provider.clone();
        let (tx, rx) = oneshot::channel::<()>();
        let path = socket.clone();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = serve(&path, provider, shutdown).await {
                tracing::error!("test provider stopped: {}", e);
            }
        });
        self.server = Some((tx, handle));

        wait_for_socket(&socket).await
    }

    pub async fn cleanup(mut self) -> Result<()> {
        self.stop().await
    }
}

async fn wait_for_socket(socket: &Path) -> Result<()> {
    for _ in 0..200 {
        if tokio::net::UnixStream::connect(socket).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("provider socket {:?} never became ready", socket)
}

/// Default retry policy with backoff shortened for tests
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        ..RetryPolicy::default()
    }
}

pub fn versions(pairs: &[(&str, &str)]) -> Vec<ObjectVersion> {
    pairs
        .iter()
        .map(|(id, version)| ObjectVersion {
            id: id.to_string(),
            version: version.to_string(),
        })
        .collect()
}

pub fn file(path: &str, contents: &str) -> File {
    File {
        path: path.to_string(),
        mode: 0o600,
        contents: contents.as_bytes().to_vec(),
    }
}
